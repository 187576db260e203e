//! Versioned prompt templates.
//!
//! A template file has a system section and a user section separated by a
//! line reading `---USER---`. The user section carries exactly one
//! `{{CANDIDATE}}` placeholder, replaced verbatim with a profile description.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::error::AuditError;
use crate::io::digest::sha256_hex;

pub const USER_SEPARATOR: &str = "---USER---";
pub const CANDIDATE_PLACEHOLDER: &str = "{{CANDIDATE}}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub version: String,
    system: String,
    user: String,
    /// SHA-256 of the template text.
    pub hash: String,
}

impl PromptTemplate {
    /// Split and check template text. `origin` names the source in errors.
    pub fn parse(version: &str, contents: &str, origin: &str) -> Result<Self, AuditError> {
        let invalid = |reason: String| AuditError::Template {
            path: origin.to_string(),
            reason,
        };

        let mut system = Vec::new();
        let mut user = Vec::new();
        let mut in_user = false;
        for line in contents.lines() {
            if !in_user && line.trim() == USER_SEPARATOR {
                in_user = true;
                continue;
            }
            if in_user {
                user.push(line);
            } else {
                system.push(line);
            }
        }
        if !in_user {
            return Err(invalid(format!("missing '{USER_SEPARATOR}' separator line")));
        }

        let user = user.join("\n").trim().to_string();
        let placeholders = user.matches(CANDIDATE_PLACEHOLDER).count();
        if placeholders != 1 {
            return Err(invalid(format!(
                "user section must contain exactly one {CANDIDATE_PLACEHOLDER} (found {placeholders})"
            )));
        }

        Ok(Self {
            version: version.to_string(),
            system: system.join("\n").trim().to_string(),
            user,
            hash: sha256_hex(contents.as_bytes()),
        })
    }

    /// Load `path` as template `version`.
    pub fn load(path: &Path, version: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read prompt template {}", path.display()))?;
        let template = Self::parse(version, &contents, &path.display().to_string())?;
        Ok(template)
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    /// User prompt with the placeholder replaced by `candidate`.
    pub fn render_user(&self, candidate: &str) -> String {
        self.user.replacen(CANDIDATE_PLACEHOLDER, candidate, 1)
    }
}
