use thiserror::Error;

use crate::models::Section;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Master,
    Section,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("invalid password for {0}")]
    Denied(String),
    #[error("administrator key required")]
    MasterRequired,
}

/// Usability gate in front of edits. Not a security boundary.
pub trait AccessGate {
    fn check(&self, password: &str, section: Option<Section>) -> Option<AccessLevel>;

    fn require_section(&self, password: &str, section: Section) -> Result<AccessLevel, AccessError> {
        self.check(password, Some(section))
            .ok_or_else(|| AccessError::Denied(section.label().to_string()))
    }

    fn require_master(&self, password: &str) -> Result<(), AccessError> {
        match self.check(password, None) {
            Some(AccessLevel::Master) => Ok(()),
            _ => Err(AccessError::MasterRequired),
        }
    }
}

/// Master key works everywhere; each section also accepts the first word of
/// its label in lowercase followed by `123`.
pub struct PasswordGate {
    master_key: String,
}

impl PasswordGate {
    pub fn new(master_key: impl Into<String>) -> Self {
        Self {
            master_key: master_key.into(),
        }
    }

    pub fn section_password(section: Section) -> String {
        let stem = section
            .label()
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase();
        format!("{stem}123")
    }
}

impl AccessGate for PasswordGate {
    fn check(&self, password: &str, section: Option<Section>) -> Option<AccessLevel> {
        if password == self.master_key {
            return Some(AccessLevel::Master);
        }
        match section {
            Some(section) if password == Self::section_password(section) => {
                Some(AccessLevel::Section)
            }
            _ => {
                tracing::info!(section = ?section, "password rejected");
                None
            }
        }
    }
}
