use std::path::PathBuf;

use thiserror::Error;

use crate::exit_code;

pub type SkillResult<T> = Result<T, SkillError>;

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("skill '{name}' not found in {scope} scope ({searched})")]
    NotFound {
        name: String,
        scope: String,
        searched: PathBuf,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("security violation: {0}")]
    Security(SecurityViolation),

    #[error("{message}")]
    Concurrency { lock_path: PathBuf, message: String },

    #[error(
        "partial failure: removed {removed} of {total} entries, {failed} failed{}",
        interrupted_suffix(.interrupted)
    )]
    PartialFailure {
        path: PathBuf,
        removed: usize,
        failed: usize,
        total: usize,
        interrupted: bool,
        errors: Vec<String>,
    },

    #[error("critical: {message}")]
    Critical {
        message: String,
        backup_path: Option<PathBuf>,
        recovery_instructions: Vec<String>,
    },

    #[error("operation cancelled before any change was made")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SkillError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation(_) => exit_code::VALIDATION_FAILURE,
            Self::Security(_) => exit_code::SECURITY_VIOLATION,
            Self::Concurrency { .. } => exit_code::LOCKED,
            Self::Critical { .. } => exit_code::CRITICAL,
            Self::PartialFailure { .. } | Self::Cancelled | Self::Internal(_) => {
                exit_code::GENERAL_FAILURE
            }
        }
    }

    pub fn is_security(&self) -> bool {
        matches!(self, Self::Security(_))
    }
}

fn interrupted_suffix(interrupted: &bool) -> &'static str {
    if *interrupted {
        " (interrupted)"
    } else {
        ""
    }
}

impl From<SecurityViolation> for SkillError {
    fn from(violation: SecurityViolation) -> Self {
        Self::Security(violation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityViolation {
    #[error("unsafe skill name '{name}': {reason}")]
    UnsafeName { name: String, reason: String },

    #[error("path {path} is not contained in {base}: {reason}")]
    Containment {
        base: PathBuf,
        path: PathBuf,
        reason: String,
    },

    #[error("refusing to operate on protected system path {path}")]
    DangerousPath { path: PathBuf },

    #[error("{path} is not a skills scope directory (expected a path ending in .claude/skills)")]
    InvalidScopePath { path: PathBuf },

    #[error("symlink {link} resolves to {target}, outside {scope}")]
    SymlinkEscape {
        link: PathBuf,
        target: PathBuf,
        scope: PathBuf,
    },

    #[error("requested skill '{requested}' matches directory '{actual}' only by case")]
    CaseMismatch { requested: String, actual: String },

    #[error("archive entry '{entry}' rejected: {reason}")]
    UnsafeArchiveEntry { entry: String, reason: String },

    #[error("archive expands to {expanded} bytes from {compressed} (ratio above {limit})")]
    CompressionRatio {
        compressed: u64,
        expanded: u64,
        limit: u64,
    },

    #[error("archive expands beyond the {limit} byte limit")]
    PackageTooLarge { limit: u64 },
}
