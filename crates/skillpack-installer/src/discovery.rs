use anyhow::Context;
use skillpack_core::{Scope, SecurityViolation, SkillError, SkillName};
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::ScopeLayout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    Found { path: PathBuf },
    NotFound { searched: PathBuf },
}

/// Resolves an installed skill. Implementations must only report a path when
/// a directory entry matches the requested name byte for byte.
pub trait SkillDiscovery {
    fn discover(&self, name: &SkillName, scope: Scope) -> Result<Discovery, SkillError>;
}

/// Looks a skill up by listing its scope root.
#[derive(Debug, Clone, Copy)]
pub struct ScopeDiscovery<'a> {
    layout: &'a ScopeLayout,
}

impl<'a> ScopeDiscovery<'a> {
    pub fn new(layout: &'a ScopeLayout) -> Self {
        Self { layout }
    }
}

impl SkillDiscovery for ScopeDiscovery<'_> {
    fn discover(&self, name: &SkillName, scope: Scope) -> Result<Discovery, SkillError> {
        let root = self.layout.scope_root(scope);
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Discovery::NotFound {
                    searched: root.to_path_buf(),
                });
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("failed to list scope root {}", root.display()))
                    .into());
            }
        };

        // Listing instead of stat-ing `root/name` keeps case-insensitive
        // filesystems from answering for a differently-cased directory.
        let mut case_variant = None;
        for entry in entries {
            let entry =
                entry.with_context(|| format!("failed to list scope root {}", root.display()))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name == name.as_str() {
                return Ok(Discovery::Found { path: entry.path() });
            }
            if file_name.eq_ignore_ascii_case(name.as_str()) {
                case_variant = Some(file_name.to_string());
            }
        }

        if let Some(actual) = case_variant {
            return Err(SecurityViolation::CaseMismatch {
                requested: name.as_str().to_string(),
                actual,
            }
            .into());
        }
        Ok(Discovery::NotFound {
            searched: root.to_path_buf(),
        })
    }
}
