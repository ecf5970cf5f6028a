use anyhow::{Context, Result};
use skillpack_security::{check_directory_symlinks, check_hard_links};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalFindingKind {
    GitRepository,
    NodeModules,
    EditorTempFile,
    OversizedFile { size: u64 },
    HardLink { link_count: u64 },
    EscapingSymlink { target: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalFinding {
    pub kind: RemovalFindingKind,
    pub relative_path: PathBuf,
}

impl RemovalFinding {
    pub fn message(&self) -> String {
        let path = self.relative_path.display();
        match &self.kind {
            RemovalFindingKind::GitRepository => format!("{path} is a git repository"),
            RemovalFindingKind::NodeModules => format!("{path} holds installed node modules"),
            RemovalFindingKind::EditorTempFile => {
                format!("{path} looks like an unsaved editor file")
            }
            RemovalFindingKind::OversizedFile { size } => {
                format!("{path} is large ({size} bytes)")
            }
            RemovalFindingKind::HardLink { link_count } => {
                format!("{path} has {link_count} hard links")
            }
            RemovalFindingKind::EscapingSymlink { target } => {
                format!("{path} is a symlink to {}", target.display())
            }
        }
    }
}

/// Things in a skill directory a user probably did not mean to lose. Findings
/// do not block removal on their own; they ask for confirmation.
pub fn scan_before_removal(skill_path: &Path, max_file_size: u64) -> Result<Vec<RemovalFinding>> {
    let mut findings = Vec::new();

    let mut walker = WalkDir::new(skill_path)
        .follow_links(false)
        .follow_root_links(false)
        .min_depth(1)
        .into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.with_context(|| format!("failed walking {}", skill_path.display()))?;
        let relative_path = entry
            .path()
            .strip_prefix(skill_path)
            .with_context(|| format!("failed to relativize {}", entry.path().display()))?
            .to_path_buf();
        let file_name = entry.file_name().to_string_lossy();
        let file_type = entry.file_type();

        if file_type.is_dir() && (file_name == ".git" || file_name == "node_modules") {
            let kind = if file_name == ".git" {
                RemovalFindingKind::GitRepository
            } else {
                RemovalFindingKind::NodeModules
            };
            findings.push(RemovalFinding {
                kind,
                relative_path,
            });
            walker.skip_current_dir();
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        if is_editor_temp_file(&file_name) {
            findings.push(RemovalFinding {
                kind: RemovalFindingKind::EditorTempFile,
                relative_path: relative_path.clone(),
            });
        }
        let size = entry
            .metadata()
            .with_context(|| format!("failed to stat {}", entry.path().display()))?
            .len();
        if size > max_file_size {
            findings.push(RemovalFinding {
                kind: RemovalFindingKind::OversizedFile { size },
                relative_path,
            });
        }
    }

    for hard_link in check_hard_links(skill_path)? {
        findings.push(RemovalFinding {
            kind: RemovalFindingKind::HardLink {
                link_count: hard_link.link_count,
            },
            relative_path: hard_link.relative_path,
        });
    }
    for symlink in check_directory_symlinks(skill_path) {
        let symlink = symlink?;
        if symlink.escapes_scope {
            findings.push(RemovalFinding {
                kind: RemovalFindingKind::EscapingSymlink {
                    target: symlink.resolved_path,
                },
                relative_path: symlink.relative_path,
            });
        }
    }

    Ok(findings)
}

fn is_editor_temp_file(file_name: &str) -> bool {
    file_name.ends_with('~')
        || file_name.ends_with(".swp")
        || file_name.ends_with(".swo")
        || file_name.starts_with(".#")
        || (file_name.len() > 1 && file_name.starts_with('#') && file_name.ends_with('#'))
}
