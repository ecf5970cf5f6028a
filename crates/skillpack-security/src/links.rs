use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;
use walkdir::WalkDir;

use crate::containment::normalize_path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymlinkSafety {
    Safe {
        is_symlink: bool,
        resolved_path: Option<PathBuf>,
    },
    Escape {
        target_path: PathBuf,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkFinding {
    pub relative_path: PathBuf,
    pub is_directory_symlink: bool,
    pub resolved_path: PathBuf,
    pub escapes_scope: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardLinkFinding {
    pub relative_path: PathBuf,
    pub link_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardLinkWarning {
    pub count: usize,
    pub files: Vec<HardLinkFinding>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymlinkSummary {
    pub total_symlinks: usize,
    pub escaping_symlinks: usize,
    pub directory_symlinks: usize,
    pub has_security_concerns: bool,
    pub warning: Option<String>,
}

/// Classifies `path` against the real location of a scope root. The whole
/// link chain is resolved, and the scope root is resolved too, so a scope
/// reached through a symlink (`/var` -> `/private/var`) compares correctly.
pub fn check_symlink_safety(path: &Path, scope_real_path: &Path) -> SymlinkSafety {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) => {
            return SymlinkSafety::Error {
                message: format!("failed to stat {}: {err}", path.display()),
            };
        }
    };
    if !metadata.file_type().is_symlink() {
        return SymlinkSafety::Safe {
            is_symlink: false,
            resolved_path: None,
        };
    }

    let scope_real = match scope_real_path.canonicalize() {
        Ok(real) => real,
        Err(err) => {
            return SymlinkSafety::Error {
                message: format!(
                    "failed to resolve scope root {}: {err}",
                    scope_real_path.display()
                ),
            };
        }
    };

    let resolved = match resolve_link_target(path) {
        Ok(resolved) => resolved,
        Err(err) => {
            return SymlinkSafety::Error {
                message: format!("{err:#}"),
            };
        }
    };

    let inside = resolved.path == scope_real || resolved.path.starts_with(&scope_real);
    if inside && !resolved.cyclic {
        SymlinkSafety::Safe {
            is_symlink: true,
            resolved_path: Some(resolved.path),
        }
    } else {
        SymlinkSafety::Escape {
            target_path: resolved.path,
        }
    }
}

struct ResolvedLink {
    path: PathBuf,
    cyclic: bool,
}

// Follows the full chain when it terminates. Otherwise falls back to the first
// hop, anchored at the link's real parent directory, with the directory part of
// the target resolved through the filesystem when it exists (`x/../y` climbs
// out of wherever `x` really points). A first hop that is itself a link means
// the chain could not be followed to its end and is treated as a cycle.
fn resolve_link_target(link: &Path) -> Result<ResolvedLink> {
    if let Ok(real) = link.canonicalize() {
        return Ok(ResolvedLink {
            path: real,
            cyclic: false,
        });
    }

    let target =
        fs::read_link(link).with_context(|| format!("failed to read link {}", link.display()))?;
    let parent = link
        .parent()
        .with_context(|| format!("symlink {} has no parent", link.display()))?;
    let real_parent = parent
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", parent.display()))?;
    let candidate = real_parent.join(target);
    let first_hop = match (candidate.parent(), candidate.file_name()) {
        (Some(dir), Some(name)) => match dir.canonicalize() {
            Ok(real_dir) => real_dir.join(name),
            Err(_) => normalize_path(&candidate),
        },
        _ => normalize_path(&candidate),
    };
    let cyclic = fs::symlink_metadata(&first_hop)
        .map(|metadata| metadata.file_type().is_symlink())
        .unwrap_or(false);
    Ok(ResolvedLink {
        path: first_hop,
        cyclic,
    })
}

/// Lazily walks a tree without following links, yielding one finding per
/// symlink. Call [`SymlinkScan::restart`] to walk again from the top.
pub struct SymlinkScan {
    root: PathBuf,
    real_root: Option<PathBuf>,
    walker: walkdir::IntoIter,
}

pub fn check_directory_symlinks(dir_path: &Path) -> SymlinkScan {
    SymlinkScan {
        root: dir_path.to_path_buf(),
        real_root: dir_path.canonicalize().ok(),
        walker: WalkDir::new(dir_path)
            .follow_links(false)
            .follow_root_links(false)
            .min_depth(1)
            .into_iter(),
    }
}

impl SymlinkScan {
    pub fn restart(&self) -> Self {
        check_directory_symlinks(&self.root)
    }

    fn classify(&self, path: &Path) -> Result<SymlinkFinding> {
        let real_root = self
            .real_root
            .as_ref()
            .with_context(|| format!("failed to resolve {}", self.root.display()))?;
        let relative_path = path
            .strip_prefix(&self.root)
            .with_context(|| format!("failed to relativize {}", path.display()))?
            .to_path_buf();
        let ResolvedLink {
            path: resolved_path,
            cyclic,
        } = resolve_link_target(path)?;
        let is_directory_symlink = fs::metadata(path)
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false);

        let outside_root = !(resolved_path == *real_root || resolved_path.starts_with(real_root));
        // A link to one of its own ancestors is a cycle, even inside the tree.
        let real_link_location = real_root.join(&relative_path);
        let points_at_ancestor =
            is_directory_symlink && real_link_location.starts_with(&resolved_path);

        Ok(SymlinkFinding {
            relative_path,
            is_directory_symlink,
            resolved_path,
            escapes_scope: outside_root || points_at_ancestor || cyclic,
        })
    }
}

impl Iterator for SymlinkScan {
    type Item = Result<SymlinkFinding>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    return Some(Err(err).with_context(|| {
                        format!("failed walking {}", self.root.display())
                    }));
                }
            };
            if !entry.path_is_symlink() {
                continue;
            }
            let finding = self.classify(entry.path());
            if let Ok(finding) = &finding {
                debug!(
                    link = %finding.relative_path.display(),
                    target = %finding.resolved_path.display(),
                    escapes = finding.escapes_scope,
                    "symlink found"
                );
            }
            return Some(finding);
        }
    }
}

pub fn get_symlink_summary(dir_path: &Path) -> Result<SymlinkSummary> {
    let mut summary = SymlinkSummary::default();
    for finding in check_directory_symlinks(dir_path) {
        let finding = finding?;
        summary.total_symlinks += 1;
        if finding.is_directory_symlink {
            summary.directory_symlinks += 1;
        }
        if finding.escapes_scope {
            summary.escaping_symlinks += 1;
        }
    }

    summary.has_security_concerns = summary.escaping_symlinks > 0;
    if summary.escaping_symlinks > 0 {
        summary.warning = Some(format!(
            "{} of {} symlinks resolve outside {}; only the links themselves will be touched",
            summary.escaping_symlinks,
            summary.total_symlinks,
            dir_path.display()
        ));
    } else if summary.directory_symlinks > 0 {
        summary.warning = Some(format!(
            "{} directory symlinks found; they will not be followed",
            summary.directory_symlinks
        ));
    }
    Ok(summary)
}

/// Regular files with more than one link. Deleting one of them would change
/// content that is still visible through another name.
pub fn check_hard_links(dir_path: &Path) -> Result<Vec<HardLinkFinding>> {
    let mut findings = Vec::new();
    for entry in WalkDir::new(dir_path).follow_links(false).min_depth(1) {
        let entry = entry.with_context(|| format!("failed walking {}", dir_path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry
            .metadata()
            .with_context(|| format!("failed to stat {}", entry.path().display()))?;
        let link_count = link_count(&metadata);
        if link_count > 1 {
            let relative_path = entry
                .path()
                .strip_prefix(dir_path)
                .with_context(|| format!("failed to relativize {}", entry.path().display()))?
                .to_path_buf();
            findings.push(HardLinkFinding {
                relative_path,
                link_count,
            });
        }
    }
    findings.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(findings)
}

pub fn detect_hard_link_warnings(dir_path: &Path) -> Result<Option<HardLinkWarning>> {
    let files = check_hard_links(dir_path)?;
    if files.is_empty() {
        return Ok(None);
    }
    let count = files.len();
    Ok(Some(HardLinkWarning {
        count,
        message: format!(
            "{count} file(s) in {} have additional hard links; removing them changes content visible elsewhere",
            dir_path.display()
        ),
        files,
    }))
}

#[cfg(unix)]
fn link_count(metadata: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.nlink()
}

#[cfg(not(unix))]
fn link_count(_metadata: &fs::Metadata) -> u64 {
    1
}
