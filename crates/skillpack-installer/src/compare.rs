use anyhow::{Context, Result};
use skillpack_security::{sha256_file_hex, sha256_hex};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionComparison {
    pub files_added: Vec<PathBuf>,
    pub files_modified: Vec<PathBuf>,
    pub files_removed: Vec<PathBuf>,
    /// New total file size minus old total file size, in bytes.
    pub size_change: i64,
}

impl VersionComparison {
    pub fn is_unchanged(&self) -> bool {
        self.files_added.is_empty() && self.files_modified.is_empty() && self.files_removed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileFingerprint {
    digest: String,
    size: u64,
}

pub fn compare_versions(installed: &Path, candidate: &Path) -> Result<VersionComparison> {
    let old = snapshot(installed)?;
    let new = snapshot(candidate)?;

    let mut comparison = VersionComparison::default();
    for (path, fingerprint) in &new {
        match old.get(path) {
            None => comparison.files_added.push(path.clone()),
            Some(previous) if previous.digest != fingerprint.digest => {
                comparison.files_modified.push(path.clone())
            }
            Some(_) => {}
        }
    }
    comparison.files_removed = old
        .keys()
        .filter(|path| !new.contains_key(*path))
        .cloned()
        .collect();

    let old_size: u64 = old.values().map(|fingerprint| fingerprint.size).sum();
    let new_size: u64 = new.values().map(|fingerprint| fingerprint.size).sum();
    comparison.size_change = new_size as i64 - old_size as i64;
    Ok(comparison)
}

/// Content fingerprints for every file and symlink below `root`. Symlinks are
/// fingerprinted by their target text and never followed.
fn snapshot(root: &Path) -> Result<BTreeMap<PathBuf, FileFingerprint>> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .follow_root_links(false)
        .min_depth(1)
    {
        let entry = entry.with_context(|| format!("failed walking {}", root.display()))?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("failed to relativize {}", entry.path().display()))?
            .to_path_buf();

        let fingerprint = if entry.path_is_symlink() {
            let target = fs::read_link(entry.path())
                .with_context(|| format!("failed to read link {}", entry.path().display()))?;
            FileFingerprint {
                digest: sha256_hex(format!("symlink:{}", target.display()).as_bytes()),
                size: 0,
            }
        } else if entry.file_type().is_file() {
            let size = entry
                .metadata()
                .with_context(|| format!("failed to stat {}", entry.path().display()))?
                .len();
            FileFingerprint {
                digest: sha256_file_hex(entry.path())?,
                size,
            }
        } else {
            continue;
        };
        files.insert(relative, fingerprint);
    }
    Ok(files)
}
