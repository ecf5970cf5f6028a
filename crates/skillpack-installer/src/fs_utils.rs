use anyhow::{Context, Result};
use skillpack_security::{verify_before_deletion, DeletionCheck, PathType};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub fn current_unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before unix epoch")?
        .as_secs())
}

fn make_tmp_dir(parent: &Path, prefix: &str) -> Result<PathBuf> {
    let mut dir = parent.to_path_buf();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before unix epoch")?
        .as_nanos();
    dir.push(format!("{}-{}-{}", prefix, std::process::id(), nanos));
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed creating tmp dir: {}", dir.display()))?;
    Ok(dir)
}

/// Staging directories only ever hold our own extraction output.
fn remove_staging_dir(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(dir = %dir.display(), error = %err, "failed to clean staging dir"),
    }
}

/// A private scratch directory under the staging area, removed on drop.
#[derive(Debug)]
pub(crate) struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    pub(crate) fn create(staging_root: &Path) -> Result<Self> {
        Ok(Self {
            path: make_tmp_dir(staging_root, "stage")?,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Copies the package into this staging directory so every later read
    /// sees the same bytes, whatever happens to the caller's file.
    pub(crate) fn snapshot_package(&self, package_path: &Path) -> Result<PathBuf> {
        let snapshot = self.path.join("package.archive");
        fs::copy(package_path, &snapshot).with_context(|| {
            format!(
                "failed to copy package {} into staging",
                package_path.display()
            )
        })?;
        Ok(snapshot)
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        remove_staging_dir(&self.path);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub total: usize,
    pub removed: usize,
    pub failed: usize,
    pub files_removed: usize,
    pub directories_removed: usize,
    pub bytes_freed: u64,
    pub interrupted: bool,
    pub errors: Vec<String>,
}

impl RemovalReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && !self.interrupted && self.removed == self.total
    }

    pub fn describe(&self) -> String {
        let mut text = format!(
            "removed {} of {} entries, {} failed",
            self.removed, self.total, self.failed
        );
        if self.interrupted {
            text.push_str(" (interrupted)");
        }
        if let Some(first) = self.errors.first() {
            text.push_str(&format!("; first error: {first}"));
        }
        text
    }
}

/// Counts what [`remove_skill_tree`] would remove, without touching anything.
pub fn measure_tree(skill_path: &Path) -> Result<(usize, u64)> {
    let mut entries = 0;
    let mut bytes = 0;
    for entry in WalkDir::new(skill_path)
        .follow_links(false)
        .follow_root_links(false)
    {
        let entry = entry.with_context(|| format!("failed walking {}", skill_path.display()))?;
        entries += 1;
        if entry.file_type().is_file() {
            bytes += entry
                .metadata()
                .with_context(|| format!("failed to stat {}", entry.path().display()))?
                .len();
        }
    }
    Ok((entries, bytes))
}

/// Removes `skill_path` and everything below it, one entry at a time,
/// children before parents. Every entry passes [`verify_before_deletion`]
/// right before it is unlinked; entries failing the gate are counted and
/// skipped. Links are unlinked, never followed. Cancellation is honored
/// between entries.
pub fn remove_skill_tree(skill_path: &Path, cancel: &CancellationToken) -> RemovalReport {
    let mut report = RemovalReport::default();
    let mut targets = Vec::new();
    for entry in WalkDir::new(skill_path)
        .follow_links(false)
        .follow_root_links(false)
        .contents_first(true)
    {
        match entry {
            Ok(entry) => targets.push(entry.into_path()),
            Err(err) => {
                report.total += 1;
                report.failed += 1;
                report.errors.push(format!("walk error: {err}"));
            }
        }
    }
    report.total += targets.len();

    for target in targets {
        if cancel.is_cancelled() {
            report.interrupted = true;
            warn!(path = %skill_path.display(), "removal interrupted");
            break;
        }

        let verified = match verify_before_deletion(skill_path, &target) {
            DeletionCheck::Ok(verified) => verified,
            DeletionCheck::Failed { reason, detail } => {
                warn!(path = %target.display(), ?reason, "deletion gate refused entry");
                report.failed += 1;
                report.errors.push(detail);
                continue;
            }
        };

        let result = match verified.path_type {
            PathType::Directory => fs::remove_dir(&verified.path),
            PathType::File | PathType::Symlink => fs::remove_file(&verified.path),
        };
        match result {
            Ok(()) => {
                debug!(path = %verified.path.display(), kind = verified.path_type.as_str(), "removed");
                report.removed += 1;
                match verified.path_type {
                    PathType::Directory => report.directories_removed += 1,
                    PathType::File | PathType::Symlink => report.files_removed += 1,
                }
                report.bytes_freed += verified.size;
            }
            Err(err) => {
                report.failed += 1;
                report
                    .errors
                    .push(format!("failed to remove {}: {err}", verified.path.display()));
            }
        }
    }

    report
}
