use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use skillpack_core::SkillError;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::fs_utils::current_unix_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOperation {
    Install,
    Update,
    Uninstall,
}

impl LockOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Update => "update",
            Self::Uninstall => "uninstall",
        }
    }
}

/// Contents of the sidecar lock file. Informational only; the lock is held
/// by the file existing, not by what it says.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub pid: u32,
    pub timestamp: u64,
    pub operation_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFailure {
    AlreadyLocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAcquisition {
    Acquired {
        lock_path: PathBuf,
    },
    NotAcquired {
        reason: LockFailure,
        message: String,
    },
}

/// `<scope-root>/.<skill>.lock`, next to the skill directory so that removing
/// the directory never removes its own lock.
pub fn lock_path_for(skill_path: &Path) -> PathBuf {
    let name = skill_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    skill_path.with_file_name(format!(".{name}.lock"))
}

pub fn acquire_uninstall_lock(
    skill_path: &Path,
    operation: LockOperation,
    package_path: Option<&Path>,
) -> Result<LockAcquisition> {
    let lock_path = lock_path_for(skill_path);
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&lock_path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            let holder = read_lock_file(&lock_path)
                .ok()
                .flatten()
                .map(|info| {
                    format!(
                        " by {} (pid={}, since unix {})",
                        info.operation_type, info.pid, info.timestamp
                    )
                })
                .unwrap_or_default();
            return Ok(LockAcquisition::NotAcquired {
                reason: LockFailure::AlreadyLocked,
                message: format!(
                    "{} is locked{holder}; wait for that operation to finish, or delete {} if no skillpack process is running",
                    skill_path.display(),
                    lock_path.display()
                ),
            });
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to create lock file: {}", lock_path.display()));
        }
    };

    let info = LockInfo {
        pid: std::process::id(),
        timestamp: current_unix_timestamp()?,
        operation_type: operation.as_str().to_string(),
        package_path: package_path.map(|path| path.display().to_string()),
    };
    let write_result = serde_json::to_vec_pretty(&info)
        .context("failed to serialize lock metadata")
        .and_then(|payload| {
            file.write_all(&payload)
                .and_then(|_| file.flush())
                .with_context(|| format!("failed to write lock file: {}", lock_path.display()))
        });
    if let Err(err) = write_result {
        let _ = fs::remove_file(&lock_path);
        return Err(err);
    }

    debug!(lock = %lock_path.display(), operation = operation.as_str(), "lock acquired");
    Ok(LockAcquisition::Acquired { lock_path })
}

pub fn release_uninstall_lock(lock_path: &Path) -> Result<()> {
    match fs::remove_file(lock_path) {
        Ok(()) => {
            debug!(lock = %lock_path.display(), "lock released");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err)
            .with_context(|| format!("failed to release lock file: {}", lock_path.display())),
    }
}

pub fn has_uninstall_lock(skill_path: &Path) -> bool {
    fs::symlink_metadata(lock_path_for(skill_path)).is_ok()
}

pub fn read_lock_info(skill_path: &Path) -> Result<Option<LockInfo>> {
    read_lock_file(&lock_path_for(skill_path))
}

fn read_lock_file(lock_path: &Path) -> Result<Option<LockInfo>> {
    let raw = match fs::read_to_string(lock_path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read lock file: {}", lock_path.display()));
        }
    };
    let info = serde_json::from_str(&raw)
        .map_err(|err| anyhow!("malformed lock file {}: {err}", lock_path.display()))?;
    Ok(Some(info))
}

/// Scoped hold on a skill lock. Dropping the guard releases the lock on every
/// exit path, including early returns and unwinding.
#[derive(Debug)]
pub struct SkillLock {
    lock_path: PathBuf,
    released: bool,
}

impl SkillLock {
    pub fn acquire(
        skill_path: &Path,
        operation: LockOperation,
        package_path: Option<&Path>,
    ) -> Result<Self, SkillError> {
        match acquire_uninstall_lock(skill_path, operation, package_path)? {
            LockAcquisition::Acquired { lock_path } => Ok(Self {
                lock_path,
                released: false,
            }),
            LockAcquisition::NotAcquired { message, .. } => Err(SkillError::Concurrency {
                lock_path: lock_path_for(skill_path),
                message,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        release_uninstall_lock(&self.lock_path)
    }
}

impl Drop for SkillLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = release_uninstall_lock(&self.lock_path) {
            warn!(lock = %self.lock_path.display(), error = %err, "failed to release lock");
        }
    }
}
