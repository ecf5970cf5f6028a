use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

/// Directories no skill operation may ever target, whatever containment says.
pub const DANGEROUS_PATHS: [&str; 12] = [
    "/etc",
    "/usr",
    "/bin",
    "/var",
    "/boot",
    "/root",
    "/tmp",
    "/sys",
    "/proc",
    "/dev",
    "C:\\Windows",
    "C:\\Program Files",
];

// These host user data below them (home of the root user, per-user temp dirs,
// macOS `/var/folders`), so only the directory itself is protected.
const EXACT_ONLY_DANGEROUS_PATHS: [&str; 3] = ["/var", "/root", "/tmp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Containment {
    Valid { normalized_path: PathBuf },
    Violation { base_path: PathBuf, reason: String },
}

impl Containment {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathType {
    File,
    Directory,
    Symlink,
}

impl PathType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
        }
    }
}

/// A deletion target that was re-checked immediately before use. Never hold
/// one across another filesystem operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPath {
    pub path: PathBuf,
    pub skill_path: PathBuf,
    pub path_type: PathType,
    pub size: u64,
    pub verified_at: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionFailure {
    NotExists,
    ContainmentViolation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionCheck {
    Ok(VerifiedPath),
    Failed {
        reason: DeletionFailure,
        detail: String,
    },
}

/// Makes `path` absolute against the current directory and folds `.` and `..`
/// lexically. Symlinks are not consulted.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };
    fold_components(&absolute)
}

fn fold_components(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if normalized.file_name().is_some() {
                    normalized.pop();
                }
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

/// Decides whether `target` lies inside `base`. A relative target is taken
/// relative to `base`. Comparison is per path component, so `/skills/a-evil`
/// is never inside `/skills/a`.
pub fn verify_containment(base: &Path, target: &Path) -> Containment {
    let base_path = normalize_path(base);
    let joined = if target.is_absolute() {
        target.to_path_buf()
    } else {
        base_path.join(target)
    };
    let normalized_target = fold_components(&joined);

    if normalized_target == base_path || normalized_target.starts_with(&base_path) {
        Containment::Valid {
            normalized_path: normalized_target,
        }
    } else {
        Containment::Violation {
            reason: format!(
                "{} resolves outside {}",
                normalized_target.display(),
                base_path.display()
            ),
            base_path,
        }
    }
}

/// Case-insensitive deny-list check. System directories such as `/etc` or
/// `C:\Windows` match themselves and everything below them. `/var`, `/tmp`
/// and `/root` match only exactly: paths below them are not reported, so
/// callers relying on this alone still accept e.g. `/tmp/x` or `/var/lib/x`.
pub fn is_dangerous_path(path: &Path) -> bool {
    let raw = path.to_string_lossy();
    let resolved = if has_drive_prefix(&raw) {
        // Drive paths are relative on unix hosts; fold them as written.
        fold_components(Path::new(&raw.replace('\\', "/")))
    } else {
        normalize_path(path)
    };
    let candidate = comparable(&resolved.to_string_lossy());
    if candidate == "/" || candidate.is_empty() || is_drive_root(&candidate) {
        return true;
    }

    DANGEROUS_PATHS.iter().any(|entry| {
        let entry_cmp = comparable(entry);
        if candidate == entry_cmp {
            return true;
        }
        if EXACT_ONLY_DANGEROUS_PATHS.contains(entry) {
            return false;
        }
        candidate.starts_with(&format!("{entry_cmp}/"))
    })
}

fn comparable(raw: &str) -> String {
    let lowered = raw.replace('\\', "/").to_lowercase();
    let trimmed = lowered.trim_end_matches('/');
    if trimmed.is_empty() && lowered.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn has_drive_prefix(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn is_drive_root(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// True only when the last two segments are exactly `.claude/skills`.
pub fn is_valid_scope_path(path: &Path) -> bool {
    let normalized = normalize_path(path);
    let mut tail = normalized.components().rev().filter_map(|component| match component {
        Component::Normal(part) => Some(part),
        _ => None,
    });
    let last = tail.next();
    let second_last = tail.next();
    matches!(
        (second_last.and_then(|v| v.to_str()), last.and_then(|v| v.to_str())),
        (Some(".claude"), Some("skills"))
    )
}

/// The final gate before deleting `target`: containment in `skill_path` is
/// re-checked lexically and against the real location of the target's parent,
/// and the entry is re-stated without following it.
pub fn verify_before_deletion(skill_path: &Path, target: &Path) -> DeletionCheck {
    let normalized = match verify_containment(skill_path, target) {
        Containment::Valid { normalized_path } => normalized_path,
        Containment::Violation { reason, .. } => {
            return DeletionCheck::Failed {
                reason: DeletionFailure::ContainmentViolation,
                detail: reason,
            };
        }
    };

    let metadata = match fs::symlink_metadata(&normalized) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return DeletionCheck::Failed {
                reason: DeletionFailure::NotExists,
                detail: format!("{} no longer exists", normalized.display()),
            };
        }
        Err(err) => {
            return DeletionCheck::Failed {
                reason: DeletionFailure::NotExists,
                detail: format!("failed to stat {}: {err}", normalized.display()),
            };
        }
    };

    if let Err(detail) = verify_real_parent(skill_path, &normalized) {
        return DeletionCheck::Failed {
            reason: DeletionFailure::ContainmentViolation,
            detail,
        };
    }

    let file_type = metadata.file_type();
    let path_type = if file_type.is_symlink() {
        PathType::Symlink
    } else if file_type.is_dir() {
        PathType::Directory
    } else {
        PathType::File
    };

    DeletionCheck::Ok(VerifiedPath {
        path: normalized,
        skill_path: normalize_path(skill_path),
        path_type,
        size: if path_type == PathType::File {
            metadata.len()
        } else {
            0
        },
        verified_at: SystemTime::now(),
    })
}

// A directory swapped for a symlink between scan and delete would make the
// lexical check pass while the unlink lands elsewhere.
fn verify_real_parent(skill_path: &Path, target: &Path) -> Result<(), String> {
    let real_skill = skill_path
        .canonicalize()
        .map_err(|err| format!("failed to resolve {}: {err}", skill_path.display()))?;

    if normalize_path(skill_path) == target {
        return Ok(());
    }

    let Some(parent) = target.parent() else {
        return Err(format!("{} has no parent directory", target.display()));
    };
    let real_parent = parent
        .canonicalize()
        .map_err(|err| format!("failed to resolve {}: {err}", parent.display()))?;
    if real_parent == real_skill || real_parent.starts_with(&real_skill) {
        Ok(())
    } else {
        Err(format!(
            "{} really lives in {}, outside {}",
            target.display(),
            real_parent.display(),
            real_skill.display()
        ))
    }
}
