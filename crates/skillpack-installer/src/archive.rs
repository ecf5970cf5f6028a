use anyhow::{anyhow, Context};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use skillpack_core::{SecurityViolation, SkillError};
use skillpack_security::{
    check_directory_symlinks, check_symlink_safety, verify_containment, Containment,
    SymlinkSafety,
};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use tar::EntryType;
use tracing::debug;

use crate::SkillpackConfig;

// Small archives of repetitive text legitimately compress far beyond any sane
// ratio; only judge the ratio once the payload is big enough to matter.
const RATIO_CHECK_FLOOR_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Name of the single top-level directory the archive was packed under.
    pub root_name: String,
    pub entries: usize,
    pub bytes: u64,
}

/// Unpacks a skill package into `dest_dir`, dropping the top-level directory
/// so that `dest_dir` becomes the skill root.
pub trait Extractor {
    fn extract(&self, archive_path: &Path, dest_dir: &Path) -> Result<ExtractSummary, SkillError>;

    /// Unpacks a backup written by [`pack_skill_dir`]. The backup holds the
    /// tree exactly as it was installed, so links leaving the skill and
    /// highly compressible files must come back as they were.
    fn restore(&self, archive_path: &Path, dest_dir: &Path) -> Result<ExtractSummary, SkillError> {
        self.extract(archive_path, dest_dir)
    }
}

/// Extractor for the `.skill` package format: a gzip-compressed tar with one
/// top-level directory. Every entry is checked before anything is written and
/// checked again as it is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TarGzExtractor {
    max_package_bytes: u64,
    max_compression_ratio: u64,
}

impl TarGzExtractor {
    pub fn new(max_package_bytes: u64, max_compression_ratio: u64) -> Self {
        Self {
            max_package_bytes,
            max_compression_ratio,
        }
    }

    pub fn from_config(config: &SkillpackConfig) -> Self {
        Self::new(config.max_package_bytes, config.max_compression_ratio)
    }
}

impl Default for TarGzExtractor {
    fn default() -> Self {
        Self::from_config(&SkillpackConfig::default())
    }
}

/// Packages are untrusted input. Backups are our own copy of an installed
/// tree: entry paths and containment are still enforced, the content policy
/// (link targets, size, ratio) is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryPolicy {
    Package,
    Backup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlannedKind {
    Directory,
    File,
    Symlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PlannedEntry {
    relative: PathBuf,
    kind: PlannedKind,
}

type PackageEntry<'a> = tar::Entry<'a, GzDecoder<File>>;

impl TarGzExtractor {
    fn for_each_checked_entry<F>(
        &self,
        archive_path: &Path,
        policy: EntryPolicy,
        mut visit: F,
    ) -> Result<ExtractSummary, SkillError>
    where
        F: FnMut(&PlannedEntry, &mut PackageEntry<'_>) -> Result<(), SkillError>,
    {
        let compressed = fs::metadata(archive_path)
            .with_context(|| format!("failed to stat package {}", archive_path.display()))?
            .len()
            .max(1);
        let file = File::open(archive_path)
            .with_context(|| format!("failed to open package {}", archive_path.display()))?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));

        let mut root_name: Option<String> = None;
        let mut seen = HashSet::new();
        let mut entries = 0;
        let mut expanded: u64 = 0;

        for entry in archive
            .entries()
            .with_context(|| format!("failed to read package {}", archive_path.display()))?
        {
            let mut entry = entry
                .with_context(|| format!("corrupt entry in package {}", archive_path.display()))?;
            let raw_path = entry
                .path()
                .context("package entry has an unreadable path")?
                .into_owned();
            let entry_label = raw_path.display().to_string();

            let entry_type = entry.header().entry_type();
            let kind = match entry_type {
                EntryType::Regular | EntryType::Continuous => PlannedKind::File,
                EntryType::Directory => PlannedKind::Directory,
                EntryType::Symlink => PlannedKind::Symlink,
                EntryType::XGlobalHeader => continue,
                EntryType::Link => {
                    return Err(unsafe_entry(&entry_label, "hard link entries are not allowed"));
                }
                other => {
                    return Err(unsafe_entry(
                        &entry_label,
                        &format!("unsupported entry type {other:?}"),
                    ));
                }
            };

            let (top, relative) = split_entry_path(&raw_path)
                .map_err(|reason| unsafe_entry(&entry_label, &reason))?;
            match &root_name {
                None => root_name = Some(top),
                Some(existing) if *existing == top => {}
                Some(existing) => {
                    return Err(SkillError::Validation(format!(
                        "package must contain a single top-level directory; found '{existing}' and '{top}'"
                    )));
                }
            }
            if relative.as_os_str().is_empty() {
                if kind != PlannedKind::Directory {
                    return Err(SkillError::Validation(format!(
                        "package top-level entry '{entry_label}' must be a directory"
                    )));
                }
                continue;
            }
            if !seen.insert(relative.clone()) {
                return Err(unsafe_entry(&entry_label, "duplicate entry"));
            }

            if kind == PlannedKind::Symlink && policy == EntryPolicy::Package {
                let target = entry
                    .link_name()
                    .context("package symlink has an unreadable target")?
                    .ok_or_else(|| unsafe_entry(&entry_label, "symlink without a target"))?
                    .into_owned();
                check_symlink_target(&relative, &target)
                    .map_err(|reason| unsafe_entry(&entry_label, &reason))?;
            }

            expanded = expanded.saturating_add(entry.size());
            if policy == EntryPolicy::Backup {
                entries += 1;
                visit(&PlannedEntry { relative, kind }, &mut entry)?;
                continue;
            }
            if expanded > self.max_package_bytes {
                return Err(SecurityViolation::PackageTooLarge {
                    limit: self.max_package_bytes,
                }
                .into());
            }
            if expanded > RATIO_CHECK_FLOOR_BYTES
                && expanded / compressed > self.max_compression_ratio
            {
                return Err(SecurityViolation::CompressionRatio {
                    compressed,
                    expanded,
                    limit: self.max_compression_ratio,
                }
                .into());
            }

            entries += 1;
            visit(&PlannedEntry { relative, kind }, &mut entry)?;
        }

        let root_name = root_name.ok_or_else(|| {
            SkillError::Validation(format!("package {} is empty", archive_path.display()))
        })?;
        Ok(ExtractSummary {
            root_name,
            entries,
            bytes: expanded,
        })
    }
}

impl Extractor for TarGzExtractor {
    fn extract(&self, archive_path: &Path, dest_dir: &Path) -> Result<ExtractSummary, SkillError> {
        self.unpack(archive_path, dest_dir, EntryPolicy::Package)
    }

    fn restore(&self, archive_path: &Path, dest_dir: &Path) -> Result<ExtractSummary, SkillError> {
        self.unpack(archive_path, dest_dir, EntryPolicy::Backup)
    }
}

impl TarGzExtractor {
    fn unpack(
        &self,
        archive_path: &Path,
        dest_dir: &Path,
        policy: EntryPolicy,
    ) -> Result<ExtractSummary, SkillError> {
        // Dry pass: nothing is written unless every entry is acceptable.
        self.for_each_checked_entry(archive_path, policy, |_, _| Ok(()))?;

        fs::create_dir_all(dest_dir)
            .with_context(|| format!("failed to create {}", dest_dir.display()))?;
        let real_dest = dest_dir
            .canonicalize()
            .with_context(|| format!("failed to resolve {}", dest_dir.display()))?;

        let summary = self.for_each_checked_entry(archive_path, policy, |planned, entry| {
            let target = match verify_containment(dest_dir, &planned.relative) {
                Containment::Valid { normalized_path } => normalized_path,
                Containment::Violation { base_path, reason } => {
                    return Err(SecurityViolation::Containment {
                        base: base_path,
                        path: dest_dir.join(&planned.relative),
                        reason,
                    }
                    .into());
                }
            };
            let parent = target
                .parent()
                .ok_or_else(|| anyhow!("entry {} has no parent", target.display()))?;
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
            let real_parent = parent
                .canonicalize()
                .with_context(|| format!("failed to resolve {}", parent.display()))?;
            if !real_parent.starts_with(&real_dest) {
                return Err(SecurityViolation::Containment {
                    base: real_dest.clone(),
                    path: target,
                    reason: format!("parent resolves to {}", real_parent.display()),
                }
                .into());
            }

            match planned.kind {
                PlannedKind::Directory => fs::create_dir_all(&target)
                    .with_context(|| format!("failed to create {}", target.display()))?,
                PlannedKind::File | PlannedKind::Symlink => {
                    entry
                        .unpack(&target)
                        .with_context(|| format!("failed to unpack {}", target.display()))?;
                }
            }
            if planned.kind == PlannedKind::Symlink && policy == EntryPolicy::Package {
                check_unpacked_link(&target, &real_dest)?;
            }
            debug!(path = %target.display(), "extracted");
            Ok(())
        })?;

        if policy == EntryPolicy::Package {
            // Links unpacked later can redirect earlier ones (`a -> b/../x`
            // then `b -> .`), so the finished tree is judged as a whole.
            for finding in check_directory_symlinks(dest_dir) {
                let finding = finding?;
                if finding.escapes_scope {
                    return Err(SecurityViolation::SymlinkEscape {
                        link: dest_dir.join(&finding.relative_path),
                        target: finding.resolved_path,
                        scope: real_dest,
                    }
                    .into());
                }
            }
        }

        Ok(summary)
    }
}

/// Resolves a link the way the kernel will, against the real destination.
fn check_unpacked_link(link: &Path, real_dest: &Path) -> Result<(), SkillError> {
    match check_symlink_safety(link, real_dest) {
        SymlinkSafety::Safe { .. } => Ok(()),
        SymlinkSafety::Escape { target_path } => Err(SecurityViolation::SymlinkEscape {
            link: link.to_path_buf(),
            target: target_path,
            scope: real_dest.to_path_buf(),
        }
        .into()),
        SymlinkSafety::Error { message } => Err(SkillError::Internal(anyhow!(
            "failed to check unpacked link {}: {message}",
            link.display()
        ))),
    }
}

fn unsafe_entry(entry: &str, reason: &str) -> SkillError {
    SecurityViolation::UnsafeArchiveEntry {
        entry: entry.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Splits `my-skill/scripts/run.sh` into `("my-skill", "scripts/run.sh")`.
fn split_entry_path(path: &Path) -> Result<(String, PathBuf), String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_os_string()),
            Component::CurDir => {}
            Component::ParentDir => return Err("path traversal ('..') in entry path".to_string()),
            Component::RootDir | Component::Prefix(_) => {
                return Err("absolute entry path".to_string());
            }
        }
    }
    let mut parts = parts.into_iter();
    let top = parts
        .next()
        .ok_or_else(|| "empty entry path".to_string())?
        .into_string()
        .map_err(|_| "top-level directory name is not valid UTF-8".to_string())?;
    Ok((top, parts.collect()))
}

fn check_symlink_target(relative: &Path, target: &Path) -> Result<(), String> {
    if target.is_absolute() || target.has_root() {
        return Err(format!("absolute symlink target {}", target.display()));
    }
    let anchor = Path::new("/skill-root");
    let link_dir = relative.parent().unwrap_or_else(|| Path::new(""));
    let resolved = anchor.join(link_dir).join(target);
    match verify_containment(anchor, &resolved) {
        Containment::Valid { .. } => Ok(()),
        Containment::Violation { .. } => Err(format!(
            "symlink target {} leaves the skill directory",
            target.display()
        )),
    }
}

/// Packs `source_dir` into a `.skill` archive at `archive_path` under the
/// top-level directory `root_name`. Links are stored as links. The archive is
/// written beside its final path and renamed into place when complete.
pub fn pack_skill_dir(
    source_dir: &Path,
    root_name: &str,
    archive_path: &Path,
) -> anyhow::Result<u64> {
    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let partial = archive_path.with_extension("partial");
    let file = File::create(&partial)
        .with_context(|| format!("failed to create {}", partial.display()))?;

    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(root_name, source_dir)
        .with_context(|| format!("failed to archive {}", source_dir.display()))?;
    let encoder = builder
        .into_inner()
        .with_context(|| format!("failed to finish archive {}", partial.display()))?;
    let mut writer = encoder
        .finish()
        .with_context(|| format!("failed to compress {}", partial.display()))?;
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", partial.display()))?;
    writer
        .get_ref()
        .sync_all()
        .with_context(|| format!("failed to sync {}", partial.display()))?;
    drop(writer);

    fs::rename(&partial, archive_path).with_context(|| {
        format!(
            "failed to move {} into place at {}",
            partial.display(),
            archive_path.display()
        )
    })?;
    let size = fs::metadata(archive_path)
        .with_context(|| format!("failed to stat {}", archive_path.display()))?
        .len();
    Ok(size)
}

/// Reads the whole archive once without writing anything, returning its
/// summary. Used to preview packages.
pub fn inspect_package(
    extractor: &TarGzExtractor,
    archive_path: &Path,
) -> Result<ExtractSummary, SkillError> {
    extractor.for_each_checked_entry(archive_path, EntryPolicy::Package, drain_entry)
}

/// Reads a freshly written backup end to end under the rules
/// [`Extractor::restore`] applies, and checks it holds `expected_entries`
/// entries below `root_name`. Run before anything is deleted.
pub fn verify_backup(
    archive_path: &Path,
    root_name: &str,
    expected_entries: usize,
) -> Result<ExtractSummary, SkillError> {
    let summary = TarGzExtractor::default().for_each_checked_entry(
        archive_path,
        EntryPolicy::Backup,
        drain_entry,
    )?;
    if summary.root_name != root_name || summary.entries != expected_entries {
        return Err(SkillError::Validation(format!(
            "backup {} holds {} entries under '{}', expected {expected_entries} under '{root_name}'",
            archive_path.display(),
            summary.entries,
            summary.root_name
        )));
    }
    Ok(summary)
}

fn drain_entry(_: &PlannedEntry, entry: &mut PackageEntry<'_>) -> Result<(), SkillError> {
    std::io::copy(entry, &mut std::io::sink())
        .map(|_| ())
        .map_err(|err| SkillError::Internal(anyhow!("failed reading archive entry: {err}")))
}
