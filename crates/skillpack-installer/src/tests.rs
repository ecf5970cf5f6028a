use super::*;

use std::cell::Cell;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use flate2::write::GzEncoder;
use flate2::Compression;
use skillpack_core::{exit_code, Scope, SecurityViolation, SkillError, SkillName};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_dir(label: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "skillpack-installer-tests-{label}-{}-{nanos}-{sequence}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("must create test dir");
    dir
}

struct Fixture {
    root: PathBuf,
    layout: ScopeLayout,
    config: SkillpackConfig,
}

impl Fixture {
    fn new(label: &str) -> Self {
        let root = test_dir(label);
        let layout = ScopeLayout::from_dirs(&root.join("project"), &root.join("home"));
        fs::create_dir_all(layout.scope_root(Scope::Project)).expect("must create project scope");
        fs::create_dir_all(layout.scope_root(Scope::Personal)).expect("must create personal scope");
        Self {
            root,
            layout,
            config: SkillpackConfig::default(),
        }
    }

    fn ctx(&self) -> OperationContext<'_> {
        OperationContext::new(&self.layout, &self.config)
    }

    fn skill_path(&self, name: &str) -> PathBuf {
        self.layout.scope_root(Scope::Project).join(name)
    }

    fn install_tree(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = self.skill_path(name);
        write_tree(&dir, files);
        dir
    }

    /// Packs `files` under the top-level directory `root_name`.
    fn package(&self, label: &str, root_name: &str, files: &[(&str, &str)]) -> PathBuf {
        let source = self.root.join("sources").join(label);
        write_tree(&source, files);
        let archive = self.root.join("packages").join(format!("{label}.tar.gz"));
        pack_skill_dir(&source, root_name, &archive).expect("must pack package");
        archive
    }

    fn backups(&self) -> Vec<PathBuf> {
        match fs::read_dir(self.layout.backups_dir()) {
            Ok(entries) => entries
                .map(|entry| entry.expect("backup entry").path())
                .filter(|path| path.extension() == Some(OsStr::new(BACKUP_EXTENSION)))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn skill_md(name: &str, description: Option<&str>) -> String {
    match description {
        Some(description) => {
            format!("---\nname: {name}\ndescription: {description}\n---\n# {name}\n")
        }
        None => format!("---\nname: {name}\n---\n# {name}\n"),
    }
}

fn write_tree(dir: &Path, files: &[(&str, &str)]) {
    fs::create_dir_all(dir).expect("must create tree root");
    for (relative, contents) in files {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("must create parent");
        }
        fs::write(&path, contents).expect("must write file");
    }
}

fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .map(|entry| {
            let entry = entry.expect("walk entry");
            let relative = entry
                .path()
                .strip_prefix(dir)
                .expect("relative path")
                .to_path_buf();
            let contents = entry
                .file_type()
                .is_file()
                .then(|| fs::read(entry.path()).expect("read file"));
            (relative, contents)
        })
        .collect()
}

fn name(raw: &str) -> SkillName {
    SkillName::parse(raw).expect("valid skill name")
}

fn update_request(skill: &str, package_path: &Path) -> UpdateRequest {
    UpdateRequest {
        name: name(skill),
        scope: Scope::Project,
        package_path: package_path.to_path_buf(),
        dry_run: false,
        force: false,
        keep_backup: false,
    }
}

fn uninstall_request(skill: &str, options: UninstallOptions) -> UninstallRequest {
    UninstallRequest {
        name: name(skill),
        scope: Scope::Project,
        options,
    }
}

struct RawEntry<'a> {
    path: &'a [u8],
    kind: tar::EntryType,
    data: &'a [u8],
    link: Option<&'a [u8]>,
}

/// Builds a package without the path checks `tar::Header::set_path` applies,
/// so hostile entries can be expressed.
fn raw_package(dir: &Path, label: &str, entries: &[RawEntry<'_>]) -> PathBuf {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for entry in entries {
        let mut header = tar::Header::new_gnu();
        header.as_old_mut().name[..entry.path.len()].copy_from_slice(entry.path);
        if let Some(link) = entry.link {
            header.as_old_mut().linkname[..link.len()].copy_from_slice(link);
        }
        header.set_entry_type(entry.kind);
        header.set_mode(0o644);
        header.set_size(entry.data.len() as u64);
        header.set_cksum();
        builder
            .append(&header, entry.data)
            .expect("must append raw entry");
    }
    let bytes = builder
        .into_inner()
        .expect("must finish tar")
        .finish()
        .expect("must finish gzip");
    let path = dir.join(format!("{label}.tar.gz"));
    let mut file = fs::File::create(&path).expect("must create raw package");
    file.write_all(&bytes).expect("must write raw package");
    path
}

fn regular<'a>(path: &'a str, data: &'a str) -> RawEntry<'a> {
    RawEntry {
        path: path.as_bytes(),
        kind: tar::EntryType::Regular,
        data: data.as_bytes(),
        link: None,
    }
}

fn symlink_entry<'a>(path: &'a str, target: &'a str) -> RawEntry<'a> {
    RawEntry {
        path: path.as_bytes(),
        kind: tar::EntryType::Symlink,
        data: b"",
        link: Some(target.as_bytes()),
    }
}

/// Fails on backup archives only, so an update can get as far as rollback.
struct BackupRefusingExtractor(TarGzExtractor);

impl Extractor for BackupRefusingExtractor {
    fn extract(&self, archive_path: &Path, dest_dir: &Path) -> Result<ExtractSummary, SkillError> {
        if archive_path.extension() == Some(OsStr::new(BACKUP_EXTENSION)) {
            return Err(SkillError::Validation("backup archive is unreadable".to_string()));
        }
        self.0.extract(archive_path, dest_dir)
    }
}

/// Overwrites the caller's package file right after the first extraction,
/// the way a concurrent writer could.
struct PackageSwappingExtractor {
    inner: TarGzExtractor,
    swap: Cell<Option<(PathBuf, PathBuf)>>,
}

impl PackageSwappingExtractor {
    fn new(package: &Path, replacement: &Path) -> Self {
        Self {
            inner: TarGzExtractor::default(),
            swap: Cell::new(Some((replacement.to_path_buf(), package.to_path_buf()))),
        }
    }
}

impl Extractor for PackageSwappingExtractor {
    fn extract(&self, archive_path: &Path, dest_dir: &Path) -> Result<ExtractSummary, SkillError> {
        let summary = self.inner.extract(archive_path, dest_dir)?;
        if let Some((replacement, package)) = self.swap.take() {
            fs::copy(replacement, package).expect("must swap package");
        }
        Ok(summary)
    }
}

/// Refuses any skill that carries a `reject-me` file.
struct MarkerRejectingValidator;

impl ContentValidator for MarkerRejectingValidator {
    fn validate(&self, skill_path: &Path) -> anyhow::Result<ValidationReport> {
        let mut errors = Vec::new();
        if skill_path.join("reject-me").exists() {
            errors.push("marker file present".to_string());
        }
        Ok(ValidationReport::from_errors(errors))
    }
}

/// Reports every skill at one fixed path.
struct FixedDiscovery(PathBuf);

impl SkillDiscovery for FixedDiscovery {
    fn discover(&self, _: &SkillName, _: Scope) -> Result<Discovery, SkillError> {
        Ok(Discovery::Found {
            path: self.0.clone(),
        })
    }
}

#[test]
fn lock_second_acquire_fails_until_release() {
    let fixture = Fixture::new("lock-cycle");
    let skill_path = fixture.install_tree("my-skill", &[]);

    let first = acquire_uninstall_lock(&skill_path, LockOperation::Uninstall, None)
        .expect("first acquire must not error");
    let LockAcquisition::Acquired { lock_path } = first else {
        panic!("first acquire must succeed");
    };
    assert_eq!(lock_path, fixture.layout.scope_root(Scope::Project).join(".my-skill.lock"));
    assert!(has_uninstall_lock(&skill_path));

    let second = acquire_uninstall_lock(&skill_path, LockOperation::Update, None)
        .expect("second acquire must not error");
    match second {
        LockAcquisition::NotAcquired { reason, message } => {
            assert_eq!(reason, LockFailure::AlreadyLocked);
            assert!(message.contains("uninstall"), "message: {message}");
        }
        other => panic!("second acquire must fail, got {other:?}"),
    }

    release_uninstall_lock(&lock_path).expect("release must succeed");
    release_uninstall_lock(&lock_path).expect("second release is a no-op");
    assert!(!has_uninstall_lock(&skill_path));

    let third = acquire_uninstall_lock(&skill_path, LockOperation::Uninstall, None)
        .expect("third acquire must not error");
    assert!(matches!(third, LockAcquisition::Acquired { .. }));
}

#[test]
fn lock_file_records_holder_metadata() {
    let fixture = Fixture::new("lock-metadata");
    let skill_path = fixture.install_tree("my-skill", &[]);
    let package = fixture.root.join("my-skill.tar.gz");

    let lock = SkillLock::acquire(&skill_path, LockOperation::Update, Some(package.as_path()))
        .expect("must acquire lock");
    let raw = fs::read_to_string(lock.path()).expect("must read lock file");
    assert!(raw.contains("\"operationType\""));
    assert!(raw.contains("\"packagePath\""));

    let info = read_lock_info(&skill_path)
        .expect("must read lock info")
        .expect("lock info must exist");
    assert_eq!(info.pid, std::process::id());
    assert_eq!(info.operation_type, "update");
    assert_eq!(info.package_path, Some(package.display().to_string()));

    drop(lock);
    assert!(!has_uninstall_lock(&skill_path));
    assert_eq!(read_lock_info(&skill_path).expect("must read"), None);
}

#[test]
fn skill_lock_reports_concurrency_error_when_held() {
    let fixture = Fixture::new("lock-held");
    let skill_path = fixture.install_tree("my-skill", &[]);

    let held = SkillLock::acquire(&skill_path, LockOperation::Install, None).expect("first lock");
    let err = SkillLock::acquire(&skill_path, LockOperation::Uninstall, None)
        .expect_err("second lock must fail");
    assert!(matches!(err, SkillError::Concurrency { .. }));
    assert_eq!(err.exit_code(), exit_code::LOCKED);

    held.release().expect("release must succeed");
    assert!(SkillLock::acquire(&skill_path, LockOperation::Uninstall, None).is_ok());
}

#[test]
fn config_parses_overrides_and_rejects_unknown_fields() {
    let config = SkillpackConfig::from_toml_str(
        "keep_backups = true\nmax_file_size_bytes = 1024\nbackups_dir = \"/srv/backups\"\n",
    )
    .expect("must parse config");
    assert!(config.keep_backups);
    assert_eq!(config.max_file_size_bytes, 1024);
    assert_eq!(config.backups_dir, Some(PathBuf::from("/srv/backups")));
    assert_eq!(
        config.max_package_bytes,
        SkillpackConfig::default().max_package_bytes
    );

    assert!(SkillpackConfig::from_toml_str("retries = 3\n").is_err());
    assert!(SkillpackConfig::from_toml_str("max_compression_ratio = 0\n").is_err());
}

#[test]
fn config_load_returns_none_for_missing_file() {
    let dir = test_dir("config-missing");
    assert_eq!(
        SkillpackConfig::load(&dir.join("skillpack.toml")).expect("must not error"),
        None
    );
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn layout_places_scopes_and_backups_under_dot_claude() {
    let layout = ScopeLayout::from_dirs(Path::new("/work/repo"), Path::new("/home/dev"));
    assert_eq!(
        layout.scope_root(Scope::Project),
        Path::new("/work/repo/.claude/skills")
    );
    assert_eq!(
        layout.scope_root(Scope::Personal),
        Path::new("/home/dev/.claude/skills")
    );
    assert_eq!(
        layout.skill_dir(Scope::Personal, &name("my-skill")),
        PathBuf::from("/home/dev/.claude/skills/my-skill")
    );
    assert_eq!(
        layout.backup_path(&name("my-skill"), "1700000000-42"),
        PathBuf::from("/home/dev/.claude/skill-backups/my-skill-1700000000-42.skill")
    );
    let relocated = layout.with_backups_dir("/srv/backups");
    assert_eq!(relocated.staging_dir(), PathBuf::from("/srv/backups/.staging"));
}

#[test]
fn discovery_matches_exact_directory_names_only() {
    let fixture = Fixture::new("discovery");
    fixture.install_tree("my-skill", &[]);
    fixture.install_tree("Other-Skill", &[]);
    let discovery = ScopeDiscovery::new(&fixture.layout);

    assert_eq!(
        discovery
            .discover(&name("my-skill"), Scope::Project)
            .expect("must discover"),
        Discovery::Found {
            path: fixture.skill_path("my-skill")
        }
    );
    assert!(matches!(
        discovery
            .discover(&name("missing"), Scope::Project)
            .expect("must not error"),
        Discovery::NotFound { .. }
    ));
    assert!(matches!(
        discovery
            .discover(&name("my-skill"), Scope::Personal)
            .expect("must not error"),
        Discovery::NotFound { .. }
    ));

    let err = discovery
        .discover(&name("other-skill"), Scope::Project)
        .expect_err("case-only match must be refused");
    assert!(matches!(
        err,
        SkillError::Security(SecurityViolation::CaseMismatch { .. })
    ));
}

#[test]
fn skill_md_validator_reports_identity_problems() {
    let fixture = Fixture::new("validator");
    let good = fixture.install_tree(
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("Does things")))],
    );
    assert!(SkillMdValidator.validate(&good).expect("must validate").valid);

    let renamed = fixture.install_tree(
        "renamed",
        &[("SKILL.md", &skill_md("my-skill", None))],
    );
    let report = SkillMdValidator.validate(&renamed).expect("must validate");
    assert!(!report.valid);
    assert_eq!(report.errors.len(), 2);
    assert!(report.summary().contains("does not match directory"));
    assert!(report.summary().contains("description"));

    let empty = fixture.install_tree("empty", &[]);
    let report = SkillMdValidator.validate(&empty).expect("must validate");
    assert_eq!(report.errors, vec!["SKILL.md is missing".to_string()]);
}

#[test]
fn extractor_strips_top_level_directory() {
    let fixture = Fixture::new("extract-ok");
    let package = fixture.package(
        "ok",
        "my-skill",
        &[
            ("SKILL.md", &skill_md("my-skill", Some("ok"))),
            ("scripts/run.sh", "echo hi\n"),
        ],
    );
    let dest = fixture.root.join("out");

    let summary = TarGzExtractor::default()
        .extract(&package, &dest)
        .expect("must extract");
    assert_eq!(summary.root_name, "my-skill");
    assert_eq!(
        fs::read_to_string(dest.join("scripts/run.sh")).expect("must read"),
        "echo hi\n"
    );
    assert!(dest.join("SKILL.md").is_file());
}

#[test]
fn extractor_rejects_traversal_and_absolute_entries_before_writing() {
    let fixture = Fixture::new("extract-traversal");
    let dest = fixture.root.join("out");

    for (label, hostile) in [("dotdot", "my-skill/../evil"), ("absolute", "/my-skill/evil")] {
        let package = raw_package(
            &fixture.root,
            label,
            &[regular("my-skill/SKILL.md", "ok"), regular(hostile, "pwned")],
        );
        let err = TarGzExtractor::default()
            .extract(&package, &dest)
            .expect_err("hostile entry must be rejected");
        assert!(
            matches!(
                err,
                SkillError::Security(SecurityViolation::UnsafeArchiveEntry { .. })
            ),
            "{label}: {err}"
        );
        assert!(!dest.exists(), "{label}: nothing may be written");
    }
}

#[test]
fn extractor_rejects_link_and_device_entries() {
    let fixture = Fixture::new("extract-links");
    let dest = fixture.root.join("out");
    let cases = [
        (
            "hardlink",
            RawEntry {
                path: b"my-skill/copy",
                kind: tar::EntryType::Link,
                data: b"",
                link: Some(b"my-skill/SKILL.md"),
            },
        ),
        (
            "escaping-symlink",
            RawEntry {
                path: b"my-skill/link",
                kind: tar::EntryType::Symlink,
                data: b"",
                link: Some(b"../../outside"),
            },
        ),
        (
            "absolute-symlink",
            RawEntry {
                path: b"my-skill/link",
                kind: tar::EntryType::Symlink,
                data: b"",
                link: Some(b"/etc/passwd"),
            },
        ),
        (
            "fifo",
            RawEntry {
                path: b"my-skill/pipe",
                kind: tar::EntryType::Fifo,
                data: b"",
                link: None,
            },
        ),
    ];

    for (label, entry) in cases {
        let package = raw_package(
            &fixture.root,
            label,
            &[regular("my-skill/SKILL.md", "ok"), entry],
        );
        let err = TarGzExtractor::default()
            .extract(&package, &dest)
            .expect_err("entry must be rejected");
        assert!(err.is_security(), "{label}: {err}");
        assert!(!dest.exists(), "{label}: nothing may be written");
    }
}

#[cfg(unix)]
#[test]
fn extractor_keeps_symlinks_that_stay_inside_the_skill() {
    let fixture = Fixture::new("extract-inner-link");
    let package = raw_package(
        &fixture.root,
        "inner-link",
        &[
            regular("my-skill/SKILL.md", "ok"),
            RawEntry {
                path: b"my-skill/docs/readme",
                kind: tar::EntryType::Symlink,
                data: b"",
                link: Some(b"../SKILL.md"),
            },
        ],
    );
    let dest = fixture.root.join("out");

    TarGzExtractor::default()
        .extract(&package, &dest)
        .expect("internal symlink must be accepted");
    let link = dest.join("docs/readme");
    assert!(fs::symlink_metadata(&link)
        .expect("link must exist")
        .file_type()
        .is_symlink());
    assert_eq!(fs::read_to_string(&link).expect("must follow link"), "ok");
}

#[cfg(unix)]
#[test]
fn extractor_rejects_link_chains_that_resolve_outside() {
    let fixture = Fixture::new("extract-link-chain");
    let outside = fixture.root.join("outside");
    fs::create_dir_all(&outside).expect("must create outside dir");

    let forward = raw_package(
        &fixture.root,
        "chain-forward",
        &[
            regular("my-skill/SKILL.md", "ok"),
            symlink_entry("my-skill/l2", "."),
            symlink_entry("my-skill/l1", "l2/../outside"),
        ],
    );
    let err = TarGzExtractor::default()
        .extract(&forward, &fixture.root.join("out-forward"))
        .expect_err("chained escape must be refused");
    assert!(err.is_security(), "{err}");

    let backward = raw_package(
        &fixture.root,
        "chain-backward",
        &[
            regular("my-skill/SKILL.md", "ok"),
            symlink_entry("my-skill/l1", "l2/../outside"),
            symlink_entry("my-skill/l2", "."),
        ],
    );
    let err = TarGzExtractor::default()
        .extract(&backward, &fixture.root.join("out-backward"))
        .expect_err("escape completed by a later link must be refused");
    assert!(err.is_security(), "{err}");
    assert!(fs::read_dir(&outside)
        .expect("outside dir")
        .next()
        .is_none());
}

#[test]
fn extractor_requires_single_top_level_directory() {
    let fixture = Fixture::new("extract-roots");
    let package = raw_package(
        &fixture.root,
        "two-roots",
        &[regular("one/SKILL.md", "a"), regular("two/SKILL.md", "b")],
    );
    let err = TarGzExtractor::default()
        .extract(&package, &fixture.root.join("out"))
        .expect_err("two roots must be rejected");
    assert!(matches!(err, SkillError::Validation(_)), "{err}");
}

#[test]
fn extractor_enforces_size_and_ratio_limits() {
    let fixture = Fixture::new("extract-limits");
    let dest = fixture.root.join("out");

    let small = raw_package(
        &fixture.root,
        "small",
        &[regular("my-skill/SKILL.md", "twenty bytes of text")],
    );
    let err = TarGzExtractor::new(10, 100)
        .extract(&small, &dest)
        .expect_err("size limit must apply");
    assert!(matches!(
        err,
        SkillError::Security(SecurityViolation::PackageTooLarge { limit: 10 })
    ));

    let zeros = vec![0_u8; 2 * 1024 * 1024];
    let bomb = raw_package(
        &fixture.root,
        "bomb",
        &[RawEntry {
            path: b"my-skill/zeros.bin",
            kind: tar::EntryType::Regular,
            data: &zeros,
            link: None,
        }],
    );
    let err = TarGzExtractor::new(u64::MAX, 10)
        .extract(&bomb, &dest)
        .expect_err("ratio limit must apply");
    assert!(matches!(
        err,
        SkillError::Security(SecurityViolation::CompressionRatio { limit: 10, .. })
    ));
    assert!(!dest.exists());
}

#[test]
fn inspect_package_summarizes_without_writing() {
    let fixture = Fixture::new("inspect");
    let package = fixture.package(
        "inspect",
        "my-skill",
        &[("SKILL.md", "abc"), ("notes.txt", "defg")],
    );
    let summary = inspect_package(&TarGzExtractor::default(), &package).expect("must inspect");
    assert_eq!(summary.root_name, "my-skill");
    assert_eq!(summary.entries, 2);
    assert_eq!(summary.bytes, 7);
}

#[test]
fn compare_versions_lists_added_modified_and_removed_files() {
    let fixture = Fixture::new("compare");
    let old = fixture.root.join("old");
    let new = fixture.root.join("new");
    write_tree(&old, &[("SKILL.md", "v1"), ("keep.txt", "same"), ("gone.txt", "bye")]);
    write_tree(&new, &[("SKILL.md", "v2!"), ("keep.txt", "same"), ("added.txt", "hi")]);

    let comparison = compare_versions(&old, &new).expect("must compare");
    assert_eq!(comparison.files_added, vec![PathBuf::from("added.txt")]);
    assert_eq!(comparison.files_modified, vec![PathBuf::from("SKILL.md")]);
    assert_eq!(comparison.files_removed, vec![PathBuf::from("gone.txt")]);
    assert_eq!(comparison.size_change, 0);
    assert!(!comparison.is_unchanged());
    assert!(compare_versions(&old, &old).expect("must compare").is_unchanged());
}

#[test]
fn scan_before_removal_flags_user_data() {
    let fixture = Fixture::new("preflight");
    let skill_path = fixture.install_tree(
        "my-skill",
        &[
            ("SKILL.md", "ok"),
            (".git/HEAD", "ref: refs/heads/main\n"),
            ("node_modules/left-pad/index.js", "module.exports = 1;\n"),
            ("notes.md~", "draft"),
            ("data.bin", "0123456789abcdef"),
        ],
    );

    let findings = scan_before_removal(&skill_path, 8).expect("must scan");
    let kinds: Vec<_> = findings.iter().map(|finding| finding.kind.clone()).collect();
    assert!(kinds.contains(&RemovalFindingKind::GitRepository));
    assert!(kinds.contains(&RemovalFindingKind::NodeModules));
    assert!(kinds.contains(&RemovalFindingKind::EditorTempFile));
    assert!(kinds.contains(&RemovalFindingKind::OversizedFile { size: 16 }));
    // Nothing inside .git or node_modules is reported separately.
    assert_eq!(findings.len(), 4);
}

#[test]
fn remove_skill_tree_stops_when_cancelled() {
    let fixture = Fixture::new("remove-cancelled");
    let skill_path = fixture.install_tree("my-skill", &[("SKILL.md", "ok")]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = remove_skill_tree(&skill_path, &cancel);
    assert!(report.interrupted);
    assert_eq!(report.removed, 0);
    assert_eq!(report.total, 2);
    assert!(!report.is_complete());
    assert!(skill_path.join("SKILL.md").exists());
}

#[cfg(unix)]
#[test]
fn remove_skill_tree_unlinks_symlinks_without_following() {
    let fixture = Fixture::new("remove-links");
    let outside = fixture.root.join("outside");
    write_tree(&outside, &[("precious.txt", "keep me")]);
    let skill_path = fixture.install_tree("my-skill", &[("SKILL.md", "ok")]);
    std::os::unix::fs::symlink(&outside, skill_path.join("linked-dir")).expect("dir symlink");
    std::os::unix::fs::symlink(outside.join("precious.txt"), skill_path.join("linked-file"))
        .expect("file symlink");

    let report = remove_skill_tree(&skill_path, &CancellationToken::new());
    assert!(report.is_complete(), "{report:?}");
    assert_eq!(report.removed, 4);
    assert!(!skill_path.exists());
    assert_eq!(
        fs::read_to_string(outside.join("precious.txt")).expect("must survive"),
        "keep me"
    );
}

#[test]
fn install_creates_skill_and_refuses_reinstall() {
    let fixture = Fixture::new("install");
    let package = fixture.package(
        "install",
        "my-skill",
        &[
            ("SKILL.md", &skill_md("my-skill", Some("Does things"))),
            ("scripts/run.sh", "echo hi\n"),
        ],
    );
    let request = InstallRequest {
        package_path: package,
        scope: Scope::Project,
        dry_run: false,
    };

    let outcome = install_skill(&fixture.ctx(), &request).expect("must install");
    let InstallOutcome::Installed { name: installed, path, files, .. } = outcome else {
        panic!("expected install");
    };
    assert_eq!(installed.as_str(), "my-skill");
    assert_eq!(path, fixture.skill_path("my-skill"));
    assert_eq!(files, 3);
    assert!(path.join("scripts/run.sh").is_file());
    assert!(!has_uninstall_lock(&path));

    let err = install_skill(&fixture.ctx(), &request).expect_err("reinstall must be refused");
    assert!(matches!(err, SkillError::Validation(ref message) if message.contains("already installed")));
}

#[test]
fn install_dry_run_writes_nothing() {
    let fixture = Fixture::new("install-dry");
    let package = fixture.package(
        "dry",
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("Does things")))],
    );
    let outcome = install_skill(
        &fixture.ctx(),
        &InstallRequest {
            package_path: package,
            scope: Scope::Project,
            dry_run: true,
        },
    )
    .expect("dry run must succeed");
    assert!(matches!(outcome, InstallOutcome::DryRun { .. }));
    assert!(!fixture.skill_path("my-skill").exists());
}

#[test]
fn install_rejects_unsafe_and_mismatched_packages() {
    let fixture = Fixture::new("install-reject");

    let traversal = fixture.package(
        "traversal",
        "bad..name",
        &[("SKILL.md", &skill_md("bad..name", Some("x")))],
    );
    let err = install_skill(
        &fixture.ctx(),
        &InstallRequest {
            package_path: traversal,
            scope: Scope::Project,
            dry_run: false,
        },
    )
    .expect_err("unsafe root name must be refused");
    assert!(err.is_security(), "{err}");

    let mismatched = fixture.package(
        "mismatched",
        "my-skill",
        &[("SKILL.md", &skill_md("other-skill", Some("x")))],
    );
    let err = install_skill(
        &fixture.ctx(),
        &InstallRequest {
            package_path: mismatched,
            scope: Scope::Project,
            dry_run: false,
        },
    )
    .expect_err("mismatched manifest must be refused");
    assert!(matches!(err, SkillError::Validation(ref message) if message.contains("package-mismatch")));
    assert!(!fixture.skill_path("my-skill").exists());
}

#[test]
fn install_removes_partial_skill_when_validation_fails() {
    let fixture = Fixture::new("install-cleanup");
    let package = fixture.package(
        "no-description",
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", None))],
    );
    let err = install_skill(
        &fixture.ctx(),
        &InstallRequest {
            package_path: package,
            scope: Scope::Project,
            dry_run: false,
        },
    )
    .expect_err("invalid skill must not be installed");
    assert!(matches!(err, SkillError::Validation(_)), "{err}");
    assert!(!fixture.skill_path("my-skill").exists());
    assert!(!has_uninstall_lock(&fixture.skill_path("my-skill")));
}

#[test]
fn install_applies_the_package_it_validated() {
    let fixture = Fixture::new("install-swap");
    let package = fixture.package(
        "v1",
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("v1")))],
    );
    let replacement = fixture.package(
        "swapped",
        "my-skill",
        &[
            ("SKILL.md", &skill_md("my-skill", Some("swapped"))),
            ("payload.sh", "echo swapped\n"),
        ],
    );
    let ctx = fixture
        .ctx()
        .with_extractor(PackageSwappingExtractor::new(&package, &replacement));

    install_skill(
        &ctx,
        &InstallRequest {
            package_path: package,
            scope: Scope::Project,
            dry_run: false,
        },
    )
    .expect("must install");
    let skill_path = fixture.skill_path("my-skill");
    let manifest = fs::read_to_string(skill_path.join("SKILL.md")).expect("manifest");
    assert!(manifest.contains("description: v1"));
    assert!(!skill_path.join("payload.sh").exists());
}

#[test]
fn install_refuses_skill_reported_by_custom_discovery() {
    let fixture = Fixture::new("install-custom-discovery");
    let package = fixture.package(
        "v1",
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("v1")))],
    );
    let ctx = fixture
        .ctx()
        .with_discovery(FixedDiscovery(fixture.root.join("elsewhere/my-skill")));

    let err = install_skill(
        &ctx,
        &InstallRequest {
            package_path: package,
            scope: Scope::Project,
            dry_run: false,
        },
    )
    .expect_err("a discovered skill must not be overwritten");
    assert!(matches!(err, SkillError::Validation(ref message) if message.contains("already installed")));
    assert!(!fixture.skill_path("my-skill").exists());
}

#[test]
fn update_replaces_content_and_discards_backup() {
    let fixture = Fixture::new("update-ok");
    let skill_path = fixture.install_tree(
        "my-skill",
        &[
            ("SKILL.md", &skill_md("my-skill", Some("v1"))),
            ("old.txt", "old"),
        ],
    );
    let package = fixture.package(
        "v2",
        "my-skill",
        &[
            ("SKILL.md", &skill_md("my-skill", Some("v2"))),
            ("new.txt", "new"),
        ],
    );

    let outcome = update_skill(&fixture.ctx(), &update_request("my-skill", &package))
        .expect("update must succeed");
    let UpdateOutcome::Success(success) = &outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert_eq!(outcome.exit_code(), exit_code::SUCCESS);
    assert_eq!(success.comparison.files_added, vec![PathBuf::from("new.txt")]);
    assert_eq!(success.comparison.files_removed, vec![PathBuf::from("old.txt")]);
    assert_eq!(success.backup_path, None);

    assert!(!skill_path.join("old.txt").exists());
    assert_eq!(
        fs::read_to_string(skill_path.join("new.txt")).expect("must read"),
        "new"
    );
    assert!(fixture.backups().is_empty());
    assert!(!has_uninstall_lock(&skill_path));
}

#[test]
fn update_keeps_backup_when_asked() {
    let fixture = Fixture::new("update-keep");
    fixture.install_tree("my-skill", &[("SKILL.md", &skill_md("my-skill", Some("v1")))]);
    let package = fixture.package(
        "v2",
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("v2")))],
    );
    let mut request = update_request("my-skill", &package);
    request.keep_backup = true;

    let outcome = update_skill(&fixture.ctx(), &request).expect("update must succeed");
    let UpdateOutcome::Success(success) = outcome else {
        panic!("expected success");
    };
    let backup = success.backup_path.expect("backup must be kept");
    assert_eq!(fixture.backups(), vec![backup.clone()]);

    let summary = inspect_package(&TarGzExtractor::default(), &backup).expect("backup must be a package");
    assert_eq!(summary.root_name, "my-skill");
}

#[test]
fn update_dry_run_leaves_skill_untouched() {
    let fixture = Fixture::new("update-dry");
    let skill_path = fixture.install_tree(
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("v1"))), ("a.txt", "a")],
    );
    let before = snapshot(&skill_path);
    let package = fixture.package(
        "v2",
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("v2"))), ("a.txt", "a")],
    );
    let mut request = update_request("my-skill", &package);
    request.dry_run = true;

    let outcome = update_skill(&fixture.ctx(), &request).expect("dry run must succeed");
    let UpdateOutcome::DryRun(preview) = outcome else {
        panic!("expected dry run");
    };
    assert_eq!(preview.comparison.files_modified, vec![PathBuf::from("SKILL.md")]);
    assert_eq!(snapshot(&skill_path), before);
    assert!(fixture.backups().is_empty());
}

#[test]
fn update_refuses_package_for_another_skill() {
    let fixture = Fixture::new("update-mismatch");
    let skill_path = fixture.install_tree(
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("v1")))],
    );
    let before = snapshot(&skill_path);
    let package = fixture.package(
        "other",
        "other-skill",
        &[("SKILL.md", &skill_md("other-skill", Some("v2")))],
    );

    let err = update_skill(&fixture.ctx(), &update_request("my-skill", &package))
        .expect_err("mismatched package must be refused");
    assert!(matches!(err, SkillError::Validation(ref message) if message.contains("package-mismatch")));
    assert_eq!(err.exit_code(), exit_code::VALIDATION_FAILURE);
    assert_eq!(snapshot(&skill_path), before);
    assert!(!has_uninstall_lock(&skill_path));
}

#[test]
fn update_rolls_back_when_new_version_fails_validation() {
    let fixture = Fixture::new("update-rollback");
    let skill_path = fixture.install_tree(
        "my-skill",
        &[
            ("SKILL.md", &skill_md("my-skill", Some("v1"))),
            ("scripts/run.sh", "echo v1\n"),
            ("docs/guide.md", "guide"),
        ],
    );
    let before = snapshot(&skill_path);
    let package = fixture.package(
        "broken",
        "my-skill",
        &[
            ("SKILL.md", &skill_md("my-skill", None)),
            ("scripts/run.sh", "echo v2\n"),
        ],
    );

    let outcome = update_skill(&fixture.ctx(), &update_request("my-skill", &package))
        .expect("rollback is an outcome, not an error");
    assert_eq!(outcome.exit_code(), exit_code::ROLLED_BACK);
    let UpdateOutcome::RolledBack(rolled_back) = outcome else {
        panic!("expected rollback");
    };
    assert_eq!(rolled_back.failed_state, UpdateState::ValidatingUpdated);
    assert!(rolled_back.failure_reason.contains("description"));

    assert_eq!(snapshot(&skill_path), before);
    assert!(fixture.backups().is_empty());
    assert!(!has_uninstall_lock(&skill_path));
}

#[test]
fn update_reports_rollback_failure_with_recovery_steps() {
    let fixture = Fixture::new("update-rollback-failed");
    let skill_path = fixture.install_tree(
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("v1")))],
    );
    let package = fixture.package(
        "broken",
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", None))],
    );
    let ctx = fixture
        .ctx()
        .with_extractor(BackupRefusingExtractor(TarGzExtractor::default()));

    let outcome = update_skill(&ctx, &update_request("my-skill", &package))
        .expect("rollback failure is an outcome, not an error");
    assert_eq!(outcome.exit_code(), exit_code::CRITICAL);
    let UpdateOutcome::RollbackFailed(failed) = outcome else {
        panic!("expected rollback failure");
    };
    assert!(failed.backup_path.is_file());
    assert!(failed.rollback_error.contains("unreadable"));
    assert!(!failed.recovery_instructions.is_empty());
    assert!(failed
        .recovery_instructions
        .iter()
        .any(|step| step.contains(&failed.backup_path.display().to_string())));
    assert!(!has_uninstall_lock(&skill_path));
}

#[cfg(unix)]
#[test]
fn update_rollback_restores_links_that_leave_the_skill() {
    let fixture = Fixture::new("update-rollback-link");
    fixture.install_tree(
        "other-skill",
        &[("SKILL.md", &skill_md("other-skill", Some("shared")))],
    );
    let skill_path = fixture.install_tree(
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("v1")))],
    );
    std::os::unix::fs::symlink("../other-skill", skill_path.join("shared"))
        .expect("must link sibling skill");
    let before = snapshot(&skill_path);
    let package = fixture.package(
        "broken",
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", None))],
    );

    let outcome = update_skill(&fixture.ctx(), &update_request("my-skill", &package))
        .expect("rollback is an outcome, not an error");
    let UpdateOutcome::RolledBack(rolled_back) = outcome else {
        panic!("expected rollback");
    };
    assert_eq!(rolled_back.failed_state, UpdateState::ValidatingUpdated);
    assert_eq!(snapshot(&skill_path), before);
    assert_eq!(
        fs::read_link(skill_path.join("shared")).expect("link restored"),
        PathBuf::from("../other-skill")
    );
}

#[test]
fn update_rollback_restores_highly_compressible_files() {
    let fixture = Fixture::new("update-rollback-ratio");
    let data = "a".repeat(2 * 1024 * 1024);
    let skill_path = fixture.install_tree(
        "my-skill",
        &[
            ("SKILL.md", &skill_md("my-skill", Some("v1"))),
            ("data.txt", &data),
        ],
    );
    let before = snapshot(&skill_path);
    let package = fixture.package(
        "broken",
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", None))],
    );

    let outcome = update_skill(&fixture.ctx(), &update_request("my-skill", &package))
        .expect("rollback is an outcome, not an error");
    assert_eq!(outcome.exit_code(), exit_code::ROLLED_BACK);
    assert_eq!(snapshot(&skill_path), before);
    assert_eq!(
        fs::read_to_string(skill_path.join("data.txt")).expect("data restored"),
        data
    );
}

#[test]
fn verify_backup_checks_root_and_entry_count() {
    let fixture = Fixture::new("verify-backup");
    let skill_path = fixture.install_tree(
        "my-skill",
        &[
            ("SKILL.md", &skill_md("my-skill", Some("v1"))),
            ("docs/guide.md", &"b".repeat(512 * 1024)),
        ],
    );
    let backup = fixture.root.join("my-skill.skill");
    pack_skill_dir(&skill_path, "my-skill", &backup).expect("must pack");

    let summary = verify_backup(&backup, "my-skill", 3).expect("backup must verify");
    assert_eq!(summary.entries, 3);
    let err = verify_backup(&backup, "my-skill", 4).expect_err("missing entry must be noticed");
    assert!(matches!(err, SkillError::Validation(_)), "{err}");
    let err = verify_backup(&backup, "other-skill", 3).expect_err("wrong root must be noticed");
    assert!(matches!(err, SkillError::Validation(_)), "{err}");
}

#[test]
fn update_applies_the_package_it_validated() {
    let fixture = Fixture::new("update-swap");
    let skill_path = fixture.install_tree(
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("v1")))],
    );
    let package = fixture.package(
        "v2",
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("v2")))],
    );
    let replacement = fixture.package(
        "swapped",
        "my-skill",
        &[
            ("SKILL.md", &skill_md("my-skill", Some("swapped"))),
            ("payload.sh", "echo swapped\n"),
        ],
    );
    let ctx = fixture
        .ctx()
        .with_extractor(PackageSwappingExtractor::new(&package, &replacement));

    let outcome = update_skill(&ctx, &update_request("my-skill", &package)).expect("must update");
    assert!(matches!(outcome, UpdateOutcome::Success(_)), "{outcome:?}");
    let manifest = fs::read_to_string(skill_path.join("SKILL.md")).expect("manifest");
    assert!(manifest.contains("description: v2"));
    assert!(!skill_path.join("payload.sh").exists());
}

#[test]
fn update_rolls_back_when_custom_validator_rejects_new_version() {
    let fixture = Fixture::new("update-custom-validator");
    let skill_path = fixture.install_tree(
        "my-skill",
        &[
            ("SKILL.md", &skill_md("my-skill", Some("v1"))),
            ("notes.md", "v1 notes"),
        ],
    );
    let before = snapshot(&skill_path);
    let package = fixture.package(
        "marked",
        "my-skill",
        &[
            ("SKILL.md", &skill_md("my-skill", Some("v2"))),
            ("reject-me", ""),
        ],
    );
    let ctx = fixture.ctx().with_validator(MarkerRejectingValidator);

    let outcome = update_skill(&ctx, &update_request("my-skill", &package))
        .expect("rollback is an outcome, not an error");
    let UpdateOutcome::RolledBack(rolled_back) = outcome else {
        panic!("expected rollback");
    };
    assert_eq!(rolled_back.failed_state, UpdateState::ValidatingUpdated);
    assert!(rolled_back.failure_reason.contains("marker file present"));
    assert_eq!(snapshot(&skill_path), before);
}

#[test]
fn update_refuses_discovered_path_outside_scope_root() {
    let fixture = Fixture::new("update-custom-discovery");
    let elsewhere = fixture.root.join("elsewhere").join("my-skill");
    write_tree(&elsewhere, &[("SKILL.md", &skill_md("my-skill", Some("v1")))]);
    let before = snapshot(&elsewhere);
    let package = fixture.package(
        "v2",
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("v2")))],
    );
    let ctx = fixture
        .ctx()
        .with_discovery(FixedDiscovery(elsewhere.clone()));

    let err = update_skill(&ctx, &update_request("my-skill", &package))
        .expect_err("skill outside the scope root must be refused");
    assert!(err.is_security(), "{err}");
    assert_eq!(snapshot(&elsewhere), before);
    assert!(fixture.backups().is_empty());
}

#[test]
fn update_fails_fast_for_missing_or_locked_skills() {
    let fixture = Fixture::new("update-guards");
    let package = fixture.package(
        "v2",
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("v2")))],
    );

    let err = update_skill(&fixture.ctx(), &update_request("my-skill", &package))
        .expect_err("missing skill must be reported");
    assert_eq!(err.exit_code(), exit_code::NOT_FOUND);

    let skill_path = fixture.install_tree(
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("v1")))],
    );
    let _held = SkillLock::acquire(&skill_path, LockOperation::Uninstall, None).expect("lock");
    let err = update_skill(&fixture.ctx(), &update_request("my-skill", &package))
        .expect_err("locked skill must be refused");
    assert_eq!(err.exit_code(), exit_code::LOCKED);
}

#[test]
fn update_cancelled_before_backup_changes_nothing() {
    let fixture = Fixture::new("update-cancel");
    let skill_path = fixture.install_tree(
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("v1")))],
    );
    let before = snapshot(&skill_path);
    let package = fixture.package(
        "v2",
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("v2")))],
    );
    let cancel = CancellationToken::new();
    cancel.cancel();
    let ctx = fixture.ctx().with_cancellation(cancel);

    let err = update_skill(&ctx, &update_request("my-skill", &package))
        .expect_err("cancelled update must stop");
    assert!(matches!(err, SkillError::Cancelled));
    assert_eq!(snapshot(&skill_path), before);
    assert!(fixture.backups().is_empty());
}

#[cfg(unix)]
#[test]
fn update_requires_force_for_hard_linked_files() {
    let fixture = Fixture::new("update-hardlink");
    let skill_path = fixture.install_tree(
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("v1"))), ("data.txt", "shared")],
    );
    fs::hard_link(skill_path.join("data.txt"), fixture.root.join("elsewhere.txt"))
        .expect("hard link");
    let package = fixture.package(
        "v2",
        "my-skill",
        &[("SKILL.md", &skill_md("my-skill", Some("v2")))],
    );

    let err = update_skill(&fixture.ctx(), &update_request("my-skill", &package))
        .expect_err("hard links must need force");
    assert!(matches!(err, SkillError::Validation(ref message) if message.contains("hard links")));

    let mut request = update_request("my-skill", &package);
    request.force = true;
    let outcome = update_skill(&fixture.ctx(), &request).expect("forced update");
    assert!(matches!(outcome, UpdateOutcome::Success(_)));
    assert_eq!(
        fs::read_to_string(fixture.root.join("elsewhere.txt")).expect("must survive"),
        "shared"
    );
}

#[test]
fn uninstall_removes_skill_and_releases_lock() {
    let fixture = Fixture::new("uninstall");
    let skill_path = fixture.install_tree(
        "my-skill",
        &[("SKILL.md", "ok"), ("scripts/run.sh", "echo hi\n")],
    );

    let outcome = uninstall_skill(
        &fixture.ctx(),
        &uninstall_request("my-skill", UninstallOptions::default()),
    )
    .expect("uninstall must succeed");
    let UninstallOutcome::Removed(result) = outcome else {
        panic!("expected removal");
    };
    assert_eq!(result.report.files_removed, 2);
    assert_eq!(result.report.directories_removed, 2);
    assert!(result.report.is_complete());
    assert!(!skill_path.exists());
    assert!(!has_uninstall_lock(&skill_path));
    assert!(fixture.layout.scope_root(Scope::Project).is_dir());
}

#[test]
fn uninstall_asks_for_confirmation_before_removing_user_data() {
    let fixture = Fixture::new("uninstall-confirm");
    let skill_path = fixture.install_tree(
        "my-skill",
        &[("SKILL.md", "ok"), (".git/HEAD", "ref: refs/heads/main\n")],
    );

    let outcome = uninstall_skill(
        &fixture.ctx(),
        &uninstall_request("my-skill", UninstallOptions::default()),
    )
    .expect("scan must succeed");
    assert_eq!(outcome.exit_code(), exit_code::GENERAL_FAILURE);
    let UninstallOutcome::NeedsConfirmation(failure) = outcome else {
        panic!("expected confirmation request");
    };
    assert_eq!(failure.findings.len(), 1);
    assert!(skill_path.join(".git/HEAD").exists());

    let outcome = uninstall_skill(
        &fixture.ctx(),
        &uninstall_request(
            "my-skill",
            UninstallOptions {
                force: true,
                dry_run: false,
            },
        ),
    )
    .expect("forced uninstall must succeed");
    let UninstallOutcome::Removed(result) = outcome else {
        panic!("expected removal");
    };
    assert_eq!(result.overridden.len(), 1);
    assert!(!skill_path.exists());
}

#[test]
fn uninstall_dry_run_measures_tree() {
    let fixture = Fixture::new("uninstall-dry");
    let skill_path = fixture.install_tree("my-skill", &[("SKILL.md", "12345"), ("b.txt", "678")]);

    let outcome = uninstall_skill(
        &fixture.ctx(),
        &uninstall_request(
            "my-skill",
            UninstallOptions {
                force: false,
                dry_run: true,
            },
        ),
    )
    .expect("dry run must succeed");
    let UninstallOutcome::DryRun(preview) = outcome else {
        panic!("expected dry run");
    };
    assert_eq!(preview.entries, 3);
    assert_eq!(preview.bytes, 8);
    assert!(skill_path.join("b.txt").exists());
}

#[test]
fn uninstall_refuses_scope_roots_outside_dot_claude_skills() {
    let dir = test_dir("uninstall-scope");
    let layout = ScopeLayout::new(dir.join("skills"), dir.join("personal"), dir.join("backups"));
    write_tree(&dir.join("skills/my-skill"), &[("SKILL.md", "ok")]);
    let config = SkillpackConfig::default();

    let err = uninstall_skill(
        &OperationContext::new(&layout, &config),
        &uninstall_request("my-skill", UninstallOptions::default()),
    )
    .expect_err("arbitrary roots must be refused");
    assert!(matches!(
        err,
        SkillError::Security(SecurityViolation::InvalidScopePath { .. })
    ));
    assert_eq!(err.exit_code(), exit_code::SECURITY_VIOLATION);
    assert!(dir.join("skills/my-skill/SKILL.md").exists());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn uninstall_cancelled_before_removal_changes_nothing() {
    let fixture = Fixture::new("uninstall-cancel");
    let skill_path = fixture.install_tree("my-skill", &[("SKILL.md", "ok")]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = uninstall_skill(
        &fixture.ctx().with_cancellation(cancel),
        &uninstall_request("my-skill", UninstallOptions::default()),
    )
    .expect_err("cancelled uninstall must stop");
    assert!(matches!(err, SkillError::Cancelled));
    assert!(skill_path.join("SKILL.md").exists());
    assert!(!has_uninstall_lock(&skill_path));
}

#[cfg(unix)]
#[test]
fn uninstall_refuses_skill_directory_that_is_an_escaping_symlink() {
    let fixture = Fixture::new("uninstall-symlink-root");
    let outside = fixture.root.join("outside");
    write_tree(&outside, &[("SKILL.md", "ok")]);
    std::os::unix::fs::symlink(&outside, fixture.skill_path("my-skill")).expect("symlink");

    let err = uninstall_skill(
        &fixture.ctx(),
        &uninstall_request(
            "my-skill",
            UninstallOptions {
                force: true,
                dry_run: false,
            },
        ),
    )
    .expect_err("symlinked skill dir must be refused");
    assert!(matches!(
        err,
        SkillError::Security(SecurityViolation::SymlinkEscape { .. })
    ));
    assert!(outside.join("SKILL.md").exists());
}
