use anyhow::Context;
use skillpack_core::{SkillError, SkillName};
use std::fs;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::{check_skill_path, checked_scope_root, OperationContext};
use crate::discovery::Discovery;
use crate::fs_utils::{remove_skill_tree, StagingDir};
use crate::lock::{lock_path_for, LockOperation, SkillLock};
use crate::types::{InstallOutcome, InstallRequest};
use crate::validation::check_package_identity;

/// Installs a package as a new skill. The skill name comes from the
/// package's top-level directory and must agree with its `SKILL.md`. An
/// existing skill of the same name is never touched; use update for that.
pub fn install_skill(
    ctx: &OperationContext<'_>,
    request: &InstallRequest,
) -> Result<InstallOutcome, SkillError> {
    let scope_root = checked_scope_root(ctx.layout, request.scope)?;

    ctx.layout.ensure_base_dirs()?;
    let staging = StagingDir::create(&ctx.layout.staging_dir())?;
    let package = staging.snapshot_package(&request.package_path)?;
    let staged_root = staging.path().join("incoming");
    let summary = ctx.extractor().extract(&package, &staged_root)?;
    let name = SkillName::parse(&summary.root_name)?;
    check_package_identity(&staged_root, &summary, &name)?;

    let skill_path = check_skill_path(&scope_root, &ctx.layout.skill_dir(request.scope, &name))?;
    refuse_existing(ctx, &name, request, &skill_path)?;

    if request.dry_run {
        return Ok(InstallOutcome::DryRun {
            name,
            path: skill_path,
            files: summary.entries,
            bytes: summary.bytes,
        });
    }

    fs::create_dir_all(&scope_root)
        .with_context(|| format!("failed to create {}", scope_root.display()))?;
    let _lock = SkillLock::acquire(
        &skill_path,
        LockOperation::Install,
        Some(request.package_path.as_path()),
    )?;
    // Another process may have installed it between the first check and the lock.
    refuse_existing(ctx, &name, request, &skill_path)?;
    if ctx.is_cancelled() {
        return Err(SkillError::Cancelled);
    }

    info!(skill = %name, path = %skill_path.display(), "installing skill");
    if let Err(err) = extract_and_validate(ctx, &package, &skill_path) {
        warn!(skill = %name, error = %err, "install failed, cleaning up");
        clean_failed_install(&skill_path)?;
        return Err(err);
    }

    Ok(InstallOutcome::Installed {
        name,
        path: skill_path,
        files: summary.entries,
        bytes: summary.bytes,
    })
}

fn refuse_existing(
    ctx: &OperationContext<'_>,
    name: &SkillName,
    request: &InstallRequest,
    skill_path: &Path,
) -> Result<(), SkillError> {
    let discovered = matches!(
        ctx.discovery().discover(name, request.scope)?,
        Discovery::Found { .. }
    );
    if discovered || fs::symlink_metadata(skill_path).is_ok() {
        return Err(SkillError::Validation(format!(
            "skill '{name}' is already installed at {}; use update to replace it",
            skill_path.display()
        )));
    }
    Ok(())
}

fn extract_and_validate(
    ctx: &OperationContext<'_>,
    package_path: &Path,
    skill_path: &Path,
) -> Result<(), SkillError> {
    ctx.extractor().extract(package_path, skill_path)?;
    if ctx.is_cancelled() {
        return Err(SkillError::Cancelled);
    }
    let report = ctx.validator().validate(skill_path)?;
    if !report.valid {
        return Err(SkillError::Validation(format!(
            "installed skill failed validation: {}",
            report.summary()
        )));
    }
    Ok(())
}

/// Removes a half-installed skill. Runs to completion even when the
/// operation was cancelled.
fn clean_failed_install(skill_path: &Path) -> Result<(), SkillError> {
    if fs::symlink_metadata(skill_path).is_err() {
        return Ok(());
    }
    let report = remove_skill_tree(skill_path, &CancellationToken::new());
    if report.is_complete() {
        return Ok(());
    }
    Err(SkillError::Critical {
        message: format!(
            "install failed and the partial skill at {} could not be removed: {}",
            skill_path.display(),
            report.describe()
        ),
        backup_path: None,
        recovery_instructions: vec![
            format!("Inspect and remove {} by hand.", skill_path.display()),
            format!(
                "If {} still exists and no skillpack process is running, delete it.",
                lock_path_for(skill_path).display()
            ),
        ],
    })
}
