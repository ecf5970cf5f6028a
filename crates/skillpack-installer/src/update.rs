use anyhow::Context;
use skillpack_core::{SkillError, SkillName};
use skillpack_security::check_hard_links;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::archive::{pack_skill_dir, verify_backup};
use crate::compare::{compare_versions, VersionComparison};
use crate::context::{locate_installed_skill, OperationContext};
use crate::fs_utils::{current_unix_timestamp, measure_tree, remove_skill_tree, StagingDir};
use crate::lock::{lock_path_for, LockOperation, SkillLock};
use crate::types::{
    UpdateDryRunPreview, UpdateOutcome, UpdateRequest, UpdateRollbackFailed, UpdateRolledBack,
    UpdateState, UpdateSuccess,
};
use crate::validation::check_package_identity;

/// State of one `update_skill` call. Owned by the call and dropped with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSession {
    pub skill_name: SkillName,
    pub installed_path: PathBuf,
    pub package_path: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub comparison: Option<VersionComparison>,
    pub state: UpdateState,
}

impl UpdateSession {
    fn new(request: &UpdateRequest) -> Self {
        Self {
            skill_name: request.name.clone(),
            installed_path: PathBuf::new(),
            package_path: request.package_path.clone(),
            backup_path: None,
            comparison: None,
            state: UpdateState::Locating,
        }
    }

    fn transition(&mut self, next: UpdateState) {
        info!(
            skill = %self.skill_name,
            from = self.state.as_str(),
            to = next.as_str(),
            "update state"
        );
        self.state = next;
    }
}

/// Replaces an installed skill with the contents of a package.
///
/// Everything up to the backup is read-only and fails with an error. Once
/// the old tree starts being removed, every failure is answered by restoring
/// the backup, and the result is reported as
/// [`UpdateOutcome::RolledBack`] or, if the restore fails as well,
/// [`UpdateOutcome::RollbackFailed`].
pub fn update_skill(
    ctx: &OperationContext<'_>,
    request: &UpdateRequest,
) -> Result<UpdateOutcome, SkillError> {
    let mut session = UpdateSession::new(request);

    let skill_path = locate_installed_skill(ctx, &request.name, request.scope)?;
    session.installed_path = skill_path.clone();
    let _lock = SkillLock::acquire(
        &skill_path,
        LockOperation::Update,
        Some(request.package_path.as_path()),
    )?;

    session.transition(UpdateState::ValidatingPackage);
    ctx.layout.ensure_base_dirs()?;
    let staging = StagingDir::create(&ctx.layout.staging_dir())?;
    let package = staging.snapshot_package(&request.package_path)?;
    let staged_root = staging.path().join(request.name.as_str());
    let summary = ctx.extractor().extract(&package, &staged_root)?;
    check_package_identity(&staged_root, &summary, &request.name)?;
    let baseline_valid = ctx.validator().validate(&skill_path)?.valid;

    session.transition(UpdateState::Comparing);
    let comparison = compare_versions(&skill_path, &staged_root)?;
    session.comparison = Some(comparison.clone());
    let hard_links = check_hard_links(&skill_path)?;

    if request.dry_run {
        return Ok(UpdateOutcome::DryRun(UpdateDryRunPreview {
            name: request.name.clone(),
            path: skill_path,
            comparison,
            hard_link_files: hard_links.len(),
        }));
    }
    if !hard_links.is_empty() && !request.force {
        return Err(SkillError::Validation(format!(
            "{} file(s) in {} have additional hard links; rerun with --force to replace them",
            hard_links.len(),
            skill_path.display()
        )));
    }
    if ctx.is_cancelled() {
        return Err(SkillError::Cancelled);
    }

    session.transition(UpdateState::CreatingBackup);
    let stamp = format!("{}-{}", current_unix_timestamp()?, std::process::id());
    let backup_path = ctx.layout.backup_path(&request.name, &stamp);
    pack_skill_dir(&skill_path, request.name.as_str(), &backup_path).with_context(|| {
        format!(
            "failed to back up {}; nothing was changed",
            skill_path.display()
        )
    })?;
    let (installed_entries, _) = measure_tree(&skill_path)?;
    if let Err(err) = verify_backup(
        &backup_path,
        request.name.as_str(),
        installed_entries.saturating_sub(1),
    ) {
        let _ = fs::remove_file(&backup_path);
        return Err(SkillError::Validation(format!(
            "backup of {} cannot be restored ({err}); nothing was changed",
            skill_path.display()
        )));
    }
    info!(backup = %backup_path.display(), "backup created");
    session.backup_path = Some(backup_path.clone());

    let keep_backup = request.keep_backup || ctx.config.keep_backups;
    match apply_update(ctx, &mut session, &skill_path, &package) {
        Ok(()) => {
            session.transition(UpdateState::Complete);
            let kept = finish_backup(&backup_path, keep_backup);
            Ok(UpdateOutcome::Success(UpdateSuccess {
                name: request.name.clone(),
                path: skill_path,
                comparison,
                backup_path: kept,
            }))
        }
        Err(failure_reason) => {
            let failed_state = session.state;
            warn!(
                skill = %request.name,
                state = failed_state.as_str(),
                reason = %failure_reason,
                "update failed, rolling back"
            );
            session.transition(UpdateState::RollingBack);
            match restore_backup(ctx, &skill_path, &backup_path, baseline_valid) {
                Ok(()) => {
                    session.transition(UpdateState::RolledBack);
                    let kept = finish_backup(&backup_path, keep_backup);
                    Ok(UpdateOutcome::RolledBack(UpdateRolledBack {
                        name: request.name.clone(),
                        path: skill_path,
                        failed_state,
                        failure_reason,
                        backup_path: kept,
                    }))
                }
                Err(rollback_error) => {
                    session.transition(UpdateState::RollbackFailed);
                    error!(
                        skill = %request.name,
                        backup = %backup_path.display(),
                        error = %rollback_error,
                        "rollback failed"
                    );
                    let recovery_instructions = recovery_instructions(&skill_path, &backup_path);
                    Ok(UpdateOutcome::RollbackFailed(UpdateRollbackFailed {
                        name: request.name.clone(),
                        path: skill_path,
                        failure_reason,
                        rollback_error,
                        backup_path,
                        recovery_instructions,
                    }))
                }
            }
        }
    }
}

fn apply_update(
    ctx: &OperationContext<'_>,
    session: &mut UpdateSession,
    skill_path: &Path,
    package: &Path,
) -> Result<(), String> {
    session.transition(UpdateState::RemovingOld);
    let report = remove_skill_tree(skill_path, ctx.cancel_token());
    if !report.is_complete() {
        return Err(format!(
            "could not remove the installed version: {}",
            report.describe()
        ));
    }
    if ctx.is_cancelled() {
        return Err("cancelled after removing the installed version".to_string());
    }

    session.transition(UpdateState::ExtractingNew);
    ctx.extractor()
        .extract(package, skill_path)
        .map_err(|err| format!("extracting the new version failed: {err}"))?;
    if ctx.is_cancelled() {
        return Err("cancelled after extracting the new version".to_string());
    }

    session.transition(UpdateState::ValidatingUpdated);
    let report = ctx
        .validator()
        .validate(skill_path)
        .map_err(|err| format!("validating the new version failed: {err:#}"))?;
    if !report.valid {
        return Err(format!(
            "updated skill failed validation: {}",
            report.summary()
        ));
    }
    Ok(())
}

/// Puts the backed-up tree back in place. Runs to completion even when the
/// operation was cancelled.
fn restore_backup(
    ctx: &OperationContext<'_>,
    skill_path: &Path,
    backup_path: &Path,
    baseline_valid: bool,
) -> Result<(), String> {
    if fs::symlink_metadata(skill_path).is_ok() {
        let report = remove_skill_tree(skill_path, &CancellationToken::new());
        if !report.is_complete() {
            return Err(format!(
                "could not clear the failed update: {}",
                report.describe()
            ));
        }
    }

    ctx.extractor()
        .restore(backup_path, skill_path)
        .map_err(|err| format!("restoring {} failed: {err}", backup_path.display()))?;

    let report = ctx
        .validator()
        .validate(skill_path)
        .map_err(|err| format!("validating the restored skill failed: {err:#}"))?;
    if baseline_valid && !report.valid {
        return Err(format!(
            "restored skill failed validation: {}",
            report.summary()
        ));
    }
    Ok(())
}

fn finish_backup(backup_path: &Path, keep: bool) -> Option<PathBuf> {
    if keep {
        return Some(backup_path.to_path_buf());
    }
    match fs::remove_file(backup_path) {
        Ok(()) => None,
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => {
            warn!(backup = %backup_path.display(), error = %err, "failed to delete backup");
            Some(backup_path.to_path_buf())
        }
    }
}

fn recovery_instructions(skill_path: &Path, backup_path: &Path) -> Vec<String> {
    let scope_root = skill_path.parent().unwrap_or(skill_path);
    vec![
        format!(
            "The pre-update skill is preserved in {}; do not delete it.",
            backup_path.display()
        ),
        format!(
            "Move the partially updated directory out of the way: mv {} {}.failed",
            skill_path.display(),
            skill_path.display()
        ),
        format!(
            "Restore the backup: tar -xzf {} -C {}",
            backup_path.display(),
            scope_root.display()
        ),
        format!(
            "If {} still exists and no skillpack process is running, delete it.",
            lock_path_for(skill_path).display()
        ),
        "Rerun the update once the skill validates again.".to_string(),
    ]
}
