use skillpack_core::SkillError;
use tracing::{info, warn};

use crate::context::{locate_installed_skill, OperationContext};
use crate::fs_utils::{measure_tree, remove_skill_tree};
use crate::lock::{LockOperation, SkillLock};
use crate::preflight::scan_before_removal;
use crate::types::{
    UninstallFailure, UninstallOutcome, UninstallPreview, UninstallRequest, UninstallResult,
};

/// Removes an installed skill. There is no backup: every entry is gated
/// individually, and anything that cannot be removed is reported as a
/// [`SkillError::PartialFailure`] with exact counts.
pub fn uninstall_skill(
    ctx: &OperationContext<'_>,
    request: &UninstallRequest,
) -> Result<UninstallOutcome, SkillError> {
    let skill_path = locate_installed_skill(ctx, &request.name, request.scope)?;
    let _lock = SkillLock::acquire(&skill_path, LockOperation::Uninstall, None)?;

    let findings = scan_before_removal(&skill_path, ctx.config.max_file_size_bytes)?;
    if request.options.dry_run {
        let (entries, bytes) = measure_tree(&skill_path)?;
        return Ok(UninstallOutcome::DryRun(UninstallPreview {
            name: request.name.clone(),
            path: skill_path,
            entries,
            bytes,
            findings,
        }));
    }
    if !findings.is_empty() && !request.options.force {
        info!(
            skill = %request.name,
            findings = findings.len(),
            "uninstall needs confirmation"
        );
        return Ok(UninstallOutcome::NeedsConfirmation(UninstallFailure {
            name: request.name.clone(),
            path: skill_path,
            findings,
        }));
    }
    for finding in &findings {
        warn!(skill = %request.name, finding = %finding.message(), "removing despite finding");
    }
    if ctx.is_cancelled() {
        return Err(SkillError::Cancelled);
    }

    info!(skill = %request.name, path = %skill_path.display(), "removing skill");
    let report = remove_skill_tree(&skill_path, ctx.cancel_token());
    if !report.is_complete() {
        return Err(SkillError::PartialFailure {
            path: skill_path,
            removed: report.removed,
            failed: report.failed,
            total: report.total,
            interrupted: report.interrupted,
            errors: report.errors,
        });
    }

    Ok(UninstallOutcome::Removed(UninstallResult {
        name: request.name.clone(),
        path: skill_path,
        report,
        overridden: findings,
    }))
}
