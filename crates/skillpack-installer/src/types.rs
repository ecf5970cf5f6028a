use skillpack_core::{exit_code, Scope, SkillName};
use std::path::PathBuf;

use crate::compare::VersionComparison;
use crate::fs_utils::RemovalReport;
use crate::preflight::RemovalFinding;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub name: SkillName,
    pub scope: Scope,
    pub package_path: PathBuf,
    pub dry_run: bool,
    /// Proceed even when the installed tree has hard-linked files.
    pub force: bool,
    pub keep_backup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Locating,
    ValidatingPackage,
    Comparing,
    CreatingBackup,
    RemovingOld,
    ExtractingNew,
    ValidatingUpdated,
    Complete,
    RollingBack,
    RolledBack,
    RollbackFailed,
}

impl UpdateState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Locating => "locating",
            Self::ValidatingPackage => "validating-package",
            Self::Comparing => "comparing",
            Self::CreatingBackup => "creating-backup",
            Self::RemovingOld => "removing-old",
            Self::ExtractingNew => "extracting-new",
            Self::ValidatingUpdated => "validating-updated",
            Self::Complete => "complete",
            Self::RollingBack => "rolling-back",
            Self::RolledBack => "rolled-back",
            Self::RollbackFailed => "rollback-failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSuccess {
    pub name: SkillName,
    pub path: PathBuf,
    pub comparison: VersionComparison,
    /// Present only when the backup was kept.
    pub backup_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDryRunPreview {
    pub name: SkillName,
    pub path: PathBuf,
    pub comparison: VersionComparison,
    pub hard_link_files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRolledBack {
    pub name: SkillName,
    pub path: PathBuf,
    pub failed_state: UpdateState,
    pub failure_reason: String,
    pub backup_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRollbackFailed {
    pub name: SkillName,
    pub path: PathBuf,
    pub failure_reason: String,
    pub rollback_error: String,
    pub backup_path: PathBuf,
    pub recovery_instructions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Success(UpdateSuccess),
    DryRun(UpdateDryRunPreview),
    RolledBack(UpdateRolledBack),
    RollbackFailed(UpdateRollbackFailed),
}

impl UpdateOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Success(_) | Self::DryRun(_) => exit_code::SUCCESS,
            Self::RolledBack(_) => exit_code::ROLLED_BACK,
            Self::RollbackFailed(_) => exit_code::CRITICAL,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UninstallOptions {
    /// Remove even when the pre-removal scan reported findings.
    pub force: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallRequest {
    pub name: SkillName,
    pub scope: Scope,
    pub options: UninstallOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallResult {
    pub name: SkillName,
    pub path: PathBuf,
    pub report: RemovalReport,
    /// Findings that were overridden with `force`.
    pub overridden: Vec<RemovalFinding>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallPreview {
    pub name: SkillName,
    pub path: PathBuf,
    pub entries: usize,
    pub bytes: u64,
    pub findings: Vec<RemovalFinding>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallFailure {
    pub name: SkillName,
    pub path: PathBuf,
    pub findings: Vec<RemovalFinding>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UninstallOutcome {
    Removed(UninstallResult),
    DryRun(UninstallPreview),
    NeedsConfirmation(UninstallFailure),
}

impl UninstallOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Removed(_) | Self::DryRun(_) => exit_code::SUCCESS,
            Self::NeedsConfirmation(_) => exit_code::GENERAL_FAILURE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub package_path: PathBuf,
    pub scope: Scope,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed {
        name: SkillName,
        path: PathBuf,
        files: usize,
        bytes: u64,
    },
    DryRun {
        name: SkillName,
        path: PathBuf,
        files: usize,
        bytes: u64,
    },
}

impl InstallOutcome {
    pub fn exit_code(&self) -> u8 {
        exit_code::SUCCESS
    }
}
