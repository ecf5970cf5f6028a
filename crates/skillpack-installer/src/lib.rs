mod archive;
mod compare;
mod config;
mod context;
mod discovery;
mod fs_utils;
mod install;
mod layout;
mod lock;
mod preflight;
mod types;
mod uninstall;
mod update;
mod validation;

pub use archive::{
    inspect_package, pack_skill_dir, verify_backup, ExtractSummary, Extractor, TarGzExtractor,
};
pub use compare::{compare_versions, VersionComparison};
pub use config::{SkillpackConfig, CONFIG_ENV_VAR};
pub use context::OperationContext;
pub use discovery::{Discovery, ScopeDiscovery, SkillDiscovery};
pub use fs_utils::{current_unix_timestamp, measure_tree, remove_skill_tree, RemovalReport};
pub use install::install_skill;
pub use layout::{default_home_dir, ScopeLayout, BACKUP_EXTENSION};
pub use lock::{
    acquire_uninstall_lock, has_uninstall_lock, lock_path_for, read_lock_info,
    release_uninstall_lock, LockAcquisition, LockFailure, LockInfo, LockOperation, SkillLock,
};
pub use preflight::{scan_before_removal, RemovalFinding, RemovalFindingKind};
pub use types::{
    InstallOutcome, InstallRequest, UninstallFailure, UninstallOptions, UninstallOutcome,
    UninstallPreview, UninstallRequest, UninstallResult, UpdateDryRunPreview, UpdateOutcome,
    UpdateRequest, UpdateRollbackFailed, UpdateRolledBack, UpdateState, UpdateSuccess,
};
pub use uninstall::uninstall_skill;
pub use update::{update_skill, UpdateSession};
pub use validation::{check_package_identity, ContentValidator, SkillMdValidator, ValidationReport};

#[cfg(test)]
mod tests;
