mod checksum;
mod containment;
mod links;

pub use checksum::{sha256_file_hex, sha256_hex};
pub use containment::{
    is_dangerous_path, is_valid_scope_path, normalize_path, verify_before_deletion,
    verify_containment, Containment, DeletionCheck, DeletionFailure, PathType, VerifiedPath,
    DANGEROUS_PATHS,
};
pub use links::{
    check_directory_symlinks, check_hard_links, check_symlink_safety, detect_hard_link_warnings,
    get_symlink_summary, HardLinkFinding, HardLinkWarning, SymlinkFinding, SymlinkSafety,
    SymlinkScan, SymlinkSummary,
};
