//! Process exit codes shared by every command. Security violations and
//! critical rollback failures never share a code with ordinary validation
//! failures.

pub const SUCCESS: u8 = 0;
pub const GENERAL_FAILURE: u8 = 1;
pub const VALIDATION_FAILURE: u8 = 2;
pub const NOT_FOUND: u8 = 3;
pub const LOCKED: u8 = 4;
pub const SECURITY_VIOLATION: u8 = 5;
pub const ROLLED_BACK: u8 = 6;
pub const CRITICAL: u8 = 7;
