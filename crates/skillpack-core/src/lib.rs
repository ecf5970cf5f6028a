mod error;
mod manifest;
mod name;
mod scope;

pub mod exit_code;

pub use error::{SecurityViolation, SkillError, SkillResult};
pub use manifest::{SkillManifest, SKILL_MANIFEST_FILE};
pub use name::{validate_skill_name, NameIssue, NameValidation, SkillName, MAX_SKILL_NAME_LEN};
pub use scope::{validate_scope, Scope, ScopeValidation};
