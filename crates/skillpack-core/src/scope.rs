use std::fmt;

use crate::SkillError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Project,
    Personal,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Personal => "personal",
        }
    }

    /// Strict parse used before destructive operations. `None` and the empty
    /// string select the project scope; anything else must be an exact literal.
    pub fn parse(input: Option<&str>) -> Result<Self, SkillError> {
        let validation = validate_scope(input);
        match validation.scope {
            Some(scope) => Ok(scope),
            None => Err(SkillError::Validation(
                validation
                    .error
                    .unwrap_or_else(|| "invalid scope".to_string()),
            )),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeValidation {
    pub valid: bool,
    pub scope: Option<Scope>,
    pub error: Option<String>,
}

pub fn validate_scope(input: Option<&str>) -> ScopeValidation {
    let scope = match input {
        None | Some("") => Some(Scope::Project),
        Some("project") => Some(Scope::Project),
        Some("personal") => Some(Scope::Personal),
        Some(_) => None,
    };

    match scope {
        Some(scope) => ScopeValidation {
            valid: true,
            scope: Some(scope),
            error: None,
        },
        None => ScopeValidation {
            valid: false,
            scope: None,
            error: Some(format!(
                "invalid scope '{}': expected exactly 'project' or 'personal' (custom roots are not supported)",
                input.unwrap_or_default().escape_debug()
            )),
        },
    }
}
