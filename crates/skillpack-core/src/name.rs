use std::fmt;

use crate::{SecurityViolation, SkillError};

pub const MAX_SKILL_NAME_LEN: usize = 64;

/// Look-alikes of `/`, `\` and `.` that some filesystems or tools normalize
/// back into their ASCII forms. Enumerated by hand; this is a partial list, not
/// a confusables database.
const LOOKALIKE_CHARS: [(char, &str); 10] = [
    ('\u{FF0F}', "fullwidth solidus"),
    ('\u{FF3C}', "fullwidth reverse solidus"),
    ('\u{2215}', "division slash"),
    ('\u{2044}', "fraction slash"),
    ('\u{29F5}', "reverse solidus operator"),
    ('\u{2216}', "set minus"),
    ('\u{2024}', "one dot leader"),
    ('\u{2219}', "bullet operator"),
    ('\u{00B7}', "middle dot"),
    ('\u{30FB}', "katakana middle dot"),
];

/// A skill directory name that passed every guard in [`validate_skill_name`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SkillName(String);

impl SkillName {
    pub fn parse(input: &str) -> Result<Self, SkillError> {
        match check_skill_name(input) {
            None => Ok(Self(input.to_string())),
            Some(issue) if issue.is_security_relevant() => {
                Err(SkillError::Security(SecurityViolation::UnsafeName {
                    name: input.escape_debug().to_string(),
                    reason: issue.message(),
                }))
            }
            Some(issue) => Err(SkillError::Validation(format!(
                "invalid skill name '{}': {}",
                input.escape_debug(),
                issue.message()
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SkillName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SkillName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameIssue {
    Empty,
    TooLong { len: usize },
    ControlCharacter { code: u32 },
    PercentEncoded,
    AbsolutePath,
    Traversal,
    Separator,
    LookAlike { ch: char, label: &'static str },
    InvalidCharacter { ch: char },
    HyphenPlacement,
}

impl NameIssue {
    /// Issues that indicate an attempt to steer path construction, as opposed
    /// to a name that is merely malformed.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            Self::ControlCharacter { .. }
                | Self::PercentEncoded
                | Self::AbsolutePath
                | Self::Traversal
                | Self::Separator
                | Self::LookAlike { .. }
        )
    }

    pub fn message(&self) -> String {
        match self {
            Self::Empty => "skill name must not be empty".to_string(),
            Self::TooLong { len } => format!(
                "skill name is {len} bytes; at most {MAX_SKILL_NAME_LEN} are allowed"
            ),
            Self::ControlCharacter { code } => {
                format!("skill name contains control character 0x{code:02X}")
            }
            Self::PercentEncoded => {
                "skill name contains a percent-encoded sequence; encoded names are rejected, not decoded"
                    .to_string()
            }
            Self::AbsolutePath => "skill name looks like an absolute path".to_string(),
            Self::Traversal => "skill name contains a path traversal sequence '..'".to_string(),
            Self::Separator => "skill name contains a path separator".to_string(),
            Self::LookAlike { ch, label } => format!(
                "skill name contains U+{:04X} ({label}), a look-alike of a path separator or dot",
                *ch as u32
            ),
            Self::InvalidCharacter { ch } => format!(
                "skill name contains '{}'; only lowercase letters, digits and hyphens are allowed",
                ch.escape_debug()
            ),
            Self::HyphenPlacement => {
                "skill name must not start or end with a hyphen or contain consecutive hyphens"
                    .to_string()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameValidation {
    pub valid: bool,
    pub error: Option<String>,
    pub issue: Option<NameIssue>,
}

pub fn validate_skill_name(input: &str) -> NameValidation {
    match check_skill_name(input) {
        None => NameValidation {
            valid: true,
            error: None,
            issue: None,
        },
        Some(issue) => NameValidation {
            valid: false,
            error: Some(issue.message()),
            issue: Some(issue),
        },
    }
}

// Security checks run before format checks so that hostile input is reported
// as what it is rather than as a charset problem.
fn check_skill_name(input: &str) -> Option<NameIssue> {
    if input.trim().is_empty() {
        return Some(NameIssue::Empty);
    }

    if let Some(ch) = input.chars().find(|ch| is_control(*ch)) {
        return Some(NameIssue::ControlCharacter { code: ch as u32 });
    }

    if has_percent_encoding(input) {
        return Some(NameIssue::PercentEncoded);
    }

    if looks_absolute(input) {
        return Some(NameIssue::AbsolutePath);
    }

    if input.contains("..") {
        return Some(NameIssue::Traversal);
    }

    if input.contains('/') || input.contains('\\') {
        return Some(NameIssue::Separator);
    }

    for ch in input.chars() {
        if let Some((_, label)) = LOOKALIKE_CHARS.iter().find(|(lookalike, _)| *lookalike == ch) {
            return Some(NameIssue::LookAlike { ch, label });
        }
    }

    if input.len() > MAX_SKILL_NAME_LEN {
        return Some(NameIssue::TooLong { len: input.len() });
    }

    if let Some(ch) = input
        .chars()
        .find(|ch| !(ch.is_ascii_lowercase() || ch.is_ascii_digit() || *ch == '-'))
    {
        return Some(NameIssue::InvalidCharacter { ch });
    }

    if input.starts_with('-') || input.ends_with('-') || input.contains("--") {
        return Some(NameIssue::HyphenPlacement);
    }

    None
}

fn is_control(ch: char) -> bool {
    let code = ch as u32;
    code <= 0x1F || code == 0x7F
}

fn has_percent_encoding(input: &str) -> bool {
    let bytes = input.as_bytes();
    bytes.windows(3).any(|window| {
        window[0] == b'%' && window[1].is_ascii_hexdigit() && window[2].is_ascii_hexdigit()
    })
}

fn looks_absolute(input: &str) -> bool {
    if input.starts_with('/') || input.starts_with("\\\\") || input.starts_with('\\') {
        return true;
    }
    let mut chars = input.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(drive), Some(':')) if drive.is_ascii_alphabetic()
    )
}
