use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

pub const SKILL_MANIFEST_FILE: &str = "SKILL.md";

/// The identity fields of a `SKILL.md` frontmatter block. Cosmetic fields are
/// left to the content validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkillManifest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl SkillManifest {
    pub fn from_skill_md_str(input: &str) -> anyhow::Result<Self> {
        let frontmatter = extract_frontmatter(input)
            .ok_or_else(|| anyhow!("SKILL.md is missing a '---' delimited frontmatter block"))?;
        let manifest: Self =
            serde_yaml::from_str(frontmatter).context("failed to parse SKILL.md frontmatter")?;
        if manifest.name.trim().is_empty() {
            return Err(anyhow!("SKILL.md frontmatter 'name' must not be empty"));
        }
        Ok(manifest)
    }
}

fn extract_frontmatter(input: &str) -> Option<&str> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let rest = input
        .strip_prefix("---\r\n")
        .or_else(|| input.strip_prefix("---\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            return Some(&rest[..offset]);
        }
        offset += line.len();
    }
    None
}
