use anyhow::Context;
use skillpack_core::{validate_skill_name, SkillError, SkillManifest, SkillName, SKILL_MANIFEST_FILE};
use std::fs;
use std::path::Path;

use crate::archive::ExtractSummary;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn summary(&self) -> String {
        self.errors.join("; ")
    }
}

/// Full content validation of an installed (or about to be installed) skill
/// tree. Returning `Err` means the validator itself could not run.
pub trait ContentValidator {
    fn validate(&self, skill_path: &Path) -> anyhow::Result<ValidationReport>;
}

/// Checks the parts of a skill that install and update depend on: a regular
/// `SKILL.md` with parseable frontmatter, a valid `name` that matches the
/// directory, and a description.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkillMdValidator;

impl ContentValidator for SkillMdValidator {
    fn validate(&self, skill_path: &Path) -> anyhow::Result<ValidationReport> {
        let manifest_path = skill_path.join(SKILL_MANIFEST_FILE);
        let metadata = match fs::symlink_metadata(&manifest_path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ValidationReport::from_errors(vec![format!(
                    "{SKILL_MANIFEST_FILE} is missing"
                )]));
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to stat {}", manifest_path.display()));
            }
        };
        if !metadata.file_type().is_file() {
            return Ok(ValidationReport::from_errors(vec![format!(
                "{SKILL_MANIFEST_FILE} must be a regular file"
            )]));
        }

        let raw = fs::read_to_string(&manifest_path)
            .with_context(|| format!("failed to read {}", manifest_path.display()))?;
        let manifest = match SkillManifest::from_skill_md_str(&raw) {
            Ok(manifest) => manifest,
            Err(err) => return Ok(ValidationReport::from_errors(vec![format!("{err:#}")])),
        };

        let mut errors = Vec::new();
        let name_check = validate_skill_name(&manifest.name);
        if !name_check.valid {
            errors.push(format!(
                "frontmatter name '{}' is invalid: {}",
                manifest.name,
                name_check.error.unwrap_or_default()
            ));
        }
        if let Some(dir_name) = skill_path.file_name().and_then(|name| name.to_str()) {
            if dir_name != manifest.name {
                errors.push(format!(
                    "frontmatter name '{}' does not match directory '{dir_name}'",
                    manifest.name
                ));
            }
        }
        match manifest.description.as_deref().map(str::trim) {
            Some(description) if !description.is_empty() => {}
            _ => errors.push("frontmatter 'description' is required".to_string()),
        }

        Ok(ValidationReport::from_errors(errors))
    }
}

/// Checks an extracted package against the skill it claims to be. The
/// archive's top-level directory and the manifest name must both equal
/// `expected`; packages are never renamed to fit.
pub fn check_package_identity(
    staged_root: &Path,
    summary: &ExtractSummary,
    expected: &SkillName,
) -> Result<SkillManifest, SkillError> {
    if summary.root_name != expected.as_str() {
        return Err(SkillError::Validation(format!(
            "package-mismatch: package directory '{}' does not match skill '{expected}'",
            summary.root_name
        )));
    }
    let manifest = read_staged_manifest(staged_root)?;
    if manifest.name != expected.as_str() {
        return Err(SkillError::Validation(format!(
            "package-mismatch: package declares name '{}' but skill is '{expected}'",
            manifest.name
        )));
    }
    Ok(manifest)
}

pub(crate) fn read_staged_manifest(staged_root: &Path) -> Result<SkillManifest, SkillError> {
    let manifest_path = staged_root.join(SKILL_MANIFEST_FILE);
    let metadata = fs::symlink_metadata(&manifest_path).map_err(|_| {
        SkillError::Validation(format!("package has no {SKILL_MANIFEST_FILE}"))
    })?;
    if !metadata.file_type().is_file() {
        return Err(SkillError::Validation(format!(
            "package {SKILL_MANIFEST_FILE} must be a regular file"
        )));
    }
    let raw = fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    SkillManifest::from_skill_md_str(&raw)
        .map_err(|err| SkillError::Validation(format!("package {err:#}")))
}
