use anyhow::Context;
use skillpack_core::{Scope, SecurityViolation, SkillError, SkillName};
use skillpack_security::{
    check_symlink_safety, is_dangerous_path, is_valid_scope_path, normalize_path,
    verify_containment, Containment, SymlinkSafety,
};
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::archive::{Extractor, TarGzExtractor};
use crate::discovery::{Discovery, ScopeDiscovery, SkillDiscovery};
use crate::validation::{ContentValidator, SkillMdValidator};
use crate::{ScopeLayout, SkillpackConfig};

/// Everything an install, update or uninstall needs: where the scopes are,
/// the tunables, the three collaborators and the cancellation token.
pub struct OperationContext<'a> {
    pub layout: &'a ScopeLayout,
    pub config: &'a SkillpackConfig,
    discovery: Box<dyn SkillDiscovery + 'a>,
    validator: Box<dyn ContentValidator + 'a>,
    extractor: Box<dyn Extractor + 'a>,
    cancel: CancellationToken,
}

impl<'a> OperationContext<'a> {
    pub fn new(layout: &'a ScopeLayout, config: &'a SkillpackConfig) -> Self {
        Self {
            layout,
            config,
            discovery: Box::new(ScopeDiscovery::new(layout)),
            validator: Box::new(SkillMdValidator),
            extractor: Box::new(TarGzExtractor::from_config(config)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_discovery(mut self, discovery: impl SkillDiscovery + 'a) -> Self {
        self.discovery = Box::new(discovery);
        self
    }

    pub fn with_validator(mut self, validator: impl ContentValidator + 'a) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn with_extractor(mut self, extractor: impl Extractor + 'a) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn discovery(&self) -> &dyn SkillDiscovery {
        self.discovery.as_ref()
    }

    pub fn validator(&self) -> &dyn ContentValidator {
        self.validator.as_ref()
    }

    pub fn extractor(&self) -> &dyn Extractor {
        self.extractor.as_ref()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// The scope root for a destructive operation, refused unless it is a real
/// `.claude/skills` directory outside the protected system locations.
pub(crate) fn checked_scope_root(layout: &ScopeLayout, scope: Scope) -> Result<PathBuf, SkillError> {
    let root = normalize_path(layout.scope_root(scope));
    if !is_valid_scope_path(&root) {
        return Err(SecurityViolation::InvalidScopePath { path: root }.into());
    }
    if is_dangerous_path(&root) {
        return Err(SecurityViolation::DangerousPath { path: root }.into());
    }
    Ok(root)
}

/// Checks that `skill_path` is a direct child of `scope_root` and not a
/// protected location. Purely lexical.
pub(crate) fn check_skill_path(scope_root: &Path, skill_path: &Path) -> Result<PathBuf, SkillError> {
    let normalized = match verify_containment(scope_root, skill_path) {
        Containment::Valid { normalized_path } => normalized_path,
        Containment::Violation { base_path, reason } => {
            return Err(SecurityViolation::Containment {
                base: base_path,
                path: skill_path.to_path_buf(),
                reason,
            }
            .into());
        }
    };
    if normalized.parent() != Some(scope_root) {
        return Err(SecurityViolation::Containment {
            base: scope_root.to_path_buf(),
            path: normalized,
            reason: "a skill must be a direct child of its scope root".to_string(),
        }
        .into());
    }
    if is_dangerous_path(&normalized) {
        return Err(SecurityViolation::DangerousPath { path: normalized }.into());
    }
    Ok(normalized)
}

/// Runs every guard that applies to an already-installed skill and returns
/// its directory: scope root checks, discovery, containment, and a refusal to
/// operate through a skill directory that is itself a symlink.
pub(crate) fn locate_installed_skill(
    ctx: &OperationContext<'_>,
    name: &SkillName,
    scope: Scope,
) -> Result<PathBuf, SkillError> {
    let scope_root = checked_scope_root(ctx.layout, scope)?;
    let found = match ctx.discovery().discover(name, scope)? {
        Discovery::Found { path } => path,
        Discovery::NotFound { searched } => {
            return Err(SkillError::NotFound {
                name: name.to_string(),
                scope: scope.as_str().to_string(),
                searched,
            });
        }
    };
    let skill_path = check_skill_path(&scope_root, &found)?;

    let metadata = fs::symlink_metadata(&skill_path)
        .with_context(|| format!("failed to stat {}", skill_path.display()))?;
    if metadata.file_type().is_symlink() {
        let real_scope = scope_root
            .canonicalize()
            .with_context(|| format!("failed to resolve {}", scope_root.display()))?;
        return Err(match check_symlink_safety(&skill_path, &real_scope) {
            SymlinkSafety::Escape { target_path } => SecurityViolation::SymlinkEscape {
                link: skill_path,
                target: target_path,
                scope: real_scope,
            }
            .into(),
            _ => SkillError::Validation(format!(
                "{} is a symlink; refusing to operate through it",
                skill_path.display()
            )),
        });
    }
    if !metadata.is_dir() {
        return Err(SkillError::Validation(format!(
            "{} is not a directory",
            skill_path.display()
        )));
    }
    Ok(skill_path)
}
