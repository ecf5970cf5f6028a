use anyhow::{Context, Result};
use skillpack_core::{Scope, SkillName};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeLayout {
    project_root: PathBuf,
    personal_root: PathBuf,
    backups_dir: PathBuf,
}

impl ScopeLayout {
    pub fn new(
        project_root: impl Into<PathBuf>,
        personal_root: impl Into<PathBuf>,
        backups_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            personal_root: personal_root.into(),
            backups_dir: backups_dir.into(),
        }
    }

    /// Standard layout: `<project>/.claude/skills` and `<home>/.claude/skills`,
    /// with backups kept next to the personal scope.
    pub fn from_dirs(project_dir: &Path, home_dir: &Path) -> Self {
        Self::new(
            project_dir.join(".claude").join("skills"),
            home_dir.join(".claude").join("skills"),
            home_dir.join(".claude").join("skill-backups"),
        )
    }

    pub fn with_backups_dir(mut self, backups_dir: impl Into<PathBuf>) -> Self {
        self.backups_dir = backups_dir.into();
        self
    }

    pub fn scope_root(&self, scope: Scope) -> &Path {
        match scope {
            Scope::Project => &self.project_root,
            Scope::Personal => &self.personal_root,
        }
    }

    pub fn skill_dir(&self, scope: Scope, name: &SkillName) -> PathBuf {
        self.scope_root(scope).join(name.as_str())
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    pub fn backup_path(&self, name: &SkillName, stamp: &str) -> PathBuf {
        self.backups_dir
            .join(format!("{}-{stamp}.{BACKUP_EXTENSION}", name.as_str()))
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.backups_dir.join(".staging")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.backups_dir.clone(), self.staging_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub const BACKUP_EXTENSION: &str = "skill";

pub fn default_home_dir() -> Result<PathBuf> {
    if cfg!(windows) {
        let profile = std::env::var("USERPROFILE")
            .context("USERPROFILE is not set; cannot resolve the personal skills scope")?;
        return Ok(PathBuf::from(profile));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve the personal skills scope")?;
    Ok(PathBuf::from(home))
}
