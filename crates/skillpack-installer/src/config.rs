use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV_VAR: &str = "SKILLPACK_CONFIG";

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SkillpackConfig {
    pub backups_dir: Option<PathBuf>,
    pub keep_backups: bool,
    /// Files above this size are reported by the pre-removal scan.
    pub max_file_size_bytes: u64,
    /// Upper bound on the expanded size of a package archive.
    pub max_package_bytes: u64,
    pub max_compression_ratio: u64,
}

impl Default for SkillpackConfig {
    fn default() -> Self {
        Self {
            backups_dir: None,
            keep_backups: false,
            max_file_size_bytes: 10 * MIB,
            max_package_bytes: 100 * MIB,
            max_compression_ratio: 100,
        }
    }
}

impl SkillpackConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse skillpack config")?;
        if config.max_compression_ratio == 0 {
            anyhow::bail!("max_compression_ratio must be greater than zero");
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read config file: {}", path.display()));
            }
        };
        let config = Self::from_toml_str(&raw)
            .with_context(|| format!("failed to load config file: {}", path.display()))?;
        Ok(Some(config))
    }

    /// `$SKILLPACK_CONFIG` when set (it must exist), otherwise
    /// `<home>/.claude/skillpack.toml` when present, otherwise defaults.
    pub fn load_default(home_dir: &Path) -> Result<Self> {
        if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(explicit);
            return Self::load(&path)?.with_context(|| {
                format!(
                    "{CONFIG_ENV_VAR} points at a missing file: {}",
                    path.display()
                )
            });
        }

        let path = home_dir.join(".claude").join("skillpack.toml");
        Ok(Self::load(&path)?.unwrap_or_default())
    }
}
