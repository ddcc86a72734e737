use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zbot_common::{Error, Result};

use crate::model::BotConfig;

/// Loads [`BotConfig`] from YAML, then applies `ZBOT_*` environment overrides.
///
/// Lookup order: the explicit path (which must exist), else
/// `~/.zbot/config.yml` when present, else built-in defaults.
pub struct ConfigLoader {
    explicit_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(explicit_path: Option<PathBuf>) -> Self {
        Self { explicit_path }
    }

    /// Default location of the user config file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".zbot").join("config.yml"))
    }

    pub fn load(&self) -> Result<BotConfig> {
        let mut config = match &self.explicit_path {
            Some(path) => Self::load_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::load_file(&path)?,
                None => {
                    debug!("no config file found, using defaults");
                    BotConfig::default()
                }
            },
        };

        apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        config.validate().map_err(Error::Config)?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<BotConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config at {}: {e}", path.display()))
        })?;
        let config = parse_yaml(&contents)
            .map_err(|e| Error::Config(format!("invalid config at {}: {e}", path.display())))?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }
}

fn parse_yaml(contents: &str) -> std::result::Result<BotConfig, serde_yaml::Error> {
    if contents.trim().is_empty() {
        return Ok(BotConfig::default());
    }
    serde_yaml::from_str(contents)
}

/// Apply `ZBOT_*` overrides using `lookup` to read variables.
fn apply_env_overrides<F>(config: &mut BotConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(model) = lookup("ZBOT_MODEL") {
        config.model = model;
    }
    if let Some(prefix) = lookup("ZBOT_TRIGGER_PREFIX") {
        config.trigger_prefix = prefix;
    }
    if let Some(raw) = lookup("ZBOT_POLL_INTERVAL_SECS") {
        config.poll_interval_secs = parse_u64("ZBOT_POLL_INTERVAL_SECS", &raw)?;
    }
    if let Some(raw) = lookup("ZBOT_COOLDOWN_SECS") {
        config.cooldown_secs = parse_u64("ZBOT_COOLDOWN_SECS", &raw)?;
    }
    Ok(())
}

fn parse_u64(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{key}={raw:?} is not a valid number: {e}")))
}
