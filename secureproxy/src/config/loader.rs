use crate::config::types::Config;
use crate::utils::validation::is_empty_or_whitespace;
use anyhow::{Context, Result};
use log::{debug, trace, warn};
use std::path::Path;

impl Config {
    /// Resolve the config path from a command line argument, falling back to the default
    pub fn resolve_config_path(arg: Option<String>) -> String {
        #[allow(clippy::collapsible_if)]
        if let Some(s) = arg {
            if !is_empty_or_whitespace(&s) {
                return s;
            }
        }
        "./secureproxy.json".to_string()
    }

    /// Load configuration from a file, writing the defaults first if it does not exist.
    /// A file that exists but cannot be parsed is an error; it is never replaced.
    pub async fn try_load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading config from: {}", path.display());
        let config = if path.exists() {
            let content = tokio::fs::read_to_string(path).await.with_context(|| format!("Failed to read config file {}", path.display()))?;
            let mut cfg = serde_json::from_str::<Config>(&content).with_context(|| format!("Failed to parse config file {}", path.display()))?;
            cfg.path = path.to_owned();
            cfg
        } else {
            warn!("Config file not found, using default config");
            Self::save_default(path).await?;
            let mut cfg = Self::new(path);
            cfg.path = path.to_owned();
            cfg
        };
        trace!("Loaded config: {:#?}", config);
        Ok(config)
    }

    /// Save the current configuration to its file
    pub async fn save(&self) -> Result<()> {
        debug!("Saving config to: {}", self.path.display());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Save a default configuration to the specified path
    pub async fn save_default(path: impl AsRef<Path>) -> Result<()> {
        debug!("Saving default config to: {}", path.as_ref().display());
        let mut config = Self::new(path.as_ref());
        config.path = path.as_ref().to_owned();
        config.save().await
    }
}
