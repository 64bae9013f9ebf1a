//! Scheduler configuration loaded from a TOML file.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Runtime configuration. Every field has a default so the config file is
/// optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Display worker tick interval in seconds.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

fn default_tick_secs() -> u64 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
        }
    }
}

impl Config {
    /// Load config from the given file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> color_eyre::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .map_err(|e| color_eyre::eyre::eyre!("failed to read {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| color_eyre::eyre::eyre!("failed to parse {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Display worker tick interval.
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }
}
