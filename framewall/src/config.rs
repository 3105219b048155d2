use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use frameloop::{ConfigError, LoopConfig};
use serde::{Deserialize, Serialize};

/**
    Persistent wall settings, stored as JSON.

    Every field is optional in the file; command line flags override
    whatever is loaded here.
*/
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WallConfig {
    pub source: Option<String>,
    pub players: usize,
    pub columns: usize,
    pub looping: bool,
    pub refresh_ms: u64,
    pub decode: LoopConfig,
}

impl Default for WallConfig {
    fn default() -> Self {
        Self {
            source: None,
            players: 6,
            columns: 3,
            looping: false,
            refresh_ms: 33,
            decode: LoopConfig::default(),
        }
    }
}

impl WallConfig {
    /**
        Get the path to the default config file.
    */
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("framewall").join("config.json"))
    }

    /**
        Load the config from an explicit path, or from the default location.

        A missing default file yields the defaults; a missing explicit file
        is an error.
    */
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("cannot read config '{}'", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("invalid config '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.players == 0 {
            return Err(ConfigError::Zero("players"));
        }
        if self.columns == 0 {
            return Err(ConfigError::Zero("columns"));
        }
        if self.refresh_ms == 0 {
            return Err(ConfigError::Zero("refresh_ms"));
        }
        self.decode.validate()
    }

    /**
        Pick the source to play: the command line wins over the config file.
    */
    pub fn resolve_source(&self, cli: Option<&str>) -> Result<String> {
        match cli.or(self.source.as_deref()) {
            Some(source) if !source.trim().is_empty() => Ok(source.to_string()),
            _ => bail!("no source given; pass one on the command line or set \"source\" in the config file"),
        }
    }
}
