use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{PixelFormat, error::ConfigError};

const DEFAULT_MIN_FRAME_INTERVAL_MS: u64 = 5;
const DEFAULT_MAX_CONSECUTIVE_SKIPS: u32 = 100;

/**
    Settings for one decode loop.
*/
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Pixel format of produced frames. Must be a packed format.
    pub target_format: PixelFormat,
    /// Minimum time between two produced frames, in milliseconds.
    /// This paces the loop; it is not a playback clock.
    pub min_frame_interval_ms: u64,
    /// Consecutive transient failures tolerated before the session gives
    /// up. `None` skips forever.
    pub max_consecutive_skips: Option<u32>,
    /// Drain frames buffered in the decoder at end of stream.
    pub flush_on_eof: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            target_format: PixelFormat::Rgba,
            min_frame_interval_ms: DEFAULT_MIN_FRAME_INTERVAL_MS,
            max_consecutive_skips: Some(DEFAULT_MAX_CONSECUTIVE_SKIPS),
            flush_on_eof: true,
        }
    }
}

impl LoopConfig {
    pub fn with_target_format(mut self, format: PixelFormat) -> Self {
        self.target_format = format;
        self
    }

    /**
        Set the pacing interval. It is kept in whole milliseconds, rounded
        up, so a nonzero interval never turns into no pacing at all.
    */
    pub fn with_min_frame_interval(mut self, interval: Duration) -> Self {
        let millis = interval.as_micros().div_ceil(1000);
        self.min_frame_interval_ms = u64::try_from(millis).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_consecutive_skips(mut self, limit: Option<u32>) -> Self {
        self.max_consecutive_skips = limit;
        self
    }

    pub fn min_frame_interval(&self) -> Duration {
        Duration::from_millis(self.min_frame_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.target_format.is_packed() {
            return Err(ConfigError::PlanarTarget(self.target_format));
        }
        if self.max_consecutive_skips == Some(0) {
            return Err(ConfigError::Zero("max_consecutive_skips"));
        }
        Ok(())
    }

    /**
        Load a JSON config file. Missing fields take their defaults.
    */
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|reason| ConfigError::Read {
            path: path.display().to_string(),
            reason,
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|reason| ConfigError::Parse {
            path: path.display().to_string(),
            reason,
        })?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LoopConfig::default();
        assert_eq!(config.target_format, PixelFormat::Rgba);
        assert_eq!(config.min_frame_interval(), Duration::from_millis(5));
        assert_eq!(config.max_consecutive_skips, Some(100));
        assert!(config.flush_on_eof);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn frame_interval_keeps_millisecond_granularity() {
        let sub_ms = LoopConfig::default().with_min_frame_interval(Duration::from_micros(500));
        assert_eq!(sub_ms.min_frame_interval(), Duration::from_millis(1));

        let rounded = LoopConfig::default().with_min_frame_interval(Duration::from_micros(40_100));
        assert_eq!(rounded.min_frame_interval_ms, 41);

        let zero = LoopConfig::default().with_min_frame_interval(Duration::ZERO);
        assert_eq!(zero.min_frame_interval(), Duration::ZERO);

        let huge = LoopConfig::default().with_min_frame_interval(Duration::MAX);
        assert_eq!(huge.min_frame_interval_ms, u64::MAX);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: LoopConfig =
            serde_json::from_str(r#"{ "target_format": "bgra", "max_consecutive_skips": null }"#)
                .unwrap();
        assert_eq!(config.target_format, PixelFormat::Bgra);
        assert_eq!(config.max_consecutive_skips, None);
        assert_eq!(config.min_frame_interval_ms, 5);
    }

    #[test]
    fn validate_rejects_planar_target_and_zero_skips() {
        let planar = LoopConfig::default().with_target_format(PixelFormat::Nv12);
        assert!(matches!(
            planar.validate(),
            Err(ConfigError::PlanarTarget(PixelFormat::Nv12))
        ));

        let zero = LoopConfig::default().with_max_consecutive_skips(Some(0));
        assert!(matches!(zero.validate(), Err(ConfigError::Zero(_))));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loop.json");
        fs::write(&path, r#"{ "min_frame_interval_ms": 40 }"#).unwrap();
        let config = LoopConfig::load(&path).unwrap();
        assert_eq!(config.min_frame_interval(), Duration::from_millis(40));

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            LoopConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            LoopConfig::load(&dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
