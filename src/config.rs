use gneiss_buckets::{CubeConfig, PrefetchConfig, PullQueueConfig, SaveConfig};
use gneiss_mesh::{MeshConfig, MeshError};

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    pub pull: PullQueueConfig,
    pub save: SaveConfig,
    pub cube: CubeConfig,
    pub prefetch: PrefetchConfig,
    pub mesh: MeshConfig,
    /// Compute prefetch picks on a background thread instead of in [`StreamingSession::update_view`](crate::StreamingSession::update_view).
    pub background_picker: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pull: PullQueueConfig::default(),
            save: SaveConfig::default(),
            cube: CubeConfig::default(),
            prefetch: PrefetchConfig::default(),
            mesh: MeshConfig::default(),
            background_picker: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("Invalid mesh config: {0}")]
    Mesh(#[from] MeshError),
}

impl Config {
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let reader = std::fs::File::open(path)?;
        let config: Self = ron::de::from_reader(reader)?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_ron_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(s)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mesh.validate()?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_sections_take_defaults() {
        let config = Config::from_ron_str(
            "(pull: (batch_size: 8, max_parallel_batches: 2, retry: (max_retries: 1, base_delay_ms: 10, multiplier: 3)))",
        )
        .unwrap();

        assert_eq!(config.pull.batch_size, 8);
        assert_eq!(config.pull.retry.delay_after_failure(1).as_millis(), 30);
        assert_eq!(config.save, SaveConfig::default());
        assert_eq!(config.mesh.max_batch_size, 50);
        assert!(!config.background_picker);
    }

    #[test]
    fn bundled_config_parses() {
        let config = Config::read_file(concat!(env!("CARGO_MANIFEST_DIR"), "/config.ron")).unwrap();

        assert_eq!(config.prefetch.flight.spherical_cap_radius, 140.0);
        assert_eq!(config.cube.max_bucket_count, 5000);
    }

    #[test]
    fn malformed_config_is_an_error() {
        assert!(matches!(Config::from_ron_str("(pull: 3)"), Err(ConfigError::Ron(_))));
        assert!(matches!(Config::read_file("/nonexistent/gneiss.ron"), Err(ConfigError::Io(_))));
    }

    #[test]
    fn zero_cube_size_is_rejected_on_load() {
        let result = Config::from_ron_str(
            "(mesh: (
                max_batch_size: 50,
                retry: (max_retries: 5, base_delay_ms: 5000, multiplier: 2),
                parallel_precomputed_count: 6,
                cube_size: (0, 256, 256),
                subsampling_strides: (4, 4, 4),
                preferred_zoom_step: 0,
            ))",
        );

        assert!(matches!(result, Err(ConfigError::Mesh(MeshError::InvalidChunkShape { .. }))));
    }
}
