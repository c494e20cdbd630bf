use crate::MeshError;

use gneiss_core::Backoff;

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct MeshConfig {
    /// The maximum number of ad-hoc chunk requests for one segment in one episode.
    pub max_batch_size: usize,
    /// Applies to every chunk request. The default waits `5s * 2^k` after the `k`-th failure, for 5 retries.
    pub retry: Backoff,
    /// The maximum number of precomputed chunks fetched at once.
    pub parallel_precomputed_count: usize,
    /// Side lengths of an ad-hoc chunk, in voxels of its zoom step.
    pub cube_size: [i32; 3],
    pub subsampling_strides: [i32; 3],
    /// Ad-hoc meshes are computed at the existing zoom step closest to this one.
    pub preferred_zoom_step: u8,
}

impl MeshConfig {
    /// Chunk sides and subsampling strides must be positive.
    pub fn validate(&self) -> Result<(), MeshError> {
        let positive = |v: [i32; 3]| v.iter().all(|&c| c > 0);
        if positive(self.cube_size) && positive(self.subsampling_strides) {
            Ok(())
        } else {
            Err(MeshError::InvalidChunkShape {
                cube_size: self.cube_size,
                subsampling_strides: self.subsampling_strides,
            })
        }
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            retry: Backoff::new(5, Duration::from_millis(5000), 2),
            parallel_precomputed_count: 6,
            cube_size: [256; 3],
            subsampling_strides: [4; 3],
            preferred_zoom_step: 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validate_rejects_degenerate_chunks() {
        assert!(MeshConfig::default().validate().is_ok());

        for (cube_size, subsampling_strides) in [([0, 256, 256], [4; 3]), ([256; 3], [4, -1, 4])] {
            let config = MeshConfig {
                cube_size,
                subsampling_strides,
                ..MeshConfig::default()
            };
            assert!(matches!(config.validate(), Err(MeshError::InvalidChunkShape { .. })));
        }
    }
}
