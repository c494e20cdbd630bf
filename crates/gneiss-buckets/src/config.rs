use gneiss_core::Backoff;

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct PullQueueConfig {
    /// The maximum number of addresses in one request to the store.
    pub batch_size: usize,
    /// The maximum number of batch requests in flight for one call to [`PullQueue::pull`](crate::PullQueue::pull).
    pub max_parallel_batches: usize,
    pub retry: Backoff,
}

impl Default for PullQueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 6,
            max_parallel_batches: 4,
            retry: Backoff::new(3, Duration::from_millis(100), 2),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct SaveConfig {
    /// The maximum number of buckets in one push to the store.
    pub batch_size: usize,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self { batch_size: 32 }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct CubeConfig {
    /// Garbage collection evicts clean buckets until at most this many remain.
    pub max_bucket_count: usize,
}

impl Default for CubeConfig {
    fn default() -> Self {
        Self {
            max_bucket_count: 5000,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PrefetchConfig {
    pub orthogonal: OrthogonalConfig,
    pub oblique: ObliqueConfig,
    pub flight: FlightConfig,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrthogonalConfig {
    /// How many coarser zoom steps are prefetched as a fallback for the active one.
    pub fallback_zoom_steps: u8,
    /// Added to the priority of a fallback bucket once per zoom step of distance from the active zoom step.
    pub fallback_priority_offset: f64,
}

impl Default for OrthogonalConfig {
    fn default() -> Self {
        Self {
            fallback_zoom_steps: 1,
            fallback_priority_offset: 1000.0,
        }
    }
}

/// A square frustum in camera space, measured in buckets.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct ObliqueConfig {
    pub near_half_width: f64,
    pub near_half_height: f64,
    pub near_z: f64,
    pub far_half_width: f64,
    pub far_half_height: f64,
    pub far_z: f64,
}

impl Default for ObliqueConfig {
    fn default() -> Self {
        Self {
            near_half_width: 7.0,
            near_half_height: 7.0,
            near_z: -0.5,
            far_half_width: 10.0,
            far_half_height: 10.0,
            far_z: 20.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct FlightConfig {
    /// Radius of the spherical cap in front of the camera, in global voxels.
    pub spherical_cap_radius: f64,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            spherical_cap_radius: 140.0,
        }
    }
}
