//! Per-view-mode prefetch strategies.
//!
//! Every strategy maps a [`ViewState`] to a list of `(address, priority)` pairs, most urgent first. Priorities are
//! non-negative and grow with distance from the point of interest. The strategies know nothing about the cache; the
//! [`PullQueue`](crate::PullQueue) drops what is already loaded.

mod flight;
mod oblique;
mod orthogonal;

pub use flight::FlightStrategy;
pub use oblique::ObliqueStrategy;
pub use orthogonal::OrthogonalStrategy;

use crate::PrefetchConfig;

use gneiss_core::glam::{DMat4, DVec2, DVec3};
use gneiss_core::smallvec::SmallVec;
use gneiss_core::{BucketAddress, PriorityWorkQueue, ResolutionInfo, VoxelUnits};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ViewMode {
    /// Up to three axis-aligned planes.
    Orthogonal,
    /// One arbitrarily oriented plane.
    Oblique,
    /// Free flight through the volume.
    Flight,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OrthoPlane {
    Xy,
    Yz,
    Xz,
}

impl OrthoPlane {
    /// The `(u, v, w)` axis indices of this plane, where `w` is the normal.
    pub fn axes(self) -> [usize; 3] {
        match self {
            OrthoPlane::Xy => [0, 1, 2],
            OrthoPlane::Yz => [1, 2, 0],
            OrthoPlane::Xz => [0, 2, 1],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrthoViewport {
    pub plane: OrthoPlane,
    /// Half the visible width and height of the viewport.
    pub half_extent: VoxelUnits<DVec2>,
}

/// A snapshot of the camera, owned so it can be sent to another thread.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewState {
    pub mode: ViewMode,
    /// The point of interest.
    pub position: VoxelUnits<DVec3>,
    /// The zoom step the viewer would like to render at. It does not need to exist in the dataset.
    pub zoom_step: u8,
    /// Rotation and translation (in global voxels) of the camera. Used by the oblique and flight modes.
    pub camera: DMat4,
    /// The active planes of the orthogonal mode.
    pub viewports: SmallVec<[OrthoViewport; 3]>,
}

impl ViewState {
    pub fn orthogonal(position: VoxelUnits<DVec3>, zoom_step: u8, viewports: impl IntoIterator<Item = OrthoViewport>) -> Self {
        Self {
            mode: ViewMode::Orthogonal,
            position,
            zoom_step,
            camera: DMat4::from_translation(position.into_inner()),
            viewports: viewports.into_iter().collect(),
        }
    }

    pub fn looking(mode: ViewMode, camera: DMat4, zoom_step: u8) -> Self {
        Self {
            mode,
            position: VoxelUnits(camera.w_axis.truncate()),
            zoom_step,
            camera,
            viewports: SmallVec::new(),
        }
    }
}

/// The prefetch algorithm of one view mode.
#[derive(Clone, Debug)]
pub enum PrefetchStrategy {
    Orthogonal(OrthogonalStrategy),
    Oblique(ObliqueStrategy),
    Flight(FlightStrategy),
}

impl PrefetchStrategy {
    pub fn for_mode(mode: ViewMode, config: &PrefetchConfig) -> Self {
        match mode {
            ViewMode::Orthogonal => Self::Orthogonal(OrthogonalStrategy::new(config.orthogonal)),
            ViewMode::Oblique => Self::Oblique(ObliqueStrategy::new(config.oblique)),
            ViewMode::Flight => Self::Flight(FlightStrategy::new(config.flight)),
        }
    }

    /// The buckets worth fetching for `view`, most urgent first. Identical inputs always give identical output.
    ///
    /// Empty if the dataset has no zoom step at or above `view.zoom_step`.
    pub fn pick(&self, view: &ViewState, resolutions: &ResolutionInfo) -> Vec<(BucketAddress, f64)> {
        let mut queue = PriorityWorkQueue::new();
        match self {
            Self::Orthogonal(s) => s.enqueue(view, resolutions, &mut queue),
            Self::Oblique(s) => s.enqueue(view, resolutions, &mut queue),
            Self::Flight(s) => s.enqueue(view, resolutions, &mut queue),
        }
        queue.drain_ordered()
    }
}

/// Rotation of `camera` with its translation replaced by `translation`.
fn with_translation(camera: &DMat4, translation: DVec3) -> DMat4 {
    DMat4::from_cols(camera.x_axis, camera.y_axis, camera.z_axis, translation.extend(1.0))
}
