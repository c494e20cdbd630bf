use crate::glam::IVec3;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ResolutionError {
    #[error("mag {0} is not a power of two on every axis")]
    NotPowerOfTwo(IVec3),
}

/// The magnifications available in a dataset, indexed by zoom step.
///
/// A magnification ("mag") is the number of global voxels covered by one voxel of that zoom step, per axis. Every component
/// must be a power of two. The zoom step of a mag is `log2` of its largest component, so a dataset with mags `[1, 1, 1]` and
/// `[4, 4, 2]` has zoom steps 0 and 2, but not 1.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "Vec<[i32; 3]>", into = "Vec<[i32; 3]>")]
pub struct ResolutionInfo {
    mags_by_zoom_step: Vec<Option<IVec3>>,
}

impl ResolutionInfo {
    pub fn try_new(mags: impl IntoIterator<Item = IVec3>) -> Result<Self, ResolutionError> {
        let mut mags_by_zoom_step = Vec::new();
        for mag in mags {
            if !(mag.cmpgt(IVec3::ZERO).all() && (mag & (mag - 1)) == IVec3::ZERO) {
                return Err(ResolutionError::NotPowerOfTwo(mag));
            }
            let zoom_step = mag.max_element().trailing_zeros() as usize;
            if mags_by_zoom_step.len() <= zoom_step {
                mags_by_zoom_step.resize(zoom_step + 1, None);
            }
            mags_by_zoom_step[zoom_step] = Some(mag);
        }
        Ok(Self { mags_by_zoom_step })
    }

    /// A dataset with all isotropic mags from `1` to `2^coarsest_zoom_step`.
    pub fn isotropic(coarsest_zoom_step: u8) -> Self {
        Self {
            mags_by_zoom_step: (0..=coarsest_zoom_step).map(|z| Some(IVec3::splat(1 << z))).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mags_by_zoom_step.iter().all(Option::is_none)
    }

    pub fn has_zoom_step(&self, zoom_step: u8) -> bool {
        self.mag(zoom_step).is_some()
    }

    pub fn mag(&self, zoom_step: u8) -> Option<IVec3> {
        self.mags_by_zoom_step.get(zoom_step as usize).copied().flatten()
    }

    /// Per-axis `log2` of the mag at `zoom_step`.
    pub fn mag_log2(&self, zoom_step: u8) -> Option<IVec3> {
        self.mag(zoom_step)
            .map(|m| IVec3::new(m.x.trailing_zeros() as i32, m.y.trailing_zeros() as i32, m.z.trailing_zeros() as i32))
    }

    pub fn zoom_steps(&self) -> impl Iterator<Item = u8> + '_ {
        self.mags_by_zoom_step
            .iter()
            .enumerate()
            .filter_map(|(z, m)| m.map(|_| z as u8))
    }

    pub fn coarsest_zoom_step(&self) -> Option<u8> {
        self.zoom_steps().last()
    }

    /// `zoom_step` itself if it exists, otherwise the next coarser zoom step that exists.
    pub fn zoom_step_or_closest_coarser(&self, zoom_step: u8) -> Option<u8> {
        self.zoom_steps().find(|&z| z >= zoom_step)
    }

    /// The existing zoom step with the smallest distance to `zoom_step`. Ties prefer the finer zoom step.
    pub fn closest_existing_zoom_step(&self, zoom_step: u8) -> Option<u8> {
        self.zoom_steps().min_by_key(|&z| (z as i32 - zoom_step as i32).abs())
    }
}

impl TryFrom<Vec<[i32; 3]>> for ResolutionInfo {
    type Error = ResolutionError;

    fn try_from(mags: Vec<[i32; 3]>) -> Result<Self, Self::Error> {
        Self::try_new(mags.into_iter().map(IVec3::from_array))
    }
}

impl From<ResolutionInfo> for Vec<[i32; 3]> {
    fn from(info: ResolutionInfo) -> Self {
        info.mags_by_zoom_step.into_iter().flatten().map(|m| m.to_array()).collect()
    }
}
