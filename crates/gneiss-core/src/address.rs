use crate::glam::{DVec3, IVec3};
use crate::{BucketUnits, ResolutionInfo, VoxelUnits};

use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use std::fmt;

pub const BUCKET_WIDTH_LOG2: i32 = 5;
pub const BUCKET_WIDTH: i32 = 1 << BUCKET_WIDTH_LOG2;
pub const BUCKET_SIZE: usize = (BUCKET_WIDTH * BUCKET_WIDTH * BUCKET_WIDTH) as usize;
const_assert_eq!(BUCKET_SIZE, 32 * 32 * 32);

/// The canonical key of a bucket: integer bucket coordinates at a given zoom step.
///
/// Two equal addresses always denote the same bucket, so this type is used directly as a hash key. There is no string or
/// float encoding anywhere in the lookup path.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct BucketAddress {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub zoom_step: u8,
}

impl BucketAddress {
    pub const fn new(x: i32, y: i32, z: i32, zoom_step: u8) -> Self {
        Self { x, y, z, zoom_step }
    }

    pub fn from_coordinates(coordinates: BucketUnits<IVec3>, zoom_step: u8) -> Self {
        let BucketUnits(c) = coordinates;
        Self::new(c.x, c.y, c.z, zoom_step)
    }

    pub fn coordinates(&self) -> BucketUnits<IVec3> {
        BucketUnits(IVec3::new(self.x, self.y, self.z))
    }

    pub fn offset(&self, delta: IVec3) -> Self {
        Self::from_coordinates(self.coordinates().map(|c| c + delta), self.zoom_step)
    }
}

impl fmt::Display for BucketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x, self.y, self.z, self.zoom_step)
    }
}

/// Number of bits a global voxel coordinate is shifted right to get the bucket coordinate at `zoom_step`, per axis.
pub fn bucket_shift(resolutions: &ResolutionInfo, zoom_step: u8) -> Option<IVec3> {
    resolutions
        .mag_log2(zoom_step)
        .map(|mag_log2| mag_log2 + BUCKET_WIDTH_LOG2)
}

/// Returns the address of the bucket at `zoom_step` that contains the global voxel `position`.
///
/// `None` if the dataset has no mag at `zoom_step`.
pub fn global_position_to_bucket(
    position: VoxelUnits<IVec3>,
    resolutions: &ResolutionInfo,
    zoom_step: u8,
) -> Option<BucketAddress> {
    let shift = bucket_shift(resolutions, zoom_step)?;
    // Arithmetic shift floors negative coordinates as well.
    Some(BucketAddress::from_coordinates(BucketUnits(position.into_inner() >> shift), zoom_step))
}

/// Like [`global_position_to_bucket`], for a continuous camera position. The position is floored to the containing voxel.
pub fn global_float_position_to_bucket(
    position: VoxelUnits<DVec3>,
    resolutions: &ResolutionInfo,
    zoom_step: u8,
) -> Option<BucketAddress> {
    global_position_to_bucket(position.map(|p| p.floor().as_ivec3()), resolutions, zoom_step)
}

/// The global voxel position of the minimum corner of the bucket at `address`.
pub fn bucket_min_position(address: BucketAddress, resolutions: &ResolutionInfo) -> Option<VoxelUnits<IVec3>> {
    let shift = bucket_shift(resolutions, address.zoom_step)?;
    Some(VoxelUnits(address.coordinates().into_inner() << shift))
}

/// Maps `address` to the bucket at `target_zoom_step` that covers (going coarser) or starts at (going finer) the same region.
pub fn zoomed_address_to_zoom_step(
    address: BucketAddress,
    resolutions: &ResolutionInfo,
    target_zoom_step: u8,
) -> Option<BucketAddress> {
    let src_log2 = resolutions.mag_log2(address.zoom_step)?;
    let dst_log2 = resolutions.mag_log2(target_zoom_step)?;
    let BucketUnits(c) = address.coordinates();
    let shift_component = |c: i32, src: i32, dst: i32| {
        if dst >= src {
            c >> (dst - src)
        } else {
            c << (src - dst)
        }
    };
    let converted = IVec3::new(
        shift_component(c.x, src_log2.x, dst_log2.x),
        shift_component(c.y, src_log2.y, dst_log2.y),
        shift_component(c.z, src_log2.z, dst_log2.z),
    );
    Some(BucketAddress::from_coordinates(BucketUnits(converted), target_zoom_step))
}

/// Linear index of the voxel containing the global `position` inside its bucket at `zoom_step`.
pub fn voxel_index_in_bucket(position: VoxelUnits<IVec3>, resolutions: &ResolutionInfo, zoom_step: u8) -> Option<usize> {
    let mag_log2 = resolutions.mag_log2(zoom_step)?;
    let local = (position.into_inner() >> mag_log2) & IVec3::splat(BUCKET_WIDTH - 1);
    Some((local.x + BUCKET_WIDTH * (local.y + BUCKET_WIDTH * local.z)) as usize)
}
