use crate::{MeshStoreError, SegmentId};

use gneiss_core::glam::IVec3;
use gneiss_core::smallvec::SmallVec;
use gneiss_core::VoxelUnits;

use std::future::Future;

pub type Geometry = Vec<u8>;

/// Parameters of one ad-hoc chunk computation.
#[derive(Clone, Debug, PartialEq)]
pub struct AdHocChunkRequest {
    pub segment: SegmentId,
    /// The minimum corner of the chunk, in global voxels.
    pub position: VoxelUnits<IVec3>,
    pub mag: IVec3,
    pub cube_size: IVec3,
    pub subsampling_strides: IVec3,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AdHocChunk {
    pub geometry: Geometry,
    /// Faces through which the segment continues, as indices into [`NEIGHBOR_OFFSETS`](crate::NEIGHBOR_OFFSETS).
    pub neighbors: SmallVec<[u8; 6]>,
}

/// The remote store that computes or serves mesh geometry.
pub trait MeshStore {
    fn compute_mesh_chunk(&self, request: &AdHocChunkRequest) -> impl Future<Output = Result<AdHocChunk, MeshStoreError>>;

    /// The chunk positions of `segment` in a precomputed mesh file.
    fn list_mesh_chunks(
        &self,
        segment: SegmentId,
        mesh_file: &str,
    ) -> impl Future<Output = Result<Vec<VoxelUnits<IVec3>>, MeshStoreError>>;

    fn fetch_mesh_chunk(
        &self,
        segment: SegmentId,
        mesh_file: &str,
        position: VoxelUnits<IVec3>,
    ) -> impl Future<Output = Result<Geometry, MeshStoreError>>;
}
