use crate::SegmentId;

use gneiss_core::glam::IVec3;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshStoreError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("no such mesh data: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("the dataset has no resolutions")]
    NoResolution,
    #[error("failed to list the chunks of mesh file {mesh_file:?} for segment {segment}")]
    ListingFailed {
        segment: SegmentId,
        mesh_file: String,
        #[source]
        source: MeshStoreError,
    },
    #[error("giving up on the first chunk {position} of segment {segment} after {attempts} attempts")]
    InitialChunkFailed {
        segment: SegmentId,
        position: IVec3,
        attempts: u32,
        #[source]
        source: MeshStoreError,
    },
    #[error("mesh chunks need positive sizes, got cube size {cube_size:?} and subsampling strides {subsampling_strides:?}")]
    InvalidChunkShape {
        cube_size: [i32; 3],
        subsampling_strides: [i32; 3],
    },
}
