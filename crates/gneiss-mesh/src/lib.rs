//! On-demand streaming of segment surface meshes.
//!
//! A mesh is loaded in "episodes". An ad-hoc episode starts at the cube that contains a seed position and flood-fills
//! outward through the neighbors the store reports, until the segment is covered or the per-segment request cap is hit. A
//! precomputed episode lists the chunks of a mesh file up front and fetches them closest-first through a bounded pool.
//!
//! Every episode can be cancelled. Geometry that was delivered before the cancellation stays; results still in flight are
//! dropped.

mod config;
mod coordinator;
mod error;
mod sink;
mod spatial_map;
mod store;

pub use config::*;
pub use coordinator::*;
pub use error::*;
pub use sink::*;
pub use spatial_map::*;
pub use store::*;

pub use gneiss_core;

/// Identity of a labeled object.
pub type SegmentId = u64;
