//! Streaming, caching and write-back of large voxel volumes, plus on-demand segment meshes.
//!
//! The heavy lifting lives in the workspace crates, re-exported here:
//!
//! - [`gneiss_core`]: bucket addressing, priority queues, polyhedron rasterization, retry backoff and cancellation.
//! - [`gneiss_buckets`]: the bucket cache and the pull, push, prefetch and temporal machinery around it.
//! - [`gneiss_mesh`]: the mesh stream coordinator.
//!
//! [`StreamingSession`] wires the bucket side together for one viewer, configured by a [`Config`].

mod config;
mod session;

pub use config::{Config, ConfigError};
pub use session::{SessionError, StreamingSession};

pub use gneiss_buckets;
pub use gneiss_core;
pub use gneiss_mesh;
