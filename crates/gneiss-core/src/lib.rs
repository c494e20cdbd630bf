//! Dataset-agnostic building blocks for bucket streaming.
//!
//! # Buckets
//!
//! A dataset is partitioned into cubes of `32³` voxels called buckets. A bucket is addressed by its integer coordinates and
//! the zoom step (magnification index) it belongs to; see [`BucketAddress`]. Converting a global voxel position into a bucket
//! address is exact integer arithmetic, because the address is the key for every cache lookup.
//!
//! # Work Queues
//!
//! [`PriorityWorkQueue`] is the min-priority queue shared by the prefetch strategies and the pull queue. It keeps at most one
//! entry per item and serves ties in insertion order.

pub mod address;
pub mod backoff;
pub mod geometry;
pub mod resolution;
pub mod units;
pub mod work_queue;

pub use address::*;
pub use backoff::{Backoff, Delay, RecordingDelay, TimerDelay};
pub use resolution::{ResolutionError, ResolutionInfo};
pub use units::*;
pub use work_queue::PriorityWorkQueue;

use ahash::{AHashMap, AHashSet};
pub type SmallKeyHashMap<K, V> = AHashMap<K, V>;
pub type SmallKeyHashSet<K> = AHashSet<K>;

// Re-exports.
pub use glam;
pub use smallvec;
