//! Bucket streaming, caching and write-back.
//!
//! # Data Flow
//!
//! The viewport reports a [`ViewState`] every frame. A [`PrefetchStrategy`] turns it into a priority-ordered list of bucket
//! addresses, which the [`PullQueue`] deduplicates and fetches from a [`DataStore`] in batches. Fetched payloads land in the
//! [`Cube`], which notifies the listeners of each bucket.
//!
//! Buckets that are written before their payload arrives are "temporal". The [`TemporalBucketManager`] makes sure their pull is
//! latency-critical and that, once the payload has been merged, the edited bucket lands on the [`PushQueue`]. The
//! [`SaveProcess`] drains the push queue back into the store after all temporal buckets have settled.
//!
//! # Threading
//!
//! Everything here lives on one thread and is shared through `Rc<RefCell<_>>`. The only exception is the [`PickerWorker`],
//! which computes prefetch picks on a background thread from an owned snapshot of the view.

mod bucket;
mod config;
mod cube;
mod error;
mod picker;
mod prefetch;
mod pull_queue;
mod push_queue;
mod remote;
mod save;
mod temporal;

pub use bucket::*;
pub use config::*;
pub use cube::*;
pub use error::*;
pub use picker::*;
pub use prefetch::*;
pub use pull_queue::*;
pub use push_queue::*;
pub use remote::*;
pub use save::*;
pub use temporal::*;

pub use gneiss_core;
