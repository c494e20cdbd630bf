use crate::{FetchError, PushError, Voxel};

use gneiss_core::{BucketAddress, SmallKeyHashMap, BUCKET_SIZE};

use std::cell::{Cell, RefCell};
use std::future::Future;

/// The remote store that owns the authoritative bucket payloads.
pub trait DataStore {
    /// Fetches a batch of buckets. The response is in request order; `None` means the bucket does not exist.
    ///
    /// A response shorter than the request resolves only the returned prefix.
    fn fetch_buckets(
        &self,
        batch: &[BucketAddress],
    ) -> impl Future<Output = Result<Vec<Option<Box<[Voxel]>>>, FetchError>>;

    fn push_buckets(&self, batch: &[(BucketAddress, Box<[Voxel]>)]) -> impl Future<Output = Result<(), PushError>>;
}

/// A [`DataStore`] that keeps everything in memory and resolves immediately.
///
/// Failures can be scripted, and every request is logged, which makes it the store of choice for tests and replays.
#[derive(Default)]
pub struct MemoryStore {
    buckets: RefCell<SmallKeyHashMap<BucketAddress, Box<[Voxel]>>>,
    fetch_log: RefCell<Vec<Vec<BucketAddress>>>,
    push_log: RefCell<Vec<Vec<BucketAddress>>>,
    failing_fetches: Cell<u32>,
    failing_pushes: Cell<u32>,
    max_response_len: Cell<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, address: BucketAddress, voxels: Box<[Voxel]>) {
        assert_eq!(voxels.len(), BUCKET_SIZE);
        self.buckets.borrow_mut().insert(address, voxels);
    }

    pub fn insert_filled(&self, address: BucketAddress, value: Voxel) {
        self.insert(address, vec![value; BUCKET_SIZE].into_boxed_slice());
    }

    pub fn get(&self, address: &BucketAddress) -> Option<Box<[Voxel]>> {
        self.buckets.borrow().get(address).cloned()
    }

    /// The next `n` fetches fail with a transport error.
    pub fn fail_next_fetches(&self, n: u32) {
        self.failing_fetches.set(n);
    }

    pub fn fail_next_pushes(&self, n: u32) {
        self.failing_pushes.set(n);
    }

    /// Truncates every fetch response to at most `len` entries.
    pub fn limit_response_len(&self, len: Option<usize>) {
        self.max_response_len.set(len);
    }

    pub fn fetch_log(&self) -> Vec<Vec<BucketAddress>> {
        self.fetch_log.borrow().clone()
    }

    pub fn push_log(&self) -> Vec<Vec<BucketAddress>> {
        self.push_log.borrow().clone()
    }

    pub fn fetched_addresses(&self) -> Vec<BucketAddress> {
        self.fetch_log.borrow().iter().flatten().copied().collect()
    }

    fn take_failure(counter: &Cell<u32>) -> bool {
        let n = counter.get();
        if n > 0 {
            counter.set(n - 1);
        }
        n > 0
    }
}

impl DataStore for MemoryStore {
    fn fetch_buckets(
        &self,
        batch: &[BucketAddress],
    ) -> impl Future<Output = Result<Vec<Option<Box<[Voxel]>>>, FetchError>> {
        self.fetch_log.borrow_mut().push(batch.to_vec());
        let result = if Self::take_failure(&self.failing_fetches) {
            Err(FetchError::Transport("scripted failure".into()))
        } else {
            let len = self.max_response_len.get().map_or(batch.len(), |m| m.min(batch.len()));
            let buckets = self.buckets.borrow();
            Ok(batch[..len].iter().map(|a| buckets.get(a).cloned()).collect())
        };
        futures::future::ready(result)
    }

    fn push_buckets(&self, batch: &[(BucketAddress, Box<[Voxel]>)]) -> impl Future<Output = Result<(), PushError>> {
        self.push_log
            .borrow_mut()
            .push(batch.iter().map(|(a, _)| *a).collect());
        let result = if Self::take_failure(&self.failing_pushes) {
            Err(PushError::Transport("scripted failure".into()))
        } else {
            let mut buckets = self.buckets.borrow_mut();
            for (address, voxels) in batch.iter() {
                buckets.insert(*address, voxels.clone());
            }
            Ok(())
        };
        futures::future::ready(result)
    }
}
