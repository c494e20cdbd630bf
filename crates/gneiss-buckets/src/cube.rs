use crate::{Bucket, CubeConfig, LoadNotification, SharedPushQueue, TemporalBucketManager, Voxel};

use gneiss_core::glam::IVec3;
use gneiss_core::{
    global_position_to_bucket, voxel_index_in_bucket, BucketAddress, ResolutionInfo, SmallKeyHashMap, VoxelUnits,
};

use std::cell::RefCell;
use std::rc::Rc;

pub type SharedCube = Rc<RefCell<Cube>>;

/// Routes a fetched payload to its bucket and notifies the bucket's listeners after the cube borrow is released, so a
/// listener may read or edit the cube.
pub fn receive_data_shared(cube: &SharedCube, address: BucketAddress, payload: Option<Box<[Voxel]>>) {
    let Some(notification) = cube.borrow_mut().merge_payload(address, payload) else {
        return;
    };
    let kept = notification.notify();
    if kept.is_empty() {
        return;
    }
    match cube.borrow_mut().get_bucket_mut(&address) {
        Some(bucket) => bucket.restore_listeners(kept),
        None => log::warn!("Bucket {address} was evicted while notifying its listeners"),
    }
}

/// The bucket store of one data layer.
///
/// Buckets are created on first reference and evicted by [`Cube::collect_garbage`], which never drops a bucket that is
/// dirty, requested, or still has listeners (temporal buckets have both).
pub struct Cube {
    resolutions: ResolutionInfo,
    config: CubeConfig,
    push_queue: SharedPushQueue,
    buckets: SmallKeyHashMap<BucketAddress, CachedBucket>,
    access_clock: u64,
}

struct CachedBucket {
    bucket: Bucket,
    last_access: u64,
}

impl Cube {
    pub fn new(resolutions: ResolutionInfo, config: CubeConfig, push_queue: SharedPushQueue) -> Self {
        Self {
            resolutions,
            config,
            push_queue,
            buckets: Default::default(),
            access_clock: 0,
        }
    }

    pub fn into_shared(self) -> SharedCube {
        Rc::new(RefCell::new(self))
    }

    pub fn resolutions(&self) -> &ResolutionInfo {
        &self.resolutions
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn get_bucket(&self, address: &BucketAddress) -> Option<&Bucket> {
        self.buckets.get(address).map(|c| &c.bucket)
    }

    pub fn get_bucket_mut(&mut self, address: &BucketAddress) -> Option<&mut Bucket> {
        self.access_clock += 1;
        let clock = self.access_clock;
        self.buckets.get_mut(address).map(|c| {
            c.last_access = clock;
            &mut c.bucket
        })
    }

    pub fn get_or_create_bucket(&mut self, address: BucketAddress) -> &mut Bucket {
        self.access_clock += 1;
        let clock = self.access_clock;
        let cached = self.buckets.entry(address).or_insert_with(|| CachedBucket {
            bucket: Bucket::new(address),
            last_access: clock,
        });
        cached.last_access = clock;
        &mut cached.bucket
    }

    /// `true` if the bucket at `address` has its payload (or is known to be missing).
    pub fn is_loaded(&self, address: &BucketAddress) -> bool {
        self.get_bucket(address).is_some_and(Bucket::is_loaded)
    }

    pub fn voxel_at(&self, position: VoxelUnits<IVec3>, zoom_step: u8) -> Option<Voxel> {
        let address = global_position_to_bucket(position, &self.resolutions, zoom_step)?;
        let index = voxel_index_in_bucket(position, &self.resolutions, zoom_step)?;
        self.get_bucket(&address)?.voxel(index)
    }

    /// Writes the voxel containing the global `position` at `zoom_step`.
    ///
    /// A loaded bucket is queued for push right away. A bucket that is not loaded yet becomes temporal: `temporal` tracks it
    /// and queues the push once the payload has been merged. Returns the address of the written bucket, or `None` if the
    /// dataset has no mag at `zoom_step`.
    pub fn label_voxel(
        &mut self,
        position: VoxelUnits<IVec3>,
        zoom_step: u8,
        value: Voxel,
        temporal: &TemporalBucketManager,
    ) -> Option<BucketAddress> {
        let address = global_position_to_bucket(position, &self.resolutions, zoom_step)?;
        let index = voxel_index_in_bucket(position, &self.resolutions, zoom_step)?;

        let push_queue = self.push_queue.clone();
        let bucket = self.get_or_create_bucket(address);
        bucket.label_voxel(index, value);
        if bucket.is_loaded() {
            push_queue.borrow_mut().insert(address);
        } else {
            temporal.track_bucket(bucket);
        }
        Some(address)
    }

    /// Routes a fetched payload to its bucket.
    pub fn receive_data(&mut self, address: BucketAddress, payload: Option<Box<[Voxel]>>) {
        self.get_or_create_bucket(address).receive_data(payload);
    }

    pub fn merge_payload(&mut self, address: BucketAddress, payload: Option<Box<[Voxel]>>) -> Option<LoadNotification> {
        self.get_or_create_bucket(address).merge_payload(payload)
    }

    /// Evicts the least recently used evictable buckets until at most `max_bucket_count` remain. Returns the number evicted.
    ///
    /// If too many buckets are pinned, the cube stays above the limit.
    pub fn collect_garbage(&mut self) -> usize {
        let max = self.config.max_bucket_count;
        if self.buckets.len() <= max {
            return 0;
        }

        let mut candidates: Vec<_> = self
            .buckets
            .iter()
            .filter(|(_, c)| is_evictable(&c.bucket))
            .map(|(address, c)| (c.last_access, *address))
            .collect();
        candidates.sort_unstable();

        let excess = self.buckets.len() - max;
        let evicted = excess.min(candidates.len());
        for (_, address) in candidates.into_iter().take(evicted) {
            self.buckets.remove(&address);
        }
        if evicted < excess {
            log::warn!(
                "Cube holds {} buckets, above the limit of {max}; the rest are dirty or in flight",
                self.buckets.len()
            );
        }
        evicted
    }
}

fn is_evictable(bucket: &Bucket) -> bool {
    !bucket.is_dirty() && !bucket.is_requested() && !bucket.has_listeners()
}
