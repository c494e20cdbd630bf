use crate::{Bucket, BucketLoaded, SharedPushQueue};

use gneiss_core::{BucketAddress, SmallKeyHashSet};

use std::future::Future;
use std::rc::Rc;
use tokio::sync::watch;

/// More urgent than any prefetch priority, which are all non-negative.
pub const PRIORITY_HIGHEST: f64 = -1.0;

/// Where the [`TemporalBucketManager`] sends latency-critical pulls.
pub trait PullScheduler {
    /// Enqueues `address` at `priority` and makes sure a pull will run soon.
    fn schedule_pull(&self, address: BucketAddress, priority: f64);
}

/// The tracked set, published so that [`TemporalBucketManager::all_settled`] can wait for it to drain.
struct Settlement {
    tracked: watch::Sender<SmallKeyHashSet<BucketAddress>>,
}

impl Default for Settlement {
    fn default() -> Self {
        Self {
            tracked: watch::Sender::new(Default::default()),
        }
    }
}

impl Settlement {
    fn settle(&self, event: &BucketLoaded, push_queue: &SharedPushQueue) {
        if !self.tracked.borrow().contains(&event.address) {
            return;
        }
        if event.dirty {
            push_queue.borrow_mut().insert(event.address);
        }
        self.tracked.send_modify(|tracked| {
            tracked.remove(&event.address);
        });
        log::debug!("Temporal bucket {} settled (dirty = {})", event.address, event.dirty);
    }
}

/// Tracks buckets that were written before their payload arrived.
///
/// Each tracked bucket is settled exactly once: when its payload has been merged, it is queued for push if it is still dirty,
/// and then it leaves the tracked set.
pub struct TemporalBucketManager {
    scheduler: Rc<dyn PullScheduler>,
    push_queue: SharedPushQueue,
    settlement: Rc<Settlement>,
}

impl TemporalBucketManager {
    pub fn new(scheduler: Rc<dyn PullScheduler>, push_queue: SharedPushQueue) -> Self {
        Self {
            scheduler,
            push_queue,
            settlement: Default::default(),
        }
    }

    /// The number of tracked buckets that have not settled yet.
    pub fn count(&self) -> usize {
        self.settlement.tracked.borrow().len()
    }

    pub fn is_tracked(&self, address: &BucketAddress) -> bool {
        self.settlement.tracked.borrow().contains(address)
    }

    /// Starts tracking a bucket that is not loaded yet. Returns `false` if it is loaded or already tracked.
    pub fn track_bucket(&self, bucket: &mut Bucket) -> bool {
        let address = bucket.address();
        if bucket.is_loaded() || !self.settlement.tracked.send_if_modified(|tracked| tracked.insert(address)) {
            return false;
        }
        log::debug!("Tracking temporal bucket {address}");

        let settlement = self.settlement.clone();
        let push_queue = self.push_queue.clone();
        bucket.subscribe_once(move |event| settlement.settle(event, &push_queue));

        self.scheduler.schedule_pull(address, PRIORITY_HIGHEST);
        true
    }

    /// Tracked addresses in no particular order.
    pub fn tracked(&self) -> Vec<BucketAddress> {
        self.settlement.tracked.borrow().iter().copied().collect()
    }

    /// Schedules another latency-critical pull for a tracked bucket whose previous pull gave up. Returns `false` if `address`
    /// is not tracked.
    pub fn reschedule(&self, address: BucketAddress) -> bool {
        if !self.is_tracked(&address) {
            return false;
        }
        log::warn!("Re-requesting temporal bucket {address}");
        self.scheduler.schedule_pull(address, PRIORITY_HIGHEST);
        true
    }

    /// Completes once no bucket is tracked, including buckets that start being tracked while waiting.
    pub fn all_settled(&self) -> impl Future<Output = ()> + 'static {
        let mut tracked = self.settlement.tracked.subscribe();
        async move {
            // Err once the manager is dropped.
            let _ = tracked.wait_for(|tracked| tracked.is_empty()).await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::PushQueue;

    use futures::executor::LocalPool;
    use futures::task::LocalSpawnExt;
    use gneiss_core::BUCKET_SIZE;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct RecordingScheduler {
        scheduled: RefCell<Vec<(BucketAddress, f64)>>,
    }

    impl PullScheduler for RecordingScheduler {
        fn schedule_pull(&self, address: BucketAddress, priority: f64) {
            self.scheduled.borrow_mut().push((address, priority));
        }
    }

    fn manager() -> (TemporalBucketManager, Rc<RecordingScheduler>, SharedPushQueue) {
        let scheduler = Rc::new(RecordingScheduler::default());
        let push_queue = PushQueue::new_shared();
        let manager = TemporalBucketManager::new(scheduler.clone(), push_queue.clone());
        (manager, scheduler, push_queue)
    }

    fn payload() -> Option<Box<[u32]>> {
        Some(vec![1; BUCKET_SIZE].into_boxed_slice())
    }

    #[test]
    fn tracking_schedules_highest_priority_pull() {
        let (manager, scheduler, _) = manager();
        let mut bucket = Bucket::new(BucketAddress::new(0, 0, 0, 1));

        assert!(manager.track_bucket(&mut bucket));
        assert!(!manager.track_bucket(&mut bucket));

        assert_eq!(
            *scheduler.scheduled.borrow(),
            vec![(BucketAddress::new(0, 0, 0, 1), PRIORITY_HIGHEST)]
        );
        assert_eq!(manager.count(), 1);
    }

    #[test]
    fn dirty_settlement_pushes_exactly_once() {
        let (manager, _, push_queue) = manager();
        let mut bucket = Bucket::new(BucketAddress::new(0, 0, 0, 0));
        bucket.label_voxel(0, 9);
        manager.track_bucket(&mut bucket);

        bucket.receive_data(payload());
        bucket.receive_data(payload());

        assert_eq!(push_queue.borrow().len(), 1);
        assert!(push_queue.borrow().contains(&bucket.address()));
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn clean_settlement_leaves_push_queue_alone() {
        let (manager, _, push_queue) = manager();
        let mut bucket = Bucket::new(BucketAddress::new(0, 0, 0, 0));
        manager.track_bucket(&mut bucket);

        bucket.receive_data(payload());

        assert!(push_queue.borrow().is_empty());
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn reschedule_only_tracked_buckets() {
        let (manager, scheduler, _) = manager();
        let mut bucket = Bucket::new(BucketAddress::new(2, 0, 0, 0));
        manager.track_bucket(&mut bucket);

        assert!(manager.reschedule(bucket.address()));
        assert!(!manager.reschedule(BucketAddress::new(3, 0, 0, 0)));
        assert_eq!(scheduler.scheduled.borrow().len(), 2);
        assert_eq!(manager.tracked(), vec![bucket.address()]);
    }

    #[test]
    fn all_settled_is_immediate_when_nothing_is_tracked() {
        let (manager, _, _) = manager();
        futures::executor::block_on(manager.all_settled());
    }

    #[test]
    fn all_settled_waits_for_late_additions() {
        let (manager, _, _) = manager();
        let mut pool = LocalPool::new();
        let mut a = Bucket::new(BucketAddress::new(0, 0, 0, 0));
        let mut b = Bucket::new(BucketAddress::new(1, 0, 0, 0));
        manager.track_bucket(&mut a);

        let done = Rc::new(Cell::new(false));
        let d = done.clone();
        let settled = manager.all_settled();
        pool.spawner()
            .spawn_local(async move {
                settled.await;
                d.set(true);
            })
            .unwrap();
        pool.run_until_stalled();
        assert!(!done.get());

        manager.track_bucket(&mut b);
        a.receive_data(payload());
        pool.run_until_stalled();
        assert!(!done.get());

        b.receive_data(None);
        pool.run_until_stalled();
        assert!(done.get());
    }
}
