use crate::{
    receive_data_shared, DataStore, PullError, PullQueueConfig, PullScheduler, SharedCube, Voxel, PRIORITY_HIGHEST,
};

use gneiss_core::work_queue::InsertOutcome;
use gneiss_core::{BucketAddress, Delay, PriorityWorkQueue, SmallKeyHashSet, TimerDelay, BUCKET_SIZE};

use futures::executor::LocalSpawner;
use futures::stream::{self, StreamExt};
use futures::task::LocalSpawnExt;
use std::cell::RefCell;
use std::rc::Rc;

/// Deduplicated, prioritized bucket requests, fetched from a [`DataStore`] in batches.
///
/// An address is either queued (at most once, with the most urgent priority it was added with), in flight, or neither. Adding
/// an in-flight address is a no-op, so overlapping calls to [`PullQueue::pull`] never fetch the same bucket twice.
pub struct PullQueue<S, D = TimerDelay> {
    store: Rc<S>,
    cube: SharedCube,
    delay: D,
    config: PullQueueConfig,
    queue: RefCell<PriorityWorkQueue<BucketAddress>>,
    in_flight: RefCell<SmallKeyHashSet<BucketAddress>>,
}

/// What one call to [`PullQueue::pull`] accomplished.
#[derive(Debug, Default)]
pub struct PullReport {
    pub batches: usize,
    pub loaded: usize,
    pub missing: usize,
    /// Addresses given up on. They are `Unrequested` again and can be re-added.
    pub failures: Vec<PullError>,
}

impl PullReport {
    pub fn failed_addresses(&self) -> impl Iterator<Item = &BucketAddress> {
        self.failures.iter().flat_map(|e| match e {
            PullError::RetriesExhausted { addresses, .. } => addresses.iter(),
        })
    }

    fn merge(&mut self, other: Self) {
        self.batches += other.batches;
        self.loaded += other.loaded;
        self.missing += other.missing;
        self.failures.extend(other.failures);
    }
}

impl<S: DataStore, D: Delay> PullQueue<S, D> {
    pub fn new(store: Rc<S>, cube: SharedCube, delay: D, config: PullQueueConfig) -> Self {
        Self {
            store,
            cube,
            delay,
            config,
            queue: Default::default(),
            in_flight: Default::default(),
        }
    }

    pub fn config(&self) -> &PullQueueConfig {
        &self.config
    }

    /// The number of queued (not in-flight) addresses.
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    pub fn priority_of(&self, address: &BucketAddress) -> Option<f64> {
        self.queue.borrow().priority_of(address)
    }

    pub fn is_in_flight(&self, address: &BucketAddress) -> bool {
        self.in_flight.borrow().contains(address)
    }

    /// Queues `address`, or makes its queued entry more urgent. Never makes an entry less urgent.
    ///
    /// Returns `false` if nothing changed, including when `address` is already in flight.
    pub fn add(&self, address: BucketAddress, priority: f64) -> bool {
        if self.is_in_flight(&address) {
            return false;
        }
        self.queue.borrow_mut().insert(address, priority) != InsertOutcome::Unchanged
    }

    /// Drops every queued entry except the latency-critical ones, so a new prefetch pick can replace the old one.
    pub fn clear_normal_priorities(&self) {
        let mut queue = self.queue.borrow_mut();
        let urgent: Vec<_> = queue.iter().filter(|&(_, p)| p <= PRIORITY_HIGHEST).collect();
        queue.clear();
        for (address, priority) in urgent {
            queue.insert(address, priority);
        }
    }

    /// Fetches queued buckets until the queue is empty, with at most `max_parallel_batches` batches in flight.
    ///
    /// Addresses that are already loaded are dropped without a request. Each batch retries its unresolved remainder with
    /// backoff; after the last retry the remainder is reported and put back to `Unrequested`.
    pub async fn pull(&self) -> PullReport {
        let mut report = PullReport::default();
        loop {
            let batches = self.take_batches();
            if batches.is_empty() {
                break;
            }
            log::debug!("Pulling {} batch(es)", batches.len());
            let round: Vec<_> = stream::iter(batches)
                .map(|batch| self.pull_batch(batch))
                .buffer_unordered(self.config.max_parallel_batches.max(1))
                .collect()
                .await;
            for batch_report in round {
                report.merge(batch_report);
            }
        }
        report
    }

    fn take_batches(&self) -> Vec<Vec<BucketAddress>> {
        let batch_size = self.config.batch_size.max(1);
        let max_addresses = batch_size * self.config.max_parallel_batches.max(1);

        let mut queue = self.queue.borrow_mut();
        let mut cube = self.cube.borrow_mut();
        let mut in_flight = self.in_flight.borrow_mut();
        let mut addresses = Vec::with_capacity(max_addresses);
        while addresses.len() < max_addresses {
            let Some((address, _)) = queue.pop_min() else {
                break;
            };
            let bucket = cube.get_or_create_bucket(address);
            if bucket.is_loaded() {
                continue;
            }
            bucket.mark_requested();
            in_flight.insert(address);
            addresses.push(address);
        }
        addresses.chunks(batch_size).map(<[_]>::to_vec).collect()
    }

    async fn pull_batch(&self, mut pending: Vec<BucketAddress>) -> PullReport {
        let mut report = PullReport {
            batches: 1,
            ..Default::default()
        };
        let backoff = self.config.retry;
        let mut failures = 0;
        loop {
            match self.store.fetch_buckets(&pending).await {
                Ok(responses) => {
                    let resolved = self.deliver(&pending, responses, &mut report);
                    pending.drain(..resolved);
                    if pending.is_empty() {
                        return report;
                    }
                    log::warn!("Store resolved {resolved} bucket(s), {} left to retry", pending.len());
                }
                Err(e) => log::warn!("Failed to fetch {} bucket(s): {e}", pending.len()),
            }

            failures += 1;
            if !backoff.should_retry(failures) {
                log::error!("Giving up on {} bucket(s) after {failures} failed attempts", pending.len());
                self.release(&pending);
                report.failures.push(PullError::RetriesExhausted {
                    addresses: pending,
                    attempts: failures,
                });
                return report;
            }
            self.delay.delay(backoff.delay_after_failure(failures)).await;
        }
    }

    /// Routes the prefix of `responses` to the cube. Stops at the first malformed payload. Returns how many were resolved.
    fn deliver(
        &self,
        pending: &[BucketAddress],
        responses: Vec<Option<Box<[Voxel]>>>,
        report: &mut PullReport,
    ) -> usize {
        let mut resolved = 0;
        for (&address, payload) in pending.iter().zip(responses) {
            if payload.as_ref().is_some_and(|p| p.len() != BUCKET_SIZE) {
                log::warn!("Malformed payload for bucket {address}");
                break;
            }
            if payload.is_some() {
                report.loaded += 1;
            } else {
                report.missing += 1;
            }
            self.in_flight.borrow_mut().remove(&address);
            receive_data_shared(&self.cube, address, payload);
            resolved += 1;
        }
        resolved
    }

    fn release(&self, addresses: &[BucketAddress]) {
        let mut in_flight = self.in_flight.borrow_mut();
        let mut cube = self.cube.borrow_mut();
        for address in addresses {
            in_flight.remove(address);
            if let Some(bucket) = cube.get_bucket_mut(address) {
                bucket.mark_unrequested();
            }
        }
    }
}

/// Adds latency-critical addresses to a shared [`PullQueue`] and spawns a pull for each on a local executor.
pub struct SpawningPullScheduler<S, D> {
    pull_queue: Rc<PullQueue<S, D>>,
    spawner: LocalSpawner,
}

impl<S, D> SpawningPullScheduler<S, D> {
    pub fn new(pull_queue: Rc<PullQueue<S, D>>, spawner: LocalSpawner) -> Self {
        Self { pull_queue, spawner }
    }
}

impl<S: DataStore + 'static, D: Delay + 'static> PullScheduler for SpawningPullScheduler<S, D> {
    fn schedule_pull(&self, address: BucketAddress, priority: f64) {
        self.pull_queue.add(address, priority);
        let pull_queue = self.pull_queue.clone();
        let spawned = self.spawner.spawn_local(async move {
            let report = pull_queue.pull().await;
            if !report.failures.is_empty() {
                log::error!("Latency-critical pull failed: {:?}", report.failures);
            }
        });
        if let Err(e) = spawned {
            log::error!("Failed to spawn pull for bucket {address}: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{BucketState, Cube, CubeConfig, MemoryStore, PushQueue};

    use futures::executor::block_on;
    use gneiss_core::{Backoff, RecordingDelay, ResolutionInfo};
    use std::time::Duration;

    fn setup(config: PullQueueConfig) -> (PullQueue<MemoryStore, RecordingDelay>, Rc<MemoryStore>, SharedCube, RecordingDelay) {
        let store = Rc::new(MemoryStore::new());
        let cube = Cube::new(ResolutionInfo::isotropic(0), CubeConfig::default(), PushQueue::new_shared()).into_shared();
        let delay = RecordingDelay::default();
        let queue = PullQueue::new(store.clone(), cube.clone(), delay.clone(), config);
        (queue, store, cube, delay)
    }

    fn addr(x: i32) -> BucketAddress {
        BucketAddress::new(x, 0, 0, 0)
    }

    #[test]
    fn duplicate_add_keeps_minimum_priority() {
        let (queue, _, _, _) = setup(PullQueueConfig::default());

        for (p1, p2) in [(3.0, 5.0), (5.0, 3.0), (4.0, 4.0)] {
            queue.add(addr(0), p1);
            queue.add(addr(0), p2);
            assert_eq!(queue.len(), 1);
            assert_eq!(queue.priority_of(&addr(0)), Some(f64::min(p1, p2)));
            queue.clear_normal_priorities();
        }
    }

    #[test]
    fn clear_keeps_latency_critical_entries() {
        let (queue, _, _, _) = setup(PullQueueConfig::default());
        queue.add(addr(0), 2.0);
        queue.add(addr(1), PRIORITY_HIGHEST);

        queue.clear_normal_priorities();

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.priority_of(&addr(1)), Some(PRIORITY_HIGHEST));
    }

    #[test]
    fn pulls_in_priority_order_and_batches() {
        let (queue, store, cube, _) = setup(PullQueueConfig {
            batch_size: 2,
            max_parallel_batches: 1,
            ..Default::default()
        });
        store.insert_filled(addr(1), 1);
        store.insert_filled(addr(2), 2);
        queue.add(addr(2), 2.0);
        queue.add(addr(1), 1.0);
        queue.add(addr(3), 3.0);

        let report = block_on(queue.pull());

        assert_eq!(store.fetch_log(), vec![vec![addr(1), addr(2)], vec![addr(3)]]);
        assert_eq!((report.batches, report.loaded, report.missing), (2, 2, 1));
        let cube = cube.borrow();
        assert_eq!(cube.get_bucket(&addr(2)).unwrap().voxel(0), Some(2));
        assert_eq!(cube.get_bucket(&addr(3)).unwrap().state(), BucketState::Missing);
    }

    #[test]
    fn loaded_buckets_are_not_fetched_again() {
        let (queue, store, _, _) = setup(PullQueueConfig::default());
        queue.add(addr(0), 0.0);
        block_on(queue.pull());
        queue.add(addr(0), 0.0);
        block_on(queue.pull());

        assert_eq!(store.fetched_addresses(), vec![addr(0)]);
    }

    #[test]
    fn short_response_retries_remainder() {
        let (queue, store, cube, delay) = setup(PullQueueConfig::default());
        store.limit_response_len(Some(1));
        queue.add(addr(0), 0.0);
        queue.add(addr(1), 1.0);
        queue.add(addr(2), 2.0);

        let report = block_on(queue.pull());

        assert_eq!(
            store.fetch_log(),
            vec![vec![addr(0), addr(1), addr(2)], vec![addr(1), addr(2)], vec![addr(2)]]
        );
        assert!(report.failures.is_empty());
        assert_eq!(delay.requested(), vec![Duration::from_millis(200), Duration::from_millis(400)]);
        assert!((0..3).all(|x| cube.borrow().is_loaded(&addr(x))));
    }

    #[test]
    fn exhausted_retries_release_addresses() {
        let (queue, store, cube, delay) = setup(PullQueueConfig {
            retry: Backoff::new(2, Duration::from_millis(10), 2),
            ..Default::default()
        });
        store.fail_next_fetches(3);
        queue.add(addr(0), 0.0);

        let report = block_on(queue.pull());

        assert_eq!(store.fetch_log().len(), 3);
        assert_eq!(delay.total(), Duration::from_millis(20 + 40));
        assert_eq!(report.failed_addresses().copied().collect::<Vec<_>>(), vec![addr(0)]);
        assert!(!queue.is_in_flight(&addr(0)));
        assert_eq!(cube.borrow().get_bucket(&addr(0)).unwrap().state(), BucketState::Unrequested);

        // The address can be pulled again.
        assert!(queue.add(addr(0), 0.0));
        let report = block_on(queue.pull());
        assert_eq!(report.missing, 1);
    }

    #[test]
    fn in_flight_addresses_are_not_requeued() {
        let (queue, store, _, _) = setup(PullQueueConfig::default());
        queue.add(addr(0), 0.0);

        let batches = queue.take_batches();
        assert!(queue.is_in_flight(&addr(0)));
        assert!(!queue.add(addr(0), 0.0));
        assert!(queue.is_empty());

        for batch in batches {
            block_on(queue.pull_batch(batch));
        }
        block_on(queue.pull());

        assert_eq!(store.fetched_addresses(), vec![addr(0)]);
        assert!(!queue.is_in_flight(&addr(0)));
    }

    #[test]
    fn listeners_may_read_the_cube() {
        let (queue, store, cube, _) = setup(PullQueueConfig::default());
        store.insert_filled(addr(0), 3);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let (c, s) = (cube.clone(), seen.clone());
        cube.borrow_mut()
            .get_or_create_bucket(addr(0))
            .subscribe(move |event| {
                let voxel = c.borrow().get_bucket(&event.address).and_then(|b| b.voxel(0));
                s.borrow_mut().push(voxel);
            });
        queue.add(addr(0), 0.0);

        block_on(queue.pull());

        assert_eq!(*seen.borrow(), vec![Some(3)]);
        assert!(cube.borrow().get_bucket(&addr(0)).unwrap().has_listeners());
    }
}
