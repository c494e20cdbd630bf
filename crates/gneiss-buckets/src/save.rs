use crate::{DataStore, PushError, SaveConfig, SharedCube, SharedPushQueue, TemporalBucketManager};

use std::rc::Rc;

/// Drains the [`PushQueue`](crate::PushQueue) into the store.
pub struct SaveProcess<S> {
    store: Rc<S>,
    cube: SharedCube,
    push_queue: SharedPushQueue,
    temporal: Rc<TemporalBucketManager>,
    config: SaveConfig,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SaveReport {
    pub batches: usize,
    pub pushed: usize,
    /// Buckets that were edited again while their push was in flight. They stay dirty.
    pub still_dirty: usize,
}

impl<S: DataStore> SaveProcess<S> {
    pub fn new(
        store: Rc<S>,
        cube: SharedCube,
        push_queue: SharedPushQueue,
        temporal: Rc<TemporalBucketManager>,
        config: SaveConfig,
    ) -> Self {
        Self {
            store,
            cube,
            push_queue,
            temporal,
            config,
        }
    }

    /// Waits for every temporal bucket to settle, then pushes the whole queue in batches.
    ///
    /// A bucket is marked clean only if it was not edited after its snapshot was taken. A failed batch goes back into the push
    /// queue before the error is returned, so nothing is lost.
    pub async fn save_now(&self) -> Result<SaveReport, PushError> {
        self.temporal.all_settled().await;

        let mut report = SaveReport::default();
        loop {
            let addresses = self.push_queue.borrow_mut().drain_batch(self.config.batch_size.max(1));
            if addresses.is_empty() {
                break;
            }

            let mut generations = Vec::with_capacity(addresses.len());
            let mut payloads = Vec::with_capacity(addresses.len());
            {
                let cube = self.cube.borrow();
                for address in addresses.iter() {
                    let Some(bucket) = cube.get_bucket(address) else {
                        log::warn!("Queued bucket {address} is no longer cached");
                        continue;
                    };
                    let Some(voxels) = bucket.voxels() else {
                        continue;
                    };
                    generations.push(bucket.edit_generation());
                    payloads.push((*address, Box::<[_]>::from(voxels)));
                }
            }
            if payloads.is_empty() {
                continue;
            }

            if let Err(e) = self.store.push_buckets(&payloads).await {
                log::error!("Failed to push {} bucket(s): {e}", payloads.len());
                let mut push_queue = self.push_queue.borrow_mut();
                for (address, _) in payloads.iter() {
                    push_queue.insert(*address);
                }
                return Err(e);
            }

            report.batches += 1;
            report.pushed += payloads.len();
            let mut cube = self.cube.borrow_mut();
            for ((address, _), generation) in payloads.iter().zip(generations) {
                if let Some(bucket) = cube.get_bucket_mut(address) {
                    if !bucket.mark_clean(generation) {
                        report.still_dirty += 1;
                    }
                }
            }
        }
        log::info!("Saved {} bucket(s) in {} batch(es)", report.pushed, report.batches);
        Ok(report)
    }
}
