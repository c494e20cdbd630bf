use crate::Config;

use gneiss_buckets::{
    BucketState, Cube, DataStore, PickRequest, PickerWorker, PrefetchStrategy, PullQueue, PullReport, PushError, PushQueue,
    SaveProcess, SaveReport, SharedCube, SharedPushQueue, SpawningPullScheduler, TemporalBucketManager, ViewState, Voxel,
};
use gneiss_core::glam::IVec3;
use gneiss_core::{BucketAddress, Delay, ResolutionInfo, TimerDelay, VoxelUnits};

use futures::executor::LocalPool;
use std::rc::Rc;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Push(#[from] PushError),
    #[error("{count} temporal bucket(s) could not be loaded; their edits stay queued")]
    Unsettled { count: usize },
}

/// One viewer's connection to a dataset: the bucket cache plus everything that keeps it in sync with a [`DataStore`].
///
/// Pulls spawned for temporal buckets run on the session's local executor. They make progress whenever the session is driven,
/// i.e. during [`StreamingSession::pull`], [`StreamingSession::save`] and [`StreamingSession::run_until_stalled`].
pub struct StreamingSession<S: DataStore + 'static, D: Delay + 'static = TimerDelay> {
    config: Config,
    pool: LocalPool,
    cube: SharedCube,
    push_queue: SharedPushQueue,
    pull_queue: Rc<PullQueue<S, D>>,
    temporal: Rc<TemporalBucketManager>,
    save: SaveProcess<S>,
    picker: Option<PickerWorker>,
}

impl<S: DataStore + 'static> StreamingSession<S> {
    pub fn new(store: Rc<S>, resolutions: ResolutionInfo, config: Config) -> Self {
        Self::with_delay(store, resolutions, TimerDelay, config)
    }
}

impl<S: DataStore + 'static, D: Delay + 'static> StreamingSession<S, D> {
    pub fn with_delay(store: Rc<S>, resolutions: ResolutionInfo, delay: D, config: Config) -> Self {
        let pool = LocalPool::new();
        let push_queue = PushQueue::new_shared();
        let cube = Cube::new(resolutions, config.cube, push_queue.clone()).into_shared();
        let pull_queue = Rc::new(PullQueue::new(store.clone(), cube.clone(), delay, config.pull));
        let scheduler = Rc::new(SpawningPullScheduler::new(pull_queue.clone(), pool.spawner()));
        let temporal = Rc::new(TemporalBucketManager::new(scheduler, push_queue.clone()));
        let save = SaveProcess::new(store, cube.clone(), push_queue.clone(), temporal.clone(), config.save);
        let picker = config.background_picker.then(PickerWorker::spawn);

        Self {
            config,
            pool,
            cube,
            push_queue,
            pull_queue,
            temporal,
            save,
            picker,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cube(&self) -> &SharedCube {
        &self.cube
    }

    pub fn push_queue(&self) -> &SharedPushQueue {
        &self.push_queue
    }

    pub fn pull_queue(&self) -> &PullQueue<S, D> {
        &self.pull_queue
    }

    pub fn temporal(&self) -> &TemporalBucketManager {
        &self.temporal
    }

    /// Replaces the queued prefetch work with a pick for `view`. Latency-critical entries stay queued.
    ///
    /// With a background picker, the pick for `view` is requested and the newest finished pick (possibly for an older view) is
    /// applied instead. Returns the number of picked addresses.
    pub fn update_view(&mut self, view: &ViewState) -> usize {
        let picks = match self.picker.as_mut() {
            Some(picker) => {
                picker.request(PickRequest {
                    view: view.clone(),
                    resolutions: self.cube.borrow().resolutions().clone(),
                    config: self.config.prefetch,
                });
                match picker.try_latest() {
                    Some(result) => result.buckets,
                    None => return 0,
                }
            }
            None => {
                let strategy = PrefetchStrategy::for_mode(view.mode, &self.config.prefetch);
                strategy.pick(view, self.cube.borrow().resolutions())
            }
        };

        self.pull_queue.clear_normal_priorities();
        for &(address, priority) in picks.iter() {
            self.pull_queue.add(address, priority);
        }
        log::debug!("Picked {} bucket(s) for {:?} view", picks.len(), view.mode);
        picks.len()
    }

    /// Fetches everything queued, then evicts old buckets if the cube is over its limit.
    pub fn pull(&mut self) -> PullReport {
        let report = self.pool.run_until(self.pull_queue.pull());
        let evicted = self.cube.borrow_mut().collect_garbage();
        if evicted > 0 {
            log::debug!("Evicted {evicted} bucket(s)");
        }
        report
    }

    /// Polls spawned pulls without blocking on the store.
    pub fn run_until_stalled(&mut self) {
        self.pool.run_until_stalled();
    }

    /// Writes one voxel. See [`Cube::label_voxel`].
    pub fn label_voxel(&mut self, position: VoxelUnits<IVec3>, zoom_step: u8, value: Voxel) -> Option<BucketAddress> {
        self.cube
            .borrow_mut()
            .label_voxel(position, zoom_step, value, &self.temporal)
    }

    pub fn voxel_at(&self, position: VoxelUnits<IVec3>, zoom_step: u8) -> Option<Voxel> {
        self.cube.borrow().voxel_at(position, zoom_step)
    }

    /// Waits for every temporal bucket to load, then pushes all dirty buckets.
    ///
    /// A temporal bucket whose pull gave up is requested once more. If it still cannot be loaded, nothing is pushed and its
    /// edits stay in the cache for a later save.
    pub fn save(&mut self) -> Result<SaveReport, SessionError> {
        self.pool.run();
        if self.reschedule_stranded() > 0 {
            self.pool.run();
        }
        let count = self.temporal.count();
        if count > 0 {
            log::error!("Not saving: {count} temporal bucket(s) are still unloaded");
            return Err(SessionError::Unsettled { count });
        }

        Ok(self.pool.run_until(self.save.save_now())?)
    }

    /// Temporal buckets that are tracked but neither loaded nor requested have lost their pull.
    fn reschedule_stranded(&self) -> usize {
        let stranded: Vec<_> = {
            let cube = self.cube.borrow();
            self.temporal
                .tracked()
                .into_iter()
                .filter(|address| {
                    cube.get_bucket(address)
                        .map_or(true, |b| b.state() == BucketState::Unrequested)
                })
                .collect()
        };
        for address in stranded.iter() {
            self.temporal.reschedule(*address);
        }
        stranded.len()
    }
}
