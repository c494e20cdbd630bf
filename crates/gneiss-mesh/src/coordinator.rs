use crate::{
    AdHocChunk, AdHocChunkRequest, Geometry, MeshConfig, MeshError, MeshSink, MeshStatus, MeshStore, MeshStoreError,
    SegmentId, SpatialMap,
};

use gneiss_core::glam::IVec3;
use gneiss_core::{Backoff, Delay, ResolutionInfo, SmallKeyHashMap, SmallKeyHashSet, TimerDelay, VoxelUnits};

use futures::stream::{self, StreamExt};
use futures_lite::future;
use itertools::Itertools;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;
use tokio_util::sync::CancellationToken;

/// Cube offsets of the face neighbors, indexed by the neighbor ids returned from
/// [`MeshStore::compute_mesh_chunk`].
pub const NEIGHBOR_OFFSETS: [IVec3; 6] = [
    IVec3::new(0, 0, -1),
    IVec3::new(0, -1, 0),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 1, 0),
    IVec3::new(1, 0, 0),
];

/// Where a segment's episodes stand.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EpisodeStatus {
    Idle,
    Loading,
    Finished,
    Cancelled,
    /// Finished early because the per-segment request cap was hit.
    LimitReached,
    Failed,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum MeshSource {
    AdHoc,
    Precomputed { mesh_file: String },
}

struct SegmentState {
    source: MeshSource,
    spatial_map: SpatialMap,
    batch_counter: usize,
    limit_reported: bool,
    status: EpisodeStatus,
    episode: Option<(u64, CancellationToken)>,
    /// The sink still shows geometry from before a refresh. It is removed right before the first new chunk is delivered.
    stale_geometry: bool,
    /// Cubes whose refresh failed. The next refresh starts from them too.
    unrefreshed: Vec<VoxelUnits<IVec3>>,
}

impl SegmentState {
    fn new(source: MeshSource) -> Self {
        Self {
            source,
            spatial_map: SpatialMap::default(),
            batch_counter: 0,
            limit_reported: false,
            status: EpisodeStatus::Idle,
            episode: None,
            stale_geometry: false,
            unrefreshed: Vec::new(),
        }
    }
}

/// Flood-fill parameters shared by every chunk of one ad-hoc episode.
#[derive(Clone, Copy)]
struct AdHocParams {
    mag: IVec3,
    /// Cube size in global voxels.
    zoomed_cube_size: IVec3,
}

/// Owns the per-segment mesh state and runs mesh episodes against a [`MeshStore`].
///
/// All state (spatial maps, request counters, running episodes) is keyed by segment and lives until [`MeshCoordinator::remove`].
/// Starting an episode for a segment cancels the episode that segment is already running.
pub struct MeshCoordinator<S, K, D = TimerDelay> {
    store: Rc<S>,
    sink: Rc<K>,
    delay: D,
    config: MeshConfig,
    resolutions: ResolutionInfo,
    segments: RefCell<SmallKeyHashMap<SegmentId, SegmentState>>,
    modified: RefCell<SmallKeyHashSet<SegmentId>>,
    next_episode_id: Cell<u64>,
}

impl<S: MeshStore, K: MeshSink, D: Delay> MeshCoordinator<S, K, D> {
    pub fn new(store: Rc<S>, sink: Rc<K>, delay: D, resolutions: ResolutionInfo, config: MeshConfig) -> Self {
        Self {
            store,
            sink,
            delay,
            config,
            resolutions,
            segments: Default::default(),
            modified: Default::default(),
            next_episode_id: Cell::new(0),
        }
    }

    pub fn status(&self, segment: SegmentId) -> Option<EpisodeStatus> {
        self.segments.borrow().get(&segment).map(|s| s.status)
    }

    /// Cube positions whose geometry has been delivered for `segment`, in `(z, y, x)` order.
    pub fn committed_positions(&self, segment: SegmentId) -> Vec<VoxelUnits<IVec3>> {
        self.segments
            .borrow()
            .get(&segment)
            .map(|s| s.spatial_map.sorted_positions())
            .unwrap_or_default()
    }

    /// The number of chunk requests issued in the current (or last) ad-hoc episode of `segment`.
    pub fn batch_counter(&self, segment: SegmentId) -> usize {
        self.segments.borrow().get(&segment).map_or(0, |s| s.batch_counter)
    }

    /// Loads the ad-hoc mesh of `segment`, starting at the cube containing `seed`.
    ///
    /// Only a failure of the very first chunk is an error; later chunks that fail after all retries are skipped.
    pub async fn load_ad_hoc(&self, segment: SegmentId, seed: VoxelUnits<IVec3>) -> Result<EpisodeStatus, MeshError> {
        let params = self.ad_hoc_params()?;
        self.load_ad_hoc_with(segment, seed, params).await
    }

    /// Loads the precomputed mesh of `segment` from `mesh_file`, closest chunks to `seed` first.
    pub async fn load_precomputed(
        &self,
        segment: SegmentId,
        seed: VoxelUnits<IVec3>,
        mesh_file: &str,
    ) -> Result<EpisodeStatus, MeshError> {
        let source = MeshSource::Precomputed {
            mesh_file: mesh_file.to_owned(),
        };
        let (episode, token) = self.begin_episode(segment, source);
        let work = self.precomputed_episode(segment, seed, mesh_file, &token);
        let result = race_cancellation(work, &token).await;
        self.end_episode(segment, episode, &result);
        result
    }

    /// Stops the running episode of `segment`. Geometry delivered so far is kept.
    pub fn cancel(&self, segment: SegmentId) {
        if let Some(state) = self.segments.borrow().get(&segment) {
            if let Some((_, token)) = state.episode.as_ref() {
                log::info!("Cancelling mesh episode of segment {segment}");
                token.cancel();
            }
        }
    }

    /// Cancels the running episode, forgets everything about `segment`, and removes its geometry from the sink.
    pub fn remove(&self, segment: SegmentId) {
        self.cancel(segment);
        self.segments.borrow_mut().remove(&segment);
        self.modified.borrow_mut().remove(&segment);
        self.sink.remove_segment(segment);
    }

    /// Re-requests every delivered cube of an ad-hoc mesh. The old geometry is removed right before the first new chunk is
    /// delivered, or at the end if no chunk could be reloaded.
    ///
    /// A cube that fails to reload is logged and skipped. It is kept for the next refresh, and the segment stays marked as
    /// modified.
    pub async fn refresh(&self, segment: SegmentId) -> Result<(), MeshError> {
        let params = self.ad_hoc_params()?;
        let positions = {
            let mut segments = self.segments.borrow_mut();
            let Some(state) = segments.get_mut(&segment) else {
                return Ok(());
            };
            if state.source != MeshSource::AdHoc {
                log::warn!("Segment {segment} has a precomputed mesh, which cannot be refreshed");
                return Ok(());
            }
            let mut positions = state.spatial_map.sorted_positions();
            positions.extend(state.unrefreshed.drain(..));
            state.spatial_map.clear();
            state.stale_geometry |= !positions.is_empty();
            positions
        };
        if positions.is_empty() {
            return Ok(());
        }

        log::info!("Refreshing mesh of segment {segment} from {} cube(s)", positions.len());
        let mut failed = Vec::new();
        for position in positions {
            if self.is_committed(segment, position) {
                continue;
            }
            match self.load_ad_hoc_with(segment, position, params).await {
                Ok(EpisodeStatus::Cancelled) => break,
                Ok(_) => {}
                Err(e) => {
                    log::error!("Failed to refresh cube {} of segment {segment}: {e}", position.into_inner());
                    failed.push(position);
                }
            }
        }

        let stale = {
            let mut segments = self.segments.borrow_mut();
            let Some(state) = segments.get_mut(&segment) else {
                return Ok(());
            };
            state.unrefreshed = failed;
            if !state.unrefreshed.is_empty() {
                self.modified.borrow_mut().insert(segment);
            }
            std::mem::take(&mut state.stale_geometry)
        };
        if stale {
            self.sink.remove_segment(segment);
        }
        Ok(())
    }

    /// Remembers that `segment` was edited, so [`MeshCoordinator::refresh_modified`] will refresh it.
    pub fn mark_segment_modified(&self, segment: SegmentId) {
        self.modified.borrow_mut().insert(segment);
    }

    /// Refreshes every segment marked as modified. Segments marked while this runs wait for the next call.
    pub async fn refresh_modified(&self) -> Result<(), MeshError> {
        let modified: Vec<_> = self.modified.borrow_mut().drain().sorted().collect();
        for segment in modified {
            self.refresh(segment).await?;
        }
        Ok(())
    }

    fn ad_hoc_params(&self) -> Result<AdHocParams, MeshError> {
        self.config.validate()?;
        let zoom_step = self
            .resolutions
            .closest_existing_zoom_step(self.config.preferred_zoom_step)
            .ok_or(MeshError::NoResolution)?;
        let mag = self.resolutions.mag(zoom_step).ok_or(MeshError::NoResolution)?;
        Ok(AdHocParams {
            mag,
            zoomed_cube_size: IVec3::from_array(self.config.cube_size) * mag,
        })
    }

    async fn load_ad_hoc_with(
        &self,
        segment: SegmentId,
        seed: VoxelUnits<IVec3>,
        params: AdHocParams,
    ) -> Result<EpisodeStatus, MeshError> {
        let (episode, token) = self.begin_episode(segment, MeshSource::AdHoc);
        let work = self.flood_fill(segment, seed, params, &token);
        let result = race_cancellation(work, &token).await;
        self.end_episode(segment, episode, &result);
        result
    }

    async fn flood_fill(
        &self,
        segment: SegmentId,
        seed: VoxelUnits<IVec3>,
        params: AdHocParams,
        token: &CancellationToken,
    ) -> Result<EpisodeStatus, MeshError> {
        let seed_cube = seed.map(|s| s.div_euclid(params.zoomed_cube_size) * params.zoomed_cube_size);
        if self.is_committed(segment, seed_cube) {
            log::debug!("Cube {} of segment {segment} is already loaded", seed_cube.into_inner());
        }

        let mut work = VecDeque::from([seed_cube]);
        // Dedup for positions that are requested but not committed yet.
        let mut requested = SmallKeyHashSet::default();
        let mut is_first = true;
        let mut skipped = 0;
        while let Some(position) = work.pop_front() {
            if self.is_committed(segment, position) || !requested.insert(position.into_inner()) {
                continue;
            }
            if !self.try_count_request(segment) {
                self.report_limit(segment);
                return Ok(EpisodeStatus::LimitReached);
            }

            let request = AdHocChunkRequest {
                segment,
                position,
                mag: params.mag,
                cube_size: IVec3::from_array(self.config.cube_size),
                subsampling_strides: IVec3::from_array(self.config.subsampling_strides),
            };
            let result = self
                .with_retries(token, || self.store.compute_mesh_chunk(&request))
                .await;
            if token.is_cancelled() {
                return Ok(EpisodeStatus::Cancelled);
            }

            match result {
                Ok(AdHocChunk { geometry, neighbors }) => {
                    self.commit(segment, position, geometry);
                    for id in neighbors {
                        match NEIGHBOR_OFFSETS.get(id as usize) {
                            Some(offset) => work.push_back(VoxelUnits(
                                position.into_inner() + *offset * params.zoomed_cube_size,
                            )),
                            None => log::warn!("Ignoring unknown neighbor id {id} for segment {segment}"),
                        }
                    }
                }
                Err((source, attempts)) if is_first => {
                    log::error!("First mesh chunk of segment {segment} failed: {source}");
                    return Err(MeshError::InitialChunkFailed {
                        segment,
                        position: position.into_inner(),
                        attempts,
                        source,
                    });
                }
                Err((source, _)) => {
                    log::error!("Skipping mesh chunk {} of segment {segment}: {source}", position.into_inner());
                    skipped += 1;
                }
            }
            is_first = false;
        }
        if skipped > 0 {
            log::warn!("Mesh of segment {segment} is missing {skipped} chunk(s)");
        }
        Ok(EpisodeStatus::Finished)
    }

    async fn precomputed_episode(
        &self,
        segment: SegmentId,
        seed: VoxelUnits<IVec3>,
        mesh_file: &str,
        token: &CancellationToken,
    ) -> Result<EpisodeStatus, MeshError> {
        let chunks = match self.store.list_mesh_chunks(segment, mesh_file).await {
            Ok(chunks) => chunks,
            Err(source) => {
                log::warn!("Failed to list mesh chunks of segment {segment}: {source}");
                self.segments.borrow_mut().remove(&segment);
                self.sink.remove_segment(segment);
                return Err(MeshError::ListingFailed {
                    segment,
                    mesh_file: mesh_file.to_owned(),
                    source,
                });
            }
        };
        if token.is_cancelled() {
            return Ok(EpisodeStatus::Cancelled);
        }

        let seed = seed.into_inner().as_i64vec3();
        let chunks = chunks
            .into_iter()
            .sorted_by_key(|p| (p.into_inner().as_i64vec3() - seed).length_squared());

        let mut fetches = stream::iter(chunks)
            .map(|position| async move {
                let result = self
                    .with_retries(token, || self.store.fetch_mesh_chunk(segment, mesh_file, position))
                    .await;
                (position, result)
            })
            .buffer_unordered(self.config.parallel_precomputed_count.max(1));

        let mut skipped = 0;
        while let Some((position, result)) = fetches.next().await {
            if token.is_cancelled() {
                return Ok(EpisodeStatus::Cancelled);
            }
            match result {
                Ok(geometry) => self.commit(segment, position, geometry),
                Err((source, _)) => {
                    log::error!("Skipping precomputed chunk {} of segment {segment}: {source}", position.into_inner());
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            log::warn!("Some mesh objects of segment {segment} could not be loaded ({skipped} chunk(s))");
        }
        Ok(EpisodeStatus::Finished)
    }

    /// Retries `request` with backoff. Stops early (with the last error) once `token` is cancelled.
    async fn with_retries<T, F>(
        &self,
        token: &CancellationToken,
        mut request: impl FnMut() -> F,
    ) -> Result<T, (MeshStoreError, u32)>
    where
        F: Future<Output = Result<T, MeshStoreError>>,
    {
        let backoff: Backoff = self.config.retry;
        let mut failures = 0;
        loop {
            let error = match request().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            failures += 1;
            if !backoff.should_retry(failures) || token.is_cancelled() {
                return Err((error, failures));
            }
            let wait = backoff.delay_after_failure(failures);
            log::warn!("Mesh request failed ({error}); retrying in {wait:?}");
            self.delay.delay(wait).await;
        }
    }

    fn begin_episode(&self, segment: SegmentId, source: MeshSource) -> (u64, CancellationToken) {
        let episode = self.next_episode_id.get();
        self.next_episode_id.set(episode + 1);
        let token = CancellationToken::new();

        let mut segments = self.segments.borrow_mut();
        let state = segments
            .entry(segment)
            .or_insert_with(|| SegmentState::new(source.clone()));
        let previous = state.episode.take();
        state.source = source;
        state.batch_counter = 0;
        state.status = EpisodeStatus::Loading;
        state.episode = Some((episode, token.clone()));
        drop(segments);

        // The superseded episode is no longer current, so its own end stays silent.
        if let Some((previous_id, previous)) = previous {
            previous.cancel();
            log::info!("Mesh episode {previous_id} for segment {segment} superseded by {episode}");
            self.sink.on_status(segment, MeshStatus::Cancelled);
        }
        log::info!("Started mesh episode {episode} for segment {segment}");
        self.sink.on_status(segment, MeshStatus::Started);
        (episode, token)
    }

    fn end_episode(&self, segment: SegmentId, episode: u64, result: &Result<EpisodeStatus, MeshError>) {
        let status = match result {
            Ok(status) => *status,
            Err(_) => EpisodeStatus::Failed,
        };
        let is_current = match self.segments.borrow_mut().get_mut(&segment) {
            Some(state) if state.episode.as_ref().is_some_and(|(id, _)| *id == episode) => {
                state.episode = None;
                state.status = status;
                true
            }
            _ => false,
        };

        log::info!("Mesh episode {episode} for segment {segment} ended: {status:?}");
        if !is_current {
            return;
        }
        let reported = match status {
            EpisodeStatus::Cancelled => MeshStatus::Cancelled,
            EpisodeStatus::Failed => MeshStatus::Failed,
            _ => MeshStatus::Finished,
        };
        self.sink.on_status(segment, reported);
    }

    fn is_committed(&self, segment: SegmentId, position: VoxelUnits<IVec3>) -> bool {
        self.segments
            .borrow()
            .get(&segment)
            .is_some_and(|s| s.spatial_map.contains(position))
    }

    /// Counts one more request for `segment`, unless the cap has been reached.
    fn try_count_request(&self, segment: SegmentId) -> bool {
        let mut segments = self.segments.borrow_mut();
        let Some(state) = segments.get_mut(&segment) else {
            return false;
        };
        if state.batch_counter >= self.config.max_batch_size {
            return false;
        }
        state.batch_counter += 1;
        true
    }

    fn report_limit(&self, segment: SegmentId) {
        let first_time = self
            .segments
            .borrow_mut()
            .get_mut(&segment)
            .is_some_and(|s| !std::mem::replace(&mut s.limit_reported, true));
        if first_time {
            log::warn!(
                "Reached the ad-hoc mesh loading limit of {} requests for segment {segment}",
                self.config.max_batch_size
            );
            self.sink.on_status(segment, MeshStatus::LimitReached);
        }
    }

    fn commit(&self, segment: SegmentId, position: VoxelUnits<IVec3>, geometry: Geometry) {
        let (newly_marked, stale) = match self.segments.borrow_mut().get_mut(&segment) {
            Some(state) => {
                let newly_marked = state.spatial_map.mark(position);
                (newly_marked, newly_marked && std::mem::take(&mut state.stale_geometry))
            }
            None => (false, false),
        };
        if stale {
            self.sink.remove_segment(segment);
        }
        if newly_marked {
            self.sink.add_geometry(segment, position, geometry);
        }
    }
}

/// Runs `work` until it completes or `token` is cancelled, whichever happens first.
async fn race_cancellation(
    work: impl Future<Output = Result<EpisodeStatus, MeshError>>,
    token: &CancellationToken,
) -> Result<EpisodeStatus, MeshError> {
    future::or(work, async {
        token.cancelled().await;
        Ok(EpisodeStatus::Cancelled)
    })
    .await
}
