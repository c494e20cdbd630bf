//! Replays a scripted viewer session against in-memory stores and logs what the streaming engine does.
//!
//! Usage: `replay [config.ron]`. Set `RUST_LOG=debug` to see queue traffic.

use gneiss::gneiss_buckets::{MemoryStore, OrthoPlane, OrthoViewport, ViewMode, ViewState};
use gneiss::gneiss_core::glam::{DMat4, DVec2, DVec3, IVec3};
use gneiss::gneiss_core::{BucketAddress, ResolutionInfo, TimerDelay, VoxelUnits, BUCKET_WIDTH};
use gneiss::gneiss_mesh::{
    AdHocChunk, AdHocChunkRequest, Geometry, MeshCoordinator, MeshSink, MeshStatus, MeshStore, MeshStoreError, SegmentId,
    NEIGHBOR_OFFSETS,
};
use gneiss::{Config, StreamingSession};

use futures::executor::block_on;
use std::future::{ready, Future};
use std::rc::Rc;

const SEGMENT_SIZE: IVec3 = IVec3::splat(256);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::read_file(path)?,
        None => Config::default(),
    };
    let resolutions = ResolutionInfo::isotropic(3);

    let store = Rc::new(MemoryStore::new());
    seed_store(&store);

    let mut session = StreamingSession::new(store.clone(), resolutions.clone(), config);
    for view in camera_path() {
        let picked = session.update_view(&view);
        let report = session.pull();
        log::info!(
            "{:?} view at {}: picked {picked}, fetched {} batch(es), {} loaded, {} missing, {} failed",
            view.mode,
            view.position.into_inner(),
            report.batches,
            report.loaded,
            report.missing,
            report.failed_addresses().count(),
        );
    }

    // Paint a line that runs from cached buckets into buckets nobody has looked at yet.
    for x in 0..(8 * BUCKET_WIDTH) {
        session.label_voxel(VoxelUnits(IVec3::new(x, 3, 3)), 0, 42);
    }
    log::info!("{} temporal bucket(s) after painting", session.temporal().count());

    let saved = session.save()?;
    log::info!(
        "Saved {} bucket(s) in {} batch(es), {} still dirty",
        saved.pushed,
        saved.batches,
        saved.still_dirty
    );

    let meshes = MeshCoordinator::new(
        Rc::new(SphereMeshStore {
            center: IVec3::new(300, 300, 300),
            radius: 500,
        }),
        Rc::new(LogSink),
        TimerDelay,
        resolutions,
        config.mesh,
    );
    let seed = VoxelUnits(IVec3::new(300, 300, 300));
    let status = block_on(meshes.load_ad_hoc(1, seed))?;
    log::info!(
        "Ad-hoc mesh of segment 1: {status:?} after {} request(s)",
        meshes.batch_counter(1)
    );
    let status = block_on(meshes.load_precomputed(2, seed, "meshfile"))?;
    log::info!(
        "Precomputed mesh of segment 2: {status:?}, {} chunk(s)",
        meshes.committed_positions(2).len()
    );
    meshes.mark_segment_modified(1);
    block_on(meshes.refresh_modified())?;
    meshes.remove(2);

    Ok(())
}

/// Real data around the origin. Everything else is reported missing.
fn seed_store(store: &MemoryStore) {
    for z in -2..2 {
        for y in -2..2 {
            for x in -2..6 {
                store.insert_filled(BucketAddress::new(x, y, z, 0), (x + 2) as u32);
            }
        }
    }
}

fn camera_path() -> Vec<ViewState> {
    let viewports = [OrthoPlane::Xy, OrthoPlane::Yz, OrthoPlane::Xz].map(|plane| OrthoViewport {
        plane,
        half_extent: VoxelUnits(DVec2::new(96.0, 64.0)),
    });
    let mut path: Vec<_> = (0..4)
        .map(|i| ViewState::orthogonal(VoxelUnits(DVec3::new(i as f64 * 40.0, 0.0, 0.0)), 0, viewports))
        .collect();
    path.push(ViewState::orthogonal(VoxelUnits(DVec3::splat(64.0)), 2, viewports));

    let rotation = DMat4::from_rotation_y(0.4) * DMat4::from_rotation_x(-0.2);
    path.push(ViewState::looking(
        ViewMode::Oblique,
        DMat4::from_translation(DVec3::new(16.0, 16.0, 16.0)) * rotation,
        0,
    ));
    for i in 0..3 {
        let eye = DVec3::new(0.0, 0.0, i as f64 * 64.0);
        path.push(ViewState::looking(ViewMode::Flight, DMat4::from_translation(eye) * rotation, 1));
    }
    path
}

/// Serves meshes of a single ball-shaped segment.
struct SphereMeshStore {
    center: IVec3,
    radius: i32,
}

impl SphereMeshStore {
    fn touches(&self, min: IVec3, size: IVec3) -> bool {
        let closest = self.center.clamp(min, min + size - IVec3::ONE);
        (closest - self.center).as_dvec3().length() <= self.radius as f64
    }

    fn geometry(position: IVec3) -> Geometry {
        position.to_array().iter().flat_map(|c| c.to_le_bytes()).collect()
    }
}

impl MeshStore for SphereMeshStore {
    fn compute_mesh_chunk(&self, request: &AdHocChunkRequest) -> impl Future<Output = Result<AdHocChunk, MeshStoreError>> {
        let min = request.position.into_inner();
        let size = request.cube_size * request.mag;
        let neighbors = NEIGHBOR_OFFSETS
            .iter()
            .enumerate()
            .filter(|(_, offset)| self.touches(min + **offset * size, size))
            .map(|(id, _)| id as u8)
            .collect();
        ready(Ok(AdHocChunk {
            geometry: Self::geometry(min),
            neighbors,
        }))
    }

    fn list_mesh_chunks(
        &self,
        _segment: SegmentId,
        _mesh_file: &str,
    ) -> impl Future<Output = Result<Vec<VoxelUnits<IVec3>>, MeshStoreError>> {
        let reach = (self.radius + SEGMENT_SIZE.x - 1) / SEGMENT_SIZE.x + 1;
        let center_cube = self.center.div_euclid(SEGMENT_SIZE);
        let mut chunks = Vec::new();
        for z in -reach..=reach {
            for y in -reach..=reach {
                for x in -reach..=reach {
                    let min = (center_cube + IVec3::new(x, y, z)) * SEGMENT_SIZE;
                    if self.touches(min, SEGMENT_SIZE) {
                        chunks.push(VoxelUnits(min));
                    }
                }
            }
        }
        ready(Ok(chunks))
    }

    fn fetch_mesh_chunk(
        &self,
        _segment: SegmentId,
        _mesh_file: &str,
        position: VoxelUnits<IVec3>,
    ) -> impl Future<Output = Result<Geometry, MeshStoreError>> {
        ready(Ok(Self::geometry(position.into_inner())))
    }
}

struct LogSink;

impl MeshSink for LogSink {
    fn add_geometry(&self, segment: SegmentId, position: VoxelUnits<IVec3>, geometry: Geometry) {
        log::debug!(
            "Segment {segment}: {} byte(s) of geometry at {}",
            geometry.len(),
            position.into_inner()
        );
    }

    fn remove_segment(&self, segment: SegmentId) {
        log::info!("Segment {segment}: geometry removed");
    }

    fn on_status(&self, segment: SegmentId, status: MeshStatus) {
        log::info!("Segment {segment}: {status:?}");
    }
}
