use super::{with_translation, ViewState};
use crate::ObliqueConfig;

use gneiss_core::geometry::Polyhedron;
use gneiss_core::glam::{DVec3, IVec3};
use gneiss_core::{
    global_float_position_to_bucket, BucketAddress, BucketUnits, PriorityWorkQueue, ResolutionInfo, VoxelUnits,
};

/// Rasterizes a square frustum in front of the camera, in bucket units, and prioritizes by distance from the point of
/// interest.
#[derive(Clone, Debug)]
pub struct ObliqueStrategy {
    frustum: Polyhedron,
}

impl ObliqueStrategy {
    pub fn new(config: ObliqueConfig) -> Self {
        Self {
            frustum: Polyhedron::square_frustum(
                config.near_half_width,
                config.near_half_height,
                config.near_z,
                config.far_half_width,
                config.far_half_height,
                config.far_z,
            ),
        }
    }

    pub(crate) fn enqueue(
        &self,
        view: &ViewState,
        resolutions: &ResolutionInfo,
        queue: &mut PriorityWorkQueue<BucketAddress>,
    ) {
        let Some(zoom_step) = resolutions.zoom_step_or_closest_coarser(view.zoom_step) else {
            return;
        };
        enqueue_polyhedron(&self.frustum, view, resolutions, zoom_step, |_| true, queue);
    }
}

/// Places `shape` one bucket past the camera's bucket on every axis (in bucket coordinates at `zoom_step`) and enqueues the covered buckets that pass `keep`, in
/// onion order, with priority `1 + distance` to the point of interest.
pub(super) fn enqueue_polyhedron(
    shape: &Polyhedron,
    view: &ViewState,
    resolutions: &ResolutionInfo,
    zoom_step: u8,
    keep: impl Fn(BucketUnits<IVec3>) -> bool,
    queue: &mut PriorityWorkQueue<BucketAddress>,
) {
    let camera_position = VoxelUnits(view.camera.w_axis.truncate());
    let (Some(camera_bucket), Some(poi_bucket)) = (
        global_float_position_to_bucket(camera_position, resolutions, zoom_step),
        global_float_position_to_bucket(view.position, resolutions, zoom_step),
    ) else {
        return;
    };
    let origin = camera_bucket.coordinates().into_inner().as_dvec3() + DVec3::ONE;
    let poi_bucket = poi_bucket.coordinates().into_inner().as_dvec3();

    let placed = shape.transform_affine(&with_translation(&view.camera, origin));
    for p in placed.collect_points_onion(origin) {
        if !keep(BucketUnits(p)) {
            continue;
        }
        let priority = 1.0 + p.as_dvec3().distance(poi_bucket);
        queue.insert(BucketAddress::from_coordinates(BucketUnits(p), zoom_step), priority);
    }
}
