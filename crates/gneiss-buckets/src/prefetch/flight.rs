use super::oblique::enqueue_polyhedron;
use super::ViewState;
use crate::FlightConfig;

use gneiss_core::geometry::{Polyhedron, Sphere};
use gneiss_core::glam::DVec3;
use gneiss_core::{bucket_shift, BucketAddress, PriorityWorkQueue, ResolutionInfo};

/// Prefetches a spherical cap in front of the camera: a frustum reaching out to the cap radius, clipped by the sphere.
#[derive(Clone, Debug)]
pub struct FlightStrategy {
    config: FlightConfig,
}

impl FlightStrategy {
    pub fn new(config: FlightConfig) -> Self {
        Self { config }
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
        let Some(shift) = bucket_shift(resolutions, zoom_step) else {
            return;
        };
        let bucket_side = DVec3::new(
            f64::from(1 << shift.x),
            f64::from(1 << shift.y),
            f64::from(1 << shift.z),
        );
        let cap_radius = self.config.spherical_cap_radius;
        // In buckets along the finest axis, so the frustum covers the cap on every axis.
        let radius = (cap_radius / bucket_side.min_element()).max(1.0);

        let cap = Polyhedron::square_frustum(1.0, 1.0, -1.0, radius, radius, radius);
        let camera_bucket = (view.camera.w_axis.truncate() / bucket_side).floor();
        // Cells count as inside if any part of them might be. Measured in voxels, where the cap is a sphere.
        let sphere = Sphere::new(
            (camera_bucket + DVec3::splat(0.5)) * bucket_side,
            cap_radius + 0.5 * bucket_side.length(),
        );

        enqueue_polyhedron(
            &cap,
            view,
            resolutions,
            zoom_step,
            |p| sphere.contains_point((p.into_inner().as_dvec3() + DVec3::splat(0.5)) * bucket_side),
            queue,
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::prefetch::{PrefetchStrategy, ViewMode};
    use crate::PrefetchConfig;

    use gneiss_core::glam::{DMat4, IVec3};

    #[test]
    fn cap_stays_within_radius() {
        let strategy = PrefetchStrategy::for_mode(ViewMode::Flight, &PrefetchConfig::default());
        let resolutions = ResolutionInfo::isotropic(0);
        let camera = DMat4::from_translation(DVec3::new(320.0, 320.0, 320.0));
        let view = ViewState::looking(ViewMode::Flight, camera, 0);

        let picked = strategy.pick(&view, &resolutions);

        assert_eq!(picked[0], (BucketAddress::new(10, 10, 10, 0), 1.0));
        // 140 voxels are 4.375 buckets.
        let center = DVec3::splat(10.5);
        assert!(picked.iter().all(|(a, _)| {
            let c = a.coordinates().into_inner().as_dvec3() + DVec3::splat(0.5);
            c.distance(center) <= 4.375 + 0.5 * 3f64.sqrt()
        }));
        assert!(picked.iter().any(|(a, _)| a.z >= 14));
        assert!(picked.iter().all(|(a, _)| a.z >= 9));
    }

    #[test]
    fn anisotropic_buckets_are_measured_per_axis() {
        let strategy = PrefetchStrategy::for_mode(ViewMode::Flight, &PrefetchConfig::default());
        // Mag (1, 1, 4) at zoom step 2: buckets are 32 voxels wide in x and y but 128 voxels deep in z.
        let resolutions = ResolutionInfo::try_new([IVec3::ONE, IVec3::new(1, 1, 4)]).unwrap();
        let view = ViewState::looking(ViewMode::Flight, DMat4::IDENTITY, 2);

        let picked = strategy.pick(&view, &resolutions);

        assert!(!picked.is_empty());
        let side = DVec3::new(32.0, 32.0, 128.0);
        let reach = 140.0 + 0.5 * side.length();
        assert!(picked.iter().all(|(a, _)| {
            let c = (a.coordinates().into_inner().as_dvec3() + DVec3::splat(0.5)) * side;
            c.distance(DVec3::splat(0.5) * side) <= reach
        }));
        assert!(picked.iter().all(|(a, _)| a.zoom_step == 2 && a.z <= 1));
        // Sideways the cap spans several of the narrow buckets.
        assert!(picked.iter().any(|(a, _)| a.x.abs() >= 2));
    }
}
