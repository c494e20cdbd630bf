use super::ViewState;
use crate::OrthogonalConfig;

use gneiss_core::glam::IVec3;
use gneiss_core::{bucket_shift, global_float_position_to_bucket, BucketAddress, PriorityWorkQueue, ResolutionInfo};

/// Scans a rectangle of buckets around the anchor bucket in each active plane.
///
/// The priority is the in-plane Manhattan distance (in buckets) from the anchor. Coarser fallback zoom steps are scanned the
/// same way, with a constant offset per zoom step so they come after every bucket of the active zoom step.
#[derive(Clone, Debug)]
pub struct OrthogonalStrategy {
    config: OrthogonalConfig,
}

impl OrthogonalStrategy {
    pub fn new(config: OrthogonalConfig) -> Self {
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
        enqueue_planes(view, resolutions, zoom_step, 0.0, queue);

        for k in 1..=self.config.fallback_zoom_steps {
            let Some(fallback) = zoom_step.checked_add(k) else {
                break;
            };
            if resolutions.has_zoom_step(fallback) {
                let offset = f64::from(k) * self.config.fallback_priority_offset;
                enqueue_planes(view, resolutions, fallback, offset, queue);
            }
        }
    }
}

fn enqueue_planes(
    view: &ViewState,
    resolutions: &ResolutionInfo,
    zoom_step: u8,
    priority_offset: f64,
    queue: &mut PriorityWorkQueue<BucketAddress>,
) {
    let (Some(anchor), Some(shift)) = (
        global_float_position_to_bucket(view.position, resolutions, zoom_step),
        bucket_shift(resolutions, zoom_step),
    ) else {
        return;
    };
    let bucket_side = (IVec3::ONE << shift).as_dvec3();

    for viewport in view.viewports.iter() {
        let [u, v, _] = viewport.plane.axes();
        let half_extent = viewport.half_extent.into_inner();
        let radius_u = (half_extent.x / bucket_side[u]).ceil() as i32;
        let radius_v = (half_extent.y / bucket_side[v]).ceil() as i32;
        for dv in -radius_v..=radius_v {
            for du in -radius_u..=radius_u {
                let mut delta = IVec3::ZERO;
                delta[u] = du;
                delta[v] = dv;
                let priority = priority_offset + f64::from(du.abs() + dv.abs());
                queue.insert(anchor.offset(delta), priority);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::prefetch::{OrthoPlane, OrthoViewport, PrefetchStrategy, ViewMode};
    use crate::PrefetchConfig;

    use gneiss_core::glam::{DVec2, DVec3};
    use gneiss_core::VoxelUnits;

    fn xy_view(position: DVec3, zoom_step: u8, half_extent: f64) -> ViewState {
        ViewState::orthogonal(
            VoxelUnits(position),
            zoom_step,
            [OrthoViewport {
                plane: OrthoPlane::Xy,
                half_extent: VoxelUnits(DVec2::splat(half_extent)),
            }],
        )
    }

    #[test]
    fn anchor_first_then_in_plane_neighbors() {
        let strategy = PrefetchStrategy::for_mode(ViewMode::Orthogonal, &PrefetchConfig::default());
        let resolutions = ResolutionInfo::isotropic(0);

        let picked = strategy.pick(&xy_view(DVec3::ZERO, 0, 32.0), &resolutions);

        assert_eq!(picked.len(), 9);
        assert_eq!(picked[0], (BucketAddress::new(0, 0, 0, 0), 0.0));
        let mut neighbors: Vec<_> = picked[1..5].iter().map(|(a, p)| (*a, *p)).collect();
        neighbors.sort_by_key(|(a, _)| *a);
        assert_eq!(
            neighbors,
            vec![
                (BucketAddress::new(-1, 0, 0, 0), 1.0),
                (BucketAddress::new(0, -1, 0, 0), 1.0),
                (BucketAddress::new(0, 1, 0, 0), 1.0),
                (BucketAddress::new(1, 0, 0, 0), 1.0),
            ]
        );
        assert!(picked[5..].iter().all(|&(_, p)| p == 2.0));
    }

    #[test]
    fn pick_is_deterministic() {
        let strategy = PrefetchStrategy::for_mode(ViewMode::Orthogonal, &PrefetchConfig::default());
        let resolutions = ResolutionInfo::isotropic(3);
        let mut view = xy_view(DVec3::new(1000.5, -300.0, 77.0), 1, 200.0);
        view.viewports.push(OrthoViewport {
            plane: OrthoPlane::Yz,
            half_extent: VoxelUnits(DVec2::new(150.0, 90.0)),
        });

        assert_eq!(strategy.pick(&view, &resolutions), strategy.pick(&view.clone(), &resolutions));
    }

    #[test]
    fn planes_share_the_anchor() {
        let strategy = OrthogonalStrategy::new(OrthogonalConfig {
            fallback_zoom_steps: 0,
            ..Default::default()
        });
        let resolutions = ResolutionInfo::isotropic(0);
        let mut view = xy_view(DVec3::ZERO, 0, 0.0);
        view.viewports.push(OrthoViewport {
            plane: OrthoPlane::Xz,
            half_extent: VoxelUnits(DVec2::ZERO),
        });

        let mut queue = PriorityWorkQueue::new();
        strategy.enqueue(&view, &resolutions, &mut queue);
        assert_eq!(queue.drain_ordered(), vec![(BucketAddress::new(0, 0, 0, 0), 0.0)]);
    }

    #[test]
    fn fallback_zoom_steps_come_last() {
        let strategy = PrefetchStrategy::for_mode(ViewMode::Orthogonal, &PrefetchConfig::default());
        let resolutions = ResolutionInfo::isotropic(1);

        let picked = strategy.pick(&xy_view(DVec3::ZERO, 0, 32.0), &resolutions);

        let (fine, coarse): (Vec<&(BucketAddress, f64)>, Vec<_>) = picked.iter().partition(|(a, _)| a.zoom_step == 0);
        assert_eq!(fine.len(), 9);
        assert_eq!(coarse.len(), 9);
        assert_eq!(coarse[0], &(BucketAddress::new(0, 0, 0, 1), 1000.0));
        assert!(picked[..9].iter().all(|(a, _)| a.zoom_step == 0));
    }

    #[test]
    fn missing_zoom_step_picks_nothing() {
        let strategy = PrefetchStrategy::for_mode(ViewMode::Orthogonal, &PrefetchConfig::default());
        let resolutions = ResolutionInfo::isotropic(1);

        assert!(strategy.pick(&xy_view(DVec3::ZERO, 4, 64.0), &resolutions).is_empty());
    }
}
