use gneiss::gneiss_buckets::{MemoryStore, OrthoPlane, OrthoViewport, ViewMode, ViewState};
use gneiss::gneiss_core::glam::{DMat4, DVec2, DVec3, IVec3};
use gneiss::gneiss_core::{BucketAddress, RecordingDelay, ResolutionInfo, VoxelUnits, BUCKET_SIZE};
use gneiss::{Config, SessionError, StreamingSession};

use std::rc::Rc;
use std::time::Duration;

type Session = StreamingSession<MemoryStore, RecordingDelay>;

fn session(config: Config) -> (Session, Rc<MemoryStore>, RecordingDelay) {
    let store = Rc::new(MemoryStore::new());
    let delay = RecordingDelay::default();
    let session = StreamingSession::with_delay(store.clone(), ResolutionInfo::isotropic(2), delay.clone(), config);
    (session, store, delay)
}

fn xy_view(position: DVec3) -> ViewState {
    ViewState::orthogonal(
        VoxelUnits(position),
        0,
        [OrthoViewport {
            plane: OrthoPlane::Xy,
            half_extent: VoxelUnits(DVec2::splat(48.0)),
        }],
    )
}

#[test]
fn prefetch_then_pull_loads_the_view_once() {
    let (mut session, store, _) = session(Config::default());
    let anchor = BucketAddress::new(1, 1, 0, 0);
    store.insert_filled(anchor, 6);

    session.update_view(&xy_view(DVec3::new(40.0, 40.0, 0.0)));
    let report = session.pull();

    assert!(report.failures.is_empty());
    assert_eq!(report.loaded, 1);
    assert!(report.missing > 0);
    assert_eq!(session.voxel_at(VoxelUnits(IVec3::new(40, 40, 0)), 0), Some(6));
    assert_eq!(store.fetched_addresses()[0], anchor);

    let fetches = store.fetch_log().len();
    session.update_view(&xy_view(DVec3::new(40.0, 40.0, 0.0)));
    let report = session.pull();
    assert_eq!(report.batches, 0);
    assert_eq!(store.fetch_log().len(), fetches);
}

#[test]
fn edit_before_load_is_merged_and_saved() {
    let (mut session, store, _) = session(Config::default());
    let address = BucketAddress::new(5, 0, 0, 0);
    store.insert_filled(address, 7);

    let labeled = session.label_voxel(VoxelUnits(IVec3::new(5 * 32 + 1, 0, 0)), 0, 9);
    assert_eq!(labeled, Some(address));
    assert!(session.temporal().is_tracked(&address));

    let report = session.save().unwrap();

    assert_eq!(report.pushed, 1);
    assert_eq!(session.temporal().count(), 0);
    let saved = store.get(&address).unwrap();
    assert_eq!((saved[0], saved[1], saved[BUCKET_SIZE - 1]), (7, 9, 7));
    assert!(!session.cube().borrow().get_bucket(&address).unwrap().is_dirty());
}

#[test]
fn edits_to_loaded_buckets_go_straight_to_the_push_queue() {
    let (mut session, store, _) = session(Config::default());
    let address = BucketAddress::new(0, 0, 0, 1);
    store.insert_filled(address, 1);
    session.pull_queue().add(address, 0.0);
    session.pull();

    session.label_voxel(VoxelUnits(IVec3::new(2, 0, 0)), 1, 3);

    assert_eq!(session.temporal().count(), 0);
    assert!(session.push_queue().borrow().contains(&address));
    assert_eq!(session.save().unwrap().pushed, 1);
    assert_eq!(store.get(&address).unwrap()[1], 3);
}

#[test]
fn failed_save_keeps_edits_for_the_next_one() {
    let (mut session, store, _) = session(Config::default());
    for x in 0..3 {
        session.label_voxel(VoxelUnits(IVec3::new(x * 32, 0, 0)), 0, 2);
    }
    store.fail_next_pushes(1);

    assert!(matches!(session.save(), Err(SessionError::Push(_))));
    assert_eq!(session.push_queue().borrow().len(), 3);

    let report = session.save().unwrap();
    assert_eq!(report.pushed, 3);
    assert!(session.push_queue().borrow().is_empty());
}

#[test]
fn temporal_pulls_back_off_and_recover() {
    let (mut session, store, delay) = session(Config::default());
    let address = BucketAddress::new(0, 0, 2, 0);
    store.insert_filled(address, 4);
    store.fail_next_fetches(2);

    session.label_voxel(VoxelUnits(IVec3::new(0, 0, 64)), 0, 8);
    session.save().unwrap();

    assert_eq!(delay.requested(), vec![Duration::from_millis(200), Duration::from_millis(400)]);
    let saved = store.get(&address).unwrap();
    assert_eq!((saved[0], saved[1]), (8, 4));
}

#[test]
fn temporal_pull_outranks_prefetch() {
    let (mut session, store, _) = session(Config::default());
    session.update_view(&xy_view(DVec3::ZERO));
    let edited = session.label_voxel(VoxelUnits(IVec3::new(0, 0, 500)), 0, 1).unwrap();

    session.pull();

    assert_eq!(store.fetched_addresses()[0], edited);
}

#[test]
fn oblique_and_flight_views_pick_around_the_camera() {
    let (mut session, store, _) = session(Config::default());

    for mode in [ViewMode::Oblique, ViewMode::Flight] {
        let camera = DMat4::from_translation(DVec3::new(100.0, 100.0, 100.0));
        let picked = session.update_view(&ViewState::looking(mode, camera, 0));
        assert!(picked > 0, "{mode:?}");
        session.pull();
    }

    assert!(store.fetched_addresses().contains(&BucketAddress::new(3, 3, 3, 0)));
    assert!(session.pull_queue().is_empty());
}

#[test]
fn background_picker_applies_finished_picks() {
    let config = Config {
        background_picker: true,
        ..Config::default()
    };
    let (mut session, _, _) = session(config);
    let view = xy_view(DVec3::ZERO);

    let mut picked = 0;
    for _ in 0..500 {
        picked = session.update_view(&view);
        if picked > 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }

    assert!(picked > 0);
    assert_eq!(session.pull_queue().priority_of(&BucketAddress::new(0, 0, 0, 0)), Some(0.0));
}
