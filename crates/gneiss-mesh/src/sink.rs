use crate::{Geometry, SegmentId};

use gneiss_core::glam::IVec3;
use gneiss_core::VoxelUnits;

use std::cell::RefCell;

/// Episode transitions reported to the UI.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MeshStatus {
    Started,
    /// Non-fatal. Reported at most once per segment until the segment is removed.
    LimitReached,
    Finished,
    Failed,
    Cancelled,
}

/// Receives geometry and status changes. Rendering is up to the implementor.
pub trait MeshSink {
    fn add_geometry(&self, segment: SegmentId, position: VoxelUnits<IVec3>, geometry: Geometry);

    fn remove_segment(&self, segment: SegmentId);

    fn on_status(&self, segment: SegmentId, status: MeshStatus);
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SinkEvent {
    Geometry(SegmentId, IVec3),
    Removed(SegmentId),
    Status(SegmentId, MeshStatus),
}

/// A [`MeshSink`] that only records what it was told.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: RefCell<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.borrow().clone()
    }

    pub fn statuses(&self, segment: SegmentId) -> Vec<MeshStatus> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Status(s, status) if *s == segment => Some(*status),
                _ => None,
            })
            .collect()
    }

    pub fn geometry_count(&self, segment: SegmentId) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| matches!(e, SinkEvent::Geometry(s, _) if *s == segment))
            .count()
    }
}

impl MeshSink for RecordingSink {
    fn add_geometry(&self, segment: SegmentId, position: VoxelUnits<IVec3>, _geometry: Geometry) {
        self.events
            .borrow_mut()
            .push(SinkEvent::Geometry(segment, position.into_inner()));
    }

    fn remove_segment(&self, segment: SegmentId) {
        self.events.borrow_mut().push(SinkEvent::Removed(segment));
    }

    fn on_status(&self, segment: SegmentId, status: MeshStatus) {
        self.events.borrow_mut().push(SinkEvent::Status(segment, status));
    }
}
