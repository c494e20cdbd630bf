use gneiss_core::glam::IVec3;
use gneiss_core::{SmallKeyHashSet, VoxelUnits};

use itertools::Itertools;

/// The cube positions of one segment whose geometry has been delivered.
///
/// Used only to avoid requesting a cube twice; the geometry itself lives in the [`MeshSink`](crate::MeshSink).
#[derive(Clone, Debug, Default)]
pub struct SpatialMap {
    positions: SmallKeyHashSet<IVec3>,
}

impl SpatialMap {
    pub fn contains(&self, position: VoxelUnits<IVec3>) -> bool {
        self.positions.contains(&position.into_inner())
    }

    /// Returns `false` if `position` was already marked.
    pub fn mark(&mut self, position: VoxelUnits<IVec3>) -> bool {
        self.positions.insert(position.into_inner())
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn clear(&mut self) {
        self.positions.clear();
    }

    /// All marked positions in `(z, y, x)` order.
    pub fn sorted_positions(&self) -> Vec<VoxelUnits<IVec3>> {
        self.positions
            .iter()
            .sorted_by_key(|p| (p.z, p.y, p.x))
            .map(|&p| VoxelUnits(p))
            .collect()
    }
}
