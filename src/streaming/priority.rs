//! Task priority evaluation from viewer state.
//!
//! A priority is a coarse urgency band combined with the distance to the
//! nearest viewer, packed into one totally ordered value so the scheduler
//! can keep tasks in a plain max-heap.

use glam::Vec3;
use std::sync::Arc;

/// Urgency band for block load tasks.
pub const LOAD_BAND: u8 = 2;

/// Distance covered by one step of the fine closeness band.
const BAND0_DISTANCE_UNIT: f32 = 32.0;

/// Totally ordered task priority. Higher runs first.
///
/// Band 2 (caller class) dominates, then band 1 (lod index, so coarser
/// lods win within a class), then band 0 (closeness to the nearest
/// viewer).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskPriority(u32);

impl TaskPriority {
    pub const MIN: TaskPriority = TaskPriority(0);
    pub const MAX: TaskPriority = TaskPriority(u32::MAX);

    #[inline]
    pub fn from_bands(band2: u8, band1: u8, band0: u8) -> Self {
        Self((band2 as u32) << 16 | (band1 as u32) << 8 | band0 as u32)
    }

    #[inline]
    pub fn value(self) -> u32 {
        self.0
    }
}

/// Immutable snapshot of viewer positions, replaced wholesale by the
/// viewer system and shared with pending tasks through an `Arc`.
#[derive(Clone, Debug, Default)]
pub struct ViewersData {
    pub positions: Vec<Vec3>,
}

impl ViewersData {
    pub fn new(positions: Vec<Vec3>) -> Self {
        Self { positions }
    }

    /// Squared distance from `position` to the nearest viewer. An empty
    /// snapshot reads as distance zero so tasks are never dropped for it.
    pub fn closest_distance_squared(&self, position: Vec3) -> f32 {
        let closest = self
            .positions
            .iter()
            .map(|viewer| viewer.distance_squared(position))
            .fold(f32::INFINITY, f32::min);
        if closest.is_finite() {
            closest
        } else {
            0.0
        }
    }
}

/// What a task needs to compute its scheduling priority: the shared viewer
/// snapshot, the block's world position and the drop threshold.
#[derive(Clone, Debug)]
pub struct PriorityDependency {
    pub viewers: Arc<ViewersData>,
    /// World-space centre of the requested block.
    pub world_position: Vec3,
    /// Tasks farther than this from every viewer get cancelled.
    pub drop_distance_squared: f32,
}

impl PriorityDependency {
    pub fn new(viewers: Arc<ViewersData>, world_position: Vec3, drop_distance: f32) -> Self {
        Self {
            viewers,
            world_position,
            drop_distance_squared: drop_distance * drop_distance,
        }
    }

    /// Banded priority for a task at `lod_index`; writes the squared
    /// distance to the nearest viewer into `out_closest_distance_sq`.
    pub fn evaluate(
        &self,
        lod_index: u8,
        band2: u8,
        out_closest_distance_sq: &mut f32,
    ) -> TaskPriority {
        let distance_sq = self.viewers.closest_distance_squared(self.world_position);
        *out_closest_distance_sq = distance_sq;
        let steps = (distance_sq.sqrt() / BAND0_DISTANCE_UNIT) as u32;
        let closeness = 255u32.saturating_sub(steps) as u8;
        TaskPriority::from_bands(band2, lod_index, closeness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dependency(viewers: Vec<Vec3>, position: Vec3, drop_distance: f32) -> PriorityDependency {
        PriorityDependency::new(Arc::new(ViewersData::new(viewers)), position, drop_distance)
    }

    #[test]
    fn test_band_packing_dominance() {
        let high_band = TaskPriority::from_bands(3, 0, 0);
        let low_band = TaskPriority::from_bands(2, 255, 255);
        assert!(high_band > low_band);

        let coarse_lod = TaskPriority::from_bands(2, 4, 0);
        let fine_lod = TaskPriority::from_bands(2, 0, 255);
        assert!(coarse_lod > fine_lod);
    }

    #[test]
    fn test_closer_viewer_higher_priority() {
        let near = dependency(vec![Vec3::ZERO], Vec3::new(10.0, 0.0, 0.0), 1000.0);
        let far = dependency(vec![Vec3::ZERO], Vec3::new(900.0, 0.0, 0.0), 1000.0);

        let mut near_sq = 0.0;
        let mut far_sq = 0.0;
        let near_priority = near.evaluate(0, LOAD_BAND, &mut near_sq);
        let far_priority = far.evaluate(0, LOAD_BAND, &mut far_sq);

        assert!(near_priority > far_priority);
        assert!((near_sq - 100.0).abs() < 1e-3);
        assert!(far_sq > near_sq);
    }

    #[test]
    fn test_nearest_of_several_viewers() {
        let dep = dependency(
            vec![Vec3::new(1000.0, 0.0, 0.0), Vec3::new(8.0, 0.0, 0.0)],
            Vec3::ZERO,
            100.0,
        );
        let mut distance_sq = 0.0;
        dep.evaluate(0, LOAD_BAND, &mut distance_sq);
        assert!((distance_sq - 64.0).abs() < 1e-3);
    }

    #[test]
    fn test_no_viewers_reads_as_zero_distance() {
        let dep = dependency(Vec::new(), Vec3::new(1e6, 0.0, 0.0), 10.0);
        let mut distance_sq = f32::NAN;
        let priority = dep.evaluate(0, LOAD_BAND, &mut distance_sq);
        assert_eq!(distance_sq, 0.0);
        assert_eq!(priority, TaskPriority::from_bands(LOAD_BAND, 0, 255));
    }

    #[test]
    fn test_far_distance_floors_closeness() {
        let dep = dependency(vec![Vec3::ZERO], Vec3::new(1e6, 0.0, 0.0), 10.0);
        let mut distance_sq = 0.0;
        let priority = dep.evaluate(1, LOAD_BAND, &mut distance_sq);
        assert_eq!(priority, TaskPriority::from_bands(LOAD_BAND, 1, 0));
        assert!(distance_sq > dep.drop_distance_squared);
    }
}
