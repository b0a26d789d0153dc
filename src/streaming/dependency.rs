//! Shared, invalidatable stream + generator handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::streaming::generator::VoxelGenerator;
use crate::streaming::stream::VoxelStream;

/// Bundle shared between a volume and all of its pending tasks.
///
/// Immutable after construction except for the validity flag. When the
/// owning volume is torn down it invalidates the bundle; outstanding tasks
/// observe that at their cancellation checks and before emitting results,
/// and drop silently.
pub struct StreamingDependency {
    pub stream: Arc<dyn VoxelStream>,
    pub generator: Option<Arc<dyn VoxelGenerator>>,
    valid: AtomicBool,
}

impl StreamingDependency {
    pub fn new(stream: Arc<dyn VoxelStream>, generator: Option<Arc<dyn VoxelGenerator>>) -> Self {
        Self {
            stream,
            generator,
            valid: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::stream::VoxelQueryData;

    struct NullStream;
    impl VoxelStream for NullStream {
        fn load_voxel_block(&self, _query: &mut VoxelQueryData) {}
    }

    #[test]
    fn test_starts_valid() {
        let dep = StreamingDependency::new(Arc::new(NullStream), None);
        assert!(dep.is_valid());
    }

    #[test]
    fn test_invalidate_is_visible_through_clones() {
        let dep = Arc::new(StreamingDependency::new(Arc::new(NullStream), None));
        let other = dep.clone();
        dep.invalidate();
        assert!(!other.is_valid());
    }
}
