//! On-demand block generation interface.
//!
//! When a stream has nothing persisted for a block, the load task can hand
//! the empty buffer to a generator, which packages a task that fills it
//! and emits the result to the volume the same way a load task would.

use glam::IVec3;
use std::sync::Arc;

use crate::storage::block::VoxelBlock;
use crate::streaming::dependency::StreamingDependency;
use crate::streaming::priority::PriorityDependency;
use crate::streaming::task_runtime::ThreadedTask;
use crate::streaming::volume::{VolumeId, VolumeRegistry, VolumeVoxelData};

/// Everything a generator task needs, handed over by the load task on a
/// stream miss. Takes ownership of the target block.
pub struct BlockTaskParams {
    pub voxels: VoxelBlock,
    pub volume_id: VolumeId,
    /// Block position in block units.
    pub block_position: IVec3,
    pub lod_index: u8,
    pub block_size: u32,
    pub stream_dependency: Arc<StreamingDependency>,
    pub priority_dependency: PriorityDependency,
    pub registry: Arc<dyn VolumeRegistry>,
    pub use_gpu: bool,
    /// Opaque handle to the volume's full map, for generators that sample
    /// neighbouring data.
    pub data: Option<Arc<dyn VolumeVoxelData>>,
}

/// Capability bundle for procedural block generation.
pub trait VoxelGenerator: Send + Sync {
    /// Build a runnable task owning `params.voxels`. The task is
    /// responsible for emitting the final result to the volume.
    fn create_block_task(&self, params: BlockTaskParams) -> Box<dyn ThreadedTask>;
}
