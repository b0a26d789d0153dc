//! Volume registry interface and block data delivery types.
//!
//! The registry that tracks live volumes is external; tasks only consume
//! this narrow lookup surface when delivering results.

use glam::IVec3;
use std::sync::Arc;

use crate::storage::block::VoxelBlock;
use crate::streaming::stream::InstanceBlockData;

/// Identifier of a registered volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VolumeId(pub u32);

/// How a delivered block was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockDataType {
    Loaded,
    Generated,
}

/// Result bundle delivered to a volume's data output callback.
#[derive(Debug)]
pub struct BlockDataOutput {
    /// `None` on a plain miss (nothing persisted, caching disabled).
    pub voxels: Option<VoxelBlock>,
    pub instances: Option<InstanceBlockData>,
    /// Block position in block units.
    pub position: IVec3,
    pub lod_index: u8,
    /// True when the task was cancelled before it could run.
    pub dropped: bool,
    pub max_lod_hint: bool,
    pub initial_load: bool,
    pub data_type: BlockDataType,
}

pub type DataOutputCallback = Arc<dyn Fn(BlockDataOutput) + Send + Sync>;

/// Callbacks a volume registers to receive streamed data.
#[derive(Clone)]
pub struct VolumeCallbacks {
    pub data_output_callback: DataOutputCallback,
}

/// Lookup of live volumes and their callbacks.
pub trait VolumeRegistry: Send + Sync {
    fn is_volume_valid(&self, volume_id: VolumeId) -> bool;
    fn get_volume_callbacks(&self, volume_id: VolumeId) -> Option<VolumeCallbacks>;
}

/// Opaque handle to the enclosing volume's full voxel map. Forwarded to
/// generator tasks untouched.
pub trait VolumeVoxelData: Send + Sync {}
