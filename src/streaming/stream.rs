//! Persistent stream interface for voxel and instance blocks.
//!
//! A stream is whatever persists block bytes: a region file, a database, a
//! network endpoint. The core only issues queries and dispatches on the
//! result codes.

use glam::IVec3;

use crate::storage::block::VoxelBlock;

/// Outcome of a stream query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamResult {
    /// The stream failed; the target buffer is in an unspecified state.
    Error,
    /// Nothing persisted for this location.
    BlockNotFound,
    /// The block was loaded into the target buffer.
    BlockFound,
}

/// One voxel block query. The caller creates the target block and
/// initialises `result` to [`StreamResult::Error`]; the stream overwrites
/// both.
pub struct VoxelQueryData<'a> {
    pub voxels: &'a mut VoxelBlock,
    /// Origin of the block in voxels at lod 0 scale.
    pub origin_in_voxels: IVec3,
    pub lod_index: u8,
    pub result: StreamResult,
}

/// Opaque per-block instance payload. Produced and consumed by the
/// instancing system; the core only moves it around.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstanceBlockData {
    pub bytes: Vec<u8>,
}

/// One instance block query.
pub struct InstancesQueryData {
    pub lod_index: u8,
    /// Block position in block units.
    pub position: IVec3,
    pub data: Option<InstanceBlockData>,
    pub result: StreamResult,
}

/// Capability bundle for loading persisted blocks.
pub trait VoxelStream: Send + Sync {
    /// Load a block into `query.voxels` and set `query.result`.
    /// May block on I/O.
    fn load_voxel_block(&self, query: &mut VoxelQueryData);

    /// Whether this stream persists instance blocks at all.
    fn supports_instance_blocks(&self) -> bool {
        false
    }

    /// Batch-load instance payloads. Default does nothing; queries keep
    /// their caller-initialised result.
    fn load_instance_blocks(&self, _queries: &mut [InstancesQueryData]) {}
}
