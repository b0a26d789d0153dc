//! Voxel block storage: pooled buffers, value encoding, the block
//! container and its flat serialization.

pub mod block;
pub mod encoding;
pub mod memory_pool;
pub mod serialization;

pub use block::{channels, Compression, VoxelBlock, MAX_CHANNELS};
pub use encoding::Depth;
pub use memory_pool::{BlockMemoryPool, BLOCK_MEMORY_POOL};
