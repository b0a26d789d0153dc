//! Voxelstream - out-of-core voxel block storage and streaming
//!
//! Two halves:
//! - [`storage`]: a compact multi-channel, multi-bit-depth 3D block
//!   container with uniform compression, pooled memory and a flat
//!   serialization layout.
//! - [`streaming`]: the asynchronous load-block task and the narrow
//!   interfaces it consumes (stream, generator, volume registry, task
//!   runtime).

pub mod core;
pub mod storage;
pub mod streaming;
