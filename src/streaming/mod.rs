//! Block streaming: stream and generator interfaces, shared dependencies,
//! priorities and the asynchronous load task.

pub mod config;
pub mod dependency;
pub mod generator;
pub mod load_block_task;
pub mod priority;
pub mod stream;
pub mod task_runtime;
pub mod volume;

pub use config::{StreamingConfig, StreamingOptions};
pub use dependency::StreamingDependency;
pub use generator::{BlockTaskParams, VoxelGenerator};
pub use load_block_task::{LoadBlockDataTask, LoadBlockRequest};
pub use priority::{PriorityDependency, TaskPriority, ViewersData, LOAD_BAND};
pub use stream::{
    InstanceBlockData, InstancesQueryData, StreamResult, VoxelQueryData, VoxelStream,
};
pub use task_runtime::{TaskContext, TaskRuntime, ThreadedTask};
pub use volume::{
    BlockDataOutput, BlockDataType, DataOutputCallback, VolumeCallbacks, VolumeId,
    VolumeRegistry, VolumeVoxelData,
};
