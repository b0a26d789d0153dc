//! Asynchronous block load task.
//!
//! Queries the stream for one block. On a miss with caching enabled the
//! freshly created block is handed to a generator task and this task goes
//! silent; otherwise the (possibly empty) result is delivered to the
//! owning volume through its registered callback. Dependency invalidation
//! between dispatch and delivery suppresses the result.

use glam::IVec3;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::storage::block::VoxelBlock;
use crate::streaming::config::StreamingOptions;
use crate::streaming::dependency::StreamingDependency;
use crate::streaming::generator::{BlockTaskParams, VoxelGenerator};
use crate::streaming::priority::{PriorityDependency, TaskPriority, LOAD_BAND};
use crate::streaming::stream::{
    InstanceBlockData, InstancesQueryData, StreamResult, VoxelQueryData, VoxelStream,
};
use crate::streaming::task_runtime::{TaskContext, TaskRuntime, ThreadedTask};
use crate::streaming::volume::{
    BlockDataOutput, BlockDataType, VolumeId, VolumeRegistry, VolumeVoxelData,
};

/// Live load tasks in the process, for observability.
static RUNNING_COUNT: AtomicI32 = AtomicI32::new(0);

/// Immutable description of one block load.
#[derive(Clone, Debug)]
pub struct LoadBlockRequest {
    pub volume_id: VolumeId,
    /// Block position in block units.
    pub position: IVec3,
    pub lod_index: u8,
    /// Edge length of the block in voxels.
    pub block_size: u32,
    pub options: StreamingOptions,
}

/// Loads one block from a stream, with generator fallback on miss.
pub struct LoadBlockDataTask {
    request: LoadBlockRequest,
    stream_dependency: Arc<StreamingDependency>,
    priority_dependency: PriorityDependency,
    registry: Arc<dyn VolumeRegistry>,
    runtime: Arc<dyn TaskRuntime>,
    voxel_data: Option<Arc<dyn VolumeVoxelData>>,
    voxels: Option<VoxelBlock>,
    instances: Option<InstanceBlockData>,
    has_run: bool,
    too_far: bool,
    requested_generator_task: bool,
    max_lod_hint: bool,
}

impl LoadBlockDataTask {
    pub fn new(
        request: LoadBlockRequest,
        stream_dependency: Arc<StreamingDependency>,
        priority_dependency: PriorityDependency,
        registry: Arc<dyn VolumeRegistry>,
        runtime: Arc<dyn TaskRuntime>,
        voxel_data: Option<Arc<dyn VolumeVoxelData>>,
    ) -> Self {
        RUNNING_COUNT.fetch_add(1, Ordering::Relaxed);
        Self {
            request,
            stream_dependency,
            priority_dependency,
            registry,
            runtime,
            voxel_data,
            voxels: None,
            instances: None,
            has_run: false,
            too_far: false,
            requested_generator_task: false,
            max_lod_hint: false,
        }
    }

    /// Number of live load tasks in the process.
    pub fn debug_running_count() -> i32 {
        RUNNING_COUNT.load(Ordering::Relaxed)
    }
}

impl Drop for LoadBlockDataTask {
    fn drop(&mut self) {
        RUNNING_COUNT.fetch_sub(1, Ordering::Relaxed);
    }
}

impl ThreadedTask for LoadBlockDataTask {
    fn run(&mut self, _ctx: &mut TaskContext) {
        debug_assert!(self.voxels.is_none(), "load task ran twice");
        if self.voxels.is_some() {
            log::error!("load task ran twice, ignoring");
            return;
        }

        let stream = self.stream_dependency.stream.clone();
        let origin_in_voxels =
            self.request.position * ((self.request.block_size as i32) << self.request.lod_index);

        let block_size = self.request.block_size as i32;
        let mut voxels = VoxelBlock::new(IVec3::splat(block_size));

        let mut query = VoxelQueryData {
            voxels: &mut voxels,
            origin_in_voxels,
            lod_index: self.request.lod_index,
            result: StreamResult::Error,
        };
        stream.load_voxel_block(&mut query);
        let result = query.result;

        match result {
            StreamResult::Error => {
                log::error!(
                    "error loading voxel block at {} lod {}",
                    self.request.position,
                    self.request.lod_index
                );
                // Keep the freshly created block; the volume receives an
                // empty placeholder with dropped = false.
                self.voxels = Some(voxels);
            }
            StreamResult::BlockNotFound => {
                let generator = if self.request.options.generate_cache_data {
                    self.stream_dependency.generator.clone()
                } else {
                    None
                };
                match generator {
                    Some(generator) => {
                        let params = BlockTaskParams {
                            voxels,
                            volume_id: self.request.volume_id,
                            block_position: self.request.position,
                            lod_index: self.request.lod_index,
                            block_size: self.request.block_size,
                            stream_dependency: self.stream_dependency.clone(),
                            priority_dependency: self.priority_dependency.clone(),
                            registry: self.registry.clone(),
                            use_gpu: self.request.options.generator_use_gpu,
                            data: self.voxel_data.clone(),
                        };
                        let task = generator.create_block_task(params);
                        self.runtime.push_async_task(task);
                        // The generator task emits when done; this one stays
                        // silent.
                        self.requested_generator_task = true;
                    }
                    None => {
                        // Plain miss: the buffer goes back to the pool and
                        // the volume is told about the empty result.
                        drop(voxels);
                    }
                }
            }
            StreamResult::BlockFound => self.voxels = Some(voxels),
        }

        if self.request.options.request_instances && stream.supports_instance_blocks() {
            debug_assert!(self.instances.is_none());
            let mut queries = [InstancesQueryData {
                lod_index: self.request.lod_index,
                position: self.request.position,
                data: None,
                result: StreamResult::Error,
            }];
            stream.load_instance_blocks(&mut queries);
            match queries[0].result {
                StreamResult::Error => log::error!(
                    "error loading instance block at {} lod {}",
                    self.request.position,
                    self.request.lod_index
                ),
                StreamResult::BlockFound => self.instances = queries[0].data.take(),
                // Not found: the instancer can generate them after meshing.
                StreamResult::BlockNotFound => {}
            }
        }

        self.has_run = true;
    }

    fn get_priority(&mut self) -> TaskPriority {
        let mut closest_distance_sq = 0.0;
        let priority =
            self.priority_dependency
                .evaluate(self.request.lod_index, LOAD_BAND, &mut closest_distance_sq);
        self.too_far = closest_distance_sq > self.priority_dependency.drop_distance_squared;
        priority
    }

    fn is_cancelled(&mut self) -> bool {
        !self.stream_dependency.is_valid() || self.too_far
    }

    fn apply_result(&mut self) {
        if !self.registry.is_volume_valid(self.request.volume_id) {
            // The volume can be removed while its requests are in flight.
            log::debug!(
                "block load response for volume {:?} arrived after removal",
                self.request.volume_id
            );
            return;
        }
        if !self.stream_dependency.is_valid() || self.requested_generator_task {
            return;
        }
        let Some(callbacks) = self.registry.get_volume_callbacks(self.request.volume_id) else {
            log::error!(
                "volume {:?} has no registered callbacks",
                self.request.volume_id
            );
            return;
        };
        let output = BlockDataOutput {
            voxels: self.voxels.take(),
            instances: self.instances.take(),
            position: self.request.position,
            lod_index: self.request.lod_index,
            dropped: !self.has_run,
            max_lod_hint: self.max_lod_hint,
            initial_load: false,
            data_type: BlockDataType::Loaded,
        };
        (callbacks.data_output_callback)(output);
    }
}
