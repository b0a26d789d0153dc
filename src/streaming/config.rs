//! Streaming configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::{Error, Result};

/// Per-task behavior toggles recognised by the load task.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingOptions {
    /// On a stream miss, hand the block to the generator so the result can
    /// be cached. When false, misses drop the buffer.
    pub generate_cache_data: bool,
    /// Forwarded to generator tasks.
    pub generator_use_gpu: bool,
    /// Fetch instance blocks when the stream supports them.
    pub request_instances: bool,
}

impl Default for StreamingOptions {
    fn default() -> Self {
        Self {
            generate_cache_data: true,
            generator_use_gpu: false,
            request_instances: false,
        }
    }
}

/// Tunables for the streaming subsystem.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Edge length of streamed blocks in voxels.
    pub block_size: u32,
    /// Distance beyond which queued loads are dropped.
    pub drop_distance: f32,
    pub options: StreamingOptions,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            block_size: 16,
            drop_distance: 512.0,
            options: StreamingOptions::default(),
        }
    }
}

impl StreamingConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    #[inline]
    pub fn drop_distance_squared(&self) -> f32 {
        self.drop_distance * self.drop_distance
    }
}
