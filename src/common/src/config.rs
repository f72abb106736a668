// Copyright 2023 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Engine configuration, loadable from TOML.

use serde::Deserialize;

use crate::error::{CommonError, Result};

/// Top-level configuration of one worker process.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RillConfig {
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl RillConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CommonError::InvalidConfigParameter {
            name: "config".into(),
            reason: e.to_string(),
        })
    }
}

/// Sizing of the tuple buffer pools.
#[derive(Clone, Debug, Deserialize)]
pub struct BufferConfig {
    /// Size of one pooled buffer in bytes.
    #[serde(default = "default_buffer_size_bytes")]
    pub buffer_size_bytes: usize,
    /// Number of buffers in the global pool.
    #[serde(default = "default_buffers_in_global_pool")]
    pub buffers_in_global_pool: usize,
    /// Buffers reserved per source thread unless its descriptor overrides it.
    #[serde(default = "default_buffers_in_source_local_pool")]
    pub buffers_in_source_local_pool: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            buffer_size_bytes: default_buffer_size_bytes(),
            buffers_in_global_pool: default_buffers_in_global_pool(),
            buffers_in_source_local_pool: default_buffers_in_source_local_pool(),
        }
    }
}

fn default_buffer_size_bytes() -> usize {
    4096
}

fn default_buffers_in_global_pool() -> usize {
    1024
}

fn default_buffers_in_source_local_pool() -> usize {
    64
}

/// Sizing of the pipeline execution runtime.
#[derive(Clone, Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Worker threads pulling pipeline tasks.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
        }
    }
}

fn default_worker_threads() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_sections() {
        let config = RillConfig::from_toml("").unwrap();
        assert_eq!(config.buffer.buffer_size_bytes, 4096);
        assert_eq!(config.runtime.worker_threads, 4);
    }

    #[test]
    fn partial_overrides_keep_remaining_defaults() {
        let config = RillConfig::from_toml(
            "[buffer]\nbuffer_size_bytes = 128\n\n[runtime]\nworker_threads = 2\n",
        )
        .unwrap();
        assert_eq!(config.buffer.buffer_size_bytes, 128);
        assert_eq!(config.buffer.buffers_in_global_pool, 1024);
        assert_eq!(config.runtime.worker_threads, 2);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        assert!(matches!(
            RillConfig::from_toml("buffer = nonsense"),
            Err(CommonError::InvalidConfigParameter { .. })
        ));
    }
}
