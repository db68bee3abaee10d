// Copyright 2025 eraflo
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

//! Engine-wide configuration.
//!
//! Values are resolved from three layers, lowest precedence first: the built-in
//! defaults, an optional RON document, and `PRISM_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{EngineError, ErrorKind};

/// The prefix shared by every configuration environment variable.
pub const ENV_PREFIX: &str = "PRISM_";

/// Strategy used by the batch manager to group submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchingMode {
    /// One draw call per renderable.
    Disabled,
    /// Opaque meshes sharing a pipeline key are merged into one vertex/index buffer.
    #[default]
    CpuMerge,
    /// One instanced draw per (mesh, pipeline key) group.
    GpuInstancing,
}

impl FromStr for BatchingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "disabled" | "none" | "off" => Ok(BatchingMode::Disabled),
            "cpu_merge" | "cpumerge" | "merge" => Ok(BatchingMode::CpuMerge),
            "gpu_instancing" | "gpuinstancing" | "instancing" => Ok(BatchingMode::GpuInstancing),
            _ => Err(ConfigError::InvalidValue {
                key: "batching_mode".to_owned(),
                value: s.to_owned(),
            }),
        }
    }
}

/// An error raised while building an [`EngineConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The RON document is malformed.
    #[error("failed to parse config: {0}")]
    Parse(String),
    /// A setting has a value outside its domain.
    #[error("invalid value '{value}' for setting '{key}'")]
    InvalidValue {
        /// The setting name.
        key: String,
        /// The rejected value.
        value: String,
    },
}

impl From<ConfigError> for EngineError {
    #[track_caller]
    fn from(err: ConfigError) -> Self {
        let kind = match &err {
            ConfigError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                ErrorKind::FileNotFound
            }
            ConfigError::Io { .. } => ErrorKind::FileReadFailed,
            ConfigError::Parse(_) => ErrorKind::ResourceInvalidFormat,
            ConfigError::InvalidValue { .. } => ErrorKind::InvalidArgument,
        };
        EngineError::new(kind, err.to_string())
    }
}

/// Every tunable of the render core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Selects the batch strategy.
    pub batching_mode: BatchingMode,
    /// Terminate the process on a wrong-thread GPU call instead of logging it.
    pub gpu_thread_strict_mode: bool,
    /// Buffer-pool memory cap in bytes; `0` means unlimited.
    pub buffer_pool_memory_cap_bytes: u64,
    /// Size of the task-scheduler pool; `0` picks `cpu_count - 1`.
    pub task_scheduler_worker_count: u32,
    /// Maximum number of instances the LOD renderer uploads per frame.
    pub lod_max_instances_per_frame: u32,
    /// Retries for a failed asynchronous load before it is reported as failed.
    pub async_loader_max_retries: u32,
    /// Uploads the async loader performs per `process_completed_tasks` call.
    pub async_loader_uploads_per_frame: u32,
    /// Frames a resource may stay untouched before `cleanup_unused` evicts it.
    pub resource_unused_frame_threshold: u64,
    /// Frames a pooled buffer may stay unused before it is deleted.
    pub buffer_pool_unused_frame_threshold: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batching_mode: BatchingMode::CpuMerge,
            gpu_thread_strict_mode: false,
            buffer_pool_memory_cap_bytes: 0,
            task_scheduler_worker_count: 0,
            lod_max_instances_per_frame: 100_000,
            async_loader_max_retries: 3,
            async_loader_uploads_per_frame: 8,
            resource_unused_frame_threshold: 300,
            buffer_pool_unused_frame_threshold: 120,
        }
    }
}

impl EngineConfig {
    /// Parses a RON document. Missing fields keep their defaults.
    pub fn from_ron_str(source: &str) -> Result<Self, ConfigError> {
        ron::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reads and parses a RON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_ron_str(&text)
    }

    /// Serializes the configuration as pretty RON.
    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Applies `PRISM_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(std::env::vars())
    }

    /// Applies `PRISM_*` overrides from an arbitrary key/value source. Keys without the
    /// prefix and unknown keys are ignored.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match name {
                "BATCHING_MODE" => self.batching_mode = value.parse()?,
                "GPU_THREAD_STRICT" | "GPU_THREAD_STRICT_MODE" => {
                    self.gpu_thread_strict_mode = parse_bool(name, value)?
                }
                "BUFFER_POOL_MEMORY_CAP_BYTES" => {
                    self.buffer_pool_memory_cap_bytes = parse_num(name, value)?
                }
                "TASK_SCHEDULER_WORKER_COUNT" | "WORKER_COUNT" => {
                    self.task_scheduler_worker_count = parse_num(name, value)?
                }
                "LOD_MAX_INSTANCES_PER_FRAME" => {
                    self.lod_max_instances_per_frame = parse_num(name, value)?
                }
                "ASYNC_LOADER_MAX_RETRIES" => {
                    self.async_loader_max_retries = parse_num(name, value)?
                }
                "ASYNC_LOADER_UPLOADS_PER_FRAME" => {
                    self.async_loader_uploads_per_frame = parse_num(name, value)?
                }
                "RESOURCE_UNUSED_FRAME_THRESHOLD" => {
                    self.resource_unused_frame_threshold = parse_num(name, value)?
                }
                "BUFFER_POOL_UNUSED_FRAME_THRESHOLD" => {
                    self.buffer_pool_unused_frame_threshold = parse_num(name, value)?
                }
                other => log::debug!("Ignoring unknown config variable {ENV_PREFIX}{other}"),
            }
        }
        Ok(())
    }

    /// Defaults, overridden by the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// The number of scheduler workers to spawn, resolving `0` to `max(1, cpu_count - 1)`.
    pub fn resolved_worker_count(&self) -> usize {
        resolve_worker_count(self.task_scheduler_worker_count as usize)
    }
}

/// Resolves a requested worker count, mapping `0` to `max(1, cpu_count - 1)`.
pub fn resolve_worker_count(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus.saturating_sub(1).max(1)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_owned(),
            value: value.to_owned(),
        }),
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn ron_fills_missing_fields_with_defaults() {
        let cfg = EngineConfig::from_ron_str(
            "(batching_mode: gpu_instancing, lod_max_instances_per_frame: 50)",
        )
        .unwrap();
        assert_eq!(cfg.batching_mode, BatchingMode::GpuInstancing);
        assert_eq!(cfg.lod_max_instances_per_frame, 50);
        assert_eq!(cfg.async_loader_max_retries, 3);
    }

    #[test]
    fn malformed_ron_is_an_error() {
        assert!(matches!(
            EngineConfig::from_ron_str("(batching_mode: 12"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn overrides_take_precedence() {
        let mut cfg = EngineConfig::default();
        cfg.apply_overrides([
            ("PRISM_BATCHING_MODE", "gpu_instancing"),
            ("PRISM_GPU_THREAD_STRICT", "1"),
            ("PRISM_TASK_SCHEDULER_WORKER_COUNT", "3"),
            ("HOME", "/root"),
        ])
        .unwrap();
        assert_eq!(cfg.batching_mode, BatchingMode::GpuInstancing);
        assert!(cfg.gpu_thread_strict_mode);
        assert_eq!(cfg.resolved_worker_count(), 3);
    }

    #[test]
    fn invalid_override_is_reported() {
        let mut cfg = EngineConfig::default();
        let err = cfg
            .apply_overrides([("PRISM_BATCHING_MODE", "quantum")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        let engine: EngineError = err.into();
        assert_eq!(engine.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn auto_worker_count_is_at_least_one() {
        assert!(EngineConfig::default().resolved_worker_count() >= 1);
    }

    #[test]
    fn from_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.ron");
        let mut cfg = EngineConfig::default();
        cfg.buffer_pool_memory_cap_bytes = 64 << 20;
        std::fs::File::create(&path)
            .unwrap()
            .write_all(cfg.to_ron_string().unwrap().as_bytes())
            .unwrap();
        assert_eq!(EngineConfig::from_file(&path).unwrap(), cfg);
        assert!(matches!(
            EngineConfig::from_file(dir.path().join("missing.ron")),
            Err(ConfigError::Io { .. })
        ));
    }
}
