//! Engine tunables.

use std::str::FromStr;

use crate::error::{EngineError, Result};

/// How the engine binds to compute devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceMode {
    /// Use the CUDA driver when it loads, otherwise fall back to host
    /// memory and the software backends.
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl FromStr for DeviceMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            other => Err(EngineError::Config(format!(
                "unknown device mode {other:?} (expected auto, cpu, or cuda)"
            ))),
        }
    }
}

/// Per-node engine configuration.
///
/// `tasks_in_queue_per_gpu` doubles as the number of pre-allocated frame
/// buffers per GPU; `gpus * tasks_in_queue_per_gpu` is the local queue-depth
/// threshold the distribution coordinator steers by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub load_workers: usize,
    pub save_workers: usize,
    pub gpus: usize,
    pub tasks_in_queue_per_gpu: usize,
    /// Frames per work item.
    pub work_item_size: usize,
    /// Frames per network forward pass.
    pub batch_size: usize,
    /// Preprocessing streams per evaluator.
    pub streams: usize,
    pub device_mode: DeviceMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            load_workers: 2,
            save_workers: 2,
            gpus: 1,
            tasks_in_queue_per_gpu: 4,
            work_item_size: 96,
            batch_size: 32,
            streams: 4,
            device_mode: DeviceMode::Auto,
        }
    }
}

impl EngineConfig {
    /// Local queue depth below which a node asks for more work.
    pub fn queue_threshold(&self) -> usize {
        self.gpus * self.tasks_in_queue_per_gpu
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("load_workers", self.load_workers),
            ("save_workers", self.save_workers),
            ("gpus", self.gpus),
            ("tasks_in_queue_per_gpu", self.tasks_in_queue_per_gpu),
            ("work_item_size", self.work_item_size),
            ("batch_size", self.batch_size),
            ("streams", self.streams),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(EngineError::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_gpus_rejected() {
        let config = EngineConfig {
            gpus: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn threshold_is_gpus_times_queue_depth() {
        let config = EngineConfig {
            gpus: 2,
            tasks_in_queue_per_gpu: 3,
            ..EngineConfig::default()
        };
        assert_eq!(config.queue_threshold(), 6);
    }

    #[test]
    fn device_mode_parses() {
        assert_eq!("cpu".parse::<DeviceMode>().unwrap(), DeviceMode::Cpu);
        assert!("gpu".parse::<DeviceMode>().is_err());
    }
}
