//! Net descriptor: which network to run and how to feed it.

use serde::{Deserialize, Serialize};

use fovea_core::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetBackend {
    Software,
    Tensorrt,
}

/// Loaded once per job from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetDescriptor {
    pub name: String,
    pub backend: NetBackend,
    /// Square network input edge in pixels.
    pub input_dim: u32,
    /// Feature floats emitted per frame.
    pub outputs_per_frame: usize,
    /// Per-channel mean in BGR order, subtracted after conversion.
    pub mean_pixel: [f32; 3],
}

impl NetDescriptor {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let descriptor: Self = serde_json::from_slice(bytes)
            .map_err(|e| EngineError::Config(format!("net descriptor: {e}")))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_dim == 0 {
            return Err(EngineError::Config("net input_dim must be positive".into()));
        }
        if self.outputs_per_frame == 0 {
            return Err(EngineError::Config(
                "net outputs_per_frame must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Bytes of feature output per frame (little-endian f32).
    pub fn output_bytes_per_frame(&self) -> usize {
        self.outputs_per_frame * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_descriptor() {
        let json = br#"{
            "name": "featnet",
            "backend": "software",
            "input_dim": 16,
            "outputs_per_frame": 12,
            "mean_pixel": [104.0, 117.0, 123.0]
        }"#;
        let descriptor = NetDescriptor::from_json(json).unwrap();
        assert_eq!(descriptor.backend, NetBackend::Software);
        assert_eq!(descriptor.output_bytes_per_frame(), 48);
    }

    #[test]
    fn rejects_zero_outputs() {
        let json = br#"{
            "name": "bad",
            "backend": "software",
            "input_dim": 16,
            "outputs_per_frame": 0,
            "mean_pixel": [0.0, 0.0, 0.0]
        }"#;
        assert!(NetDescriptor::from_json(json).is_err());
    }
}
