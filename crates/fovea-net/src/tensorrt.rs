//! TensorRT seam.
//!
//! GPU inference binds through [`Network`] exactly like the software path.
//! This module is the integration point for a TensorRT (or ONNX Runtime)
//! engine; until that lands it reports itself unavailable so jobs that ask
//! for it fail fast.

use std::sync::Arc;

use fovea_core::error::{EngineError, Result};
use fovea_cuda::GpuDevice;

use crate::descriptor::NetDescriptor;
use crate::network::Network;

pub struct TensorRtNet;

impl TensorRtNet {
    pub fn open(
        descriptor: &NetDescriptor,
        device: &Arc<GpuDevice>,
        streams: usize,
    ) -> Result<Box<dyn Network>> {
        let _ = (descriptor, device, streams);
        Err(EngineError::Inference(
            "built without a TensorRT runtime: GPU inference is unavailable on this host".into(),
        ))
    }
}
