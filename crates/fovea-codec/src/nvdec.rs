//! NVDEC seam.
//!
//! Hardware decode binds through [`VideoDecoder`] exactly like the software
//! path. This module is the integration point for the NVIDIA Video Codec
//! SDK; until that lands it reports itself unavailable so h264/hevc datasets
//! fail fast with a clear message instead of producing garbage.

use std::sync::Arc;

use fovea_core::error::{EngineError, Result};
use fovea_core::types::ItemMetadata;
use fovea_cuda::GpuDevice;

use crate::decoder::VideoDecoder;

pub struct NvDecoder;

impl NvDecoder {
    pub fn open(meta: &ItemMetadata, device: &Arc<GpuDevice>) -> Result<Box<dyn VideoDecoder>> {
        let _ = (meta, device);
        Err(EngineError::Decode(
            "built without the NVIDIA Video Codec SDK: hardware decode is unavailable on this host"
                .into(),
        ))
    }
}
