//! The evaluation contract the evaluate stage drives.

use std::sync::Arc;

use fovea_core::error::Result;
use fovea_cuda::{FrameBuffer, GpuDevice};

use crate::descriptor::{NetBackend, NetDescriptor};
use crate::software::SoftwareNet;
use crate::tensorrt::TensorRtNet;

/// One NV12 frame inside a pool buffer.
#[derive(Debug)]
pub struct FrameView<'a> {
    pub buffer: &'a FrameBuffer,
    pub offset: usize,
    pub width: u32,
    pub height: u32,
}

/// A loaded network plus its preprocessing pipeline.
///
/// The evaluate stage calls `begin_batch`, stages each frame of the batch
/// into an input slot (implementations spread the preprocessing across
/// their streams), runs `forward`, and reads the packed feature bytes back.
pub trait Network: Send {
    /// Square input edge the preprocessing resizes to.
    fn input_dim(&self) -> u32;

    /// Feature floats produced per frame.
    fn outputs_per_frame(&self) -> usize;

    /// Reshape for a batch of `batch` frames.
    fn begin_batch(&mut self, batch: usize) -> Result<()>;

    /// Preprocess one frame into input slot `slot` of the current batch.
    fn stage_frame(&mut self, slot: usize, frame: FrameView<'_>) -> Result<()>;

    /// Synchronise staging and run one forward pass over the batch.
    fn forward(&mut self) -> Result<()>;

    /// Copy the batch's output tensor into `dst` as little-endian f32
    /// bytes; `dst` must hold exactly `batch * outputs_per_frame * 4`.
    fn read_outputs(&mut self, dst: &mut [u8]) -> Result<()>;
}

/// Instantiate the backend named by the descriptor.
pub fn open_network(
    descriptor: &NetDescriptor,
    device: &Arc<GpuDevice>,
    streams: usize,
) -> Result<Box<dyn Network>> {
    descriptor.validate()?;
    match descriptor.backend {
        NetBackend::Software => Ok(Box::new(SoftwareNet::new(descriptor, streams))),
        NetBackend::Tensorrt => TensorRtNet::open(descriptor, device, streams),
    }
}
