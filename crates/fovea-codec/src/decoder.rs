//! The decoder contract the decode stage drives.

use std::sync::Arc;

use fovea_core::error::Result;
use fovea_core::types::{Codec, ItemMetadata};
use fovea_cuda::{FrameBuffer, GpuDevice};

use crate::nvdec::NvDecoder;
use crate::software::SoftwareDecoder;

/// A video decoder producing NV12 frames into pool buffers.
///
/// The decode stage feeds length-delimited packets and drains emitted frames
/// in display order. Implementations may buffer internally; frames the stage
/// does not want are dropped through `discard_frame` without a copy.
pub trait VideoDecoder: Send {
    /// Feed one encoded packet (empty slice = flush request). Set
    /// `discontinuity` on the first packet after a seek so internal state is
    /// reset. Returns `true` when decoded frames are available.
    fn feed(&mut self, packet: &[u8], discontinuity: bool) -> Result<bool>;

    /// Copy the next decoded frame into `dst` at `offset` (`len` bytes).
    /// Returns `true` when more frames remain after this one.
    fn get_frame(&mut self, dst: &mut FrameBuffer, offset: usize, len: usize) -> Result<bool>;

    /// Drop the next decoded frame. Returns `true` when more frames remain.
    fn discard_frame(&mut self) -> Result<bool>;

    /// Number of decoded frames currently buffered.
    fn frames_buffered(&self) -> usize;

    /// Block until every frame copy issued by `get_frame` has completed.
    fn wait_until_frames_copied(&mut self) -> Result<()>;
}

/// Open the decoder for an item's codec on the given device.
pub fn open_decoder(
    meta: &ItemMetadata,
    device: &Arc<GpuDevice>,
) -> Result<Box<dyn VideoDecoder>> {
    match meta.codec {
        Codec::Raw => Ok(Box::new(SoftwareDecoder::new(meta)?)),
        Codec::H264 | Codec::Hevc => NvDecoder::open(meta, device),
    }
}
