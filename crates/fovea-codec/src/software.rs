//! Software decoder for the raw NV12 codec.
//!
//! Raw-codec packets carry whole frames back to back, so "decoding" is
//! splitting the payload on frame boundaries. The decoder still honours the
//! full contract (buffering, discontinuity flush, discard) so the decode
//! stage exercises exactly the paths a hardware decoder would.

use std::collections::VecDeque;

use fovea_core::error::{EngineError, Result};
use fovea_core::types::{ItemMetadata, nv12_frame_size};
use fovea_cuda::FrameBuffer;

use crate::decoder::VideoDecoder;

pub struct SoftwareDecoder {
    frame_size: usize,
    buffered: VecDeque<Vec<u8>>,
}

impl SoftwareDecoder {
    pub fn new(meta: &ItemMetadata) -> Result<Self> {
        let frame_size = nv12_frame_size(meta.width, meta.height);
        if frame_size == 0 {
            return Err(EngineError::Decode("zero-sized frame geometry".into()));
        }
        Ok(Self {
            frame_size,
            buffered: VecDeque::new(),
        })
    }

    fn next_frame(&mut self) -> Result<Vec<u8>> {
        self.buffered
            .pop_front()
            .ok_or_else(|| EngineError::Decode("no decoded frame buffered".into()))
    }
}

impl VideoDecoder for SoftwareDecoder {
    fn feed(&mut self, packet: &[u8], discontinuity: bool) -> Result<bool> {
        if discontinuity {
            self.buffered.clear();
        }
        if packet.is_empty() {
            // Flush request: everything decodable is already buffered.
            return Ok(!self.buffered.is_empty());
        }
        if packet.len() % self.frame_size != 0 {
            return Err(EngineError::Decode(format!(
                "packet of {} bytes is not a whole number of {}-byte frames",
                packet.len(),
                self.frame_size
            )));
        }
        for frame in packet.chunks(self.frame_size) {
            self.buffered.push_back(frame.to_vec());
        }
        Ok(true)
    }

    fn get_frame(&mut self, dst: &mut FrameBuffer, offset: usize, len: usize) -> Result<bool> {
        let frame = self.next_frame()?;
        if len != frame.len() {
            return Err(EngineError::Decode(format!(
                "frame copy of {len} bytes requested, frame is {}",
                frame.len()
            )));
        }
        dst.write_at(offset, &frame)?;
        Ok(!self.buffered.is_empty())
    }

    fn discard_frame(&mut self) -> Result<bool> {
        self.next_frame()?;
        Ok(!self.buffered.is_empty())
    }

    fn frames_buffered(&self) -> usize {
        self.buffered.len()
    }

    fn wait_until_frames_copied(&mut self) -> Result<()> {
        // Copies are synchronous in both host and device mode.
        Ok(())
    }
}
