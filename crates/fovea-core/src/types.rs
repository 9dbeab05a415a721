//! Dataset and work-item value types shared across the engine.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Video codec of a dataset item.
///
/// `Raw` is the packetised NV12 stream produced by `fovea ingest`; `H264`
/// and `Hevc` route to the hardware decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Raw,
    H264,
    Hevc,
}

/// Per-video metadata, read-only once the job is set up.
///
/// `keyframe_positions` holds the frame index of every keyframe and
/// `keyframe_byte_offsets` the byte offset of that keyframe's packet in the
/// item's data file. Both vectors are index-aligned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub frames: i64,
    pub width: u32,
    pub height: u32,
    pub codec: Codec,
    pub keyframe_positions: Vec<i64>,
    pub keyframe_byte_offsets: Vec<i64>,
    /// Codec priming packets fed to a hardware decoder before the first
    /// data packet (parameter sets and the like). Empty for the raw codec.
    #[serde(default)]
    pub priming_packets: Vec<Vec<u8>>,
}

impl ItemMetadata {
    /// Check the structural invariants the planner and loader rely on.
    pub fn validate(&self) -> Result<()> {
        if self.frames <= 0 {
            return Err(EngineError::Metadata(format!(
                "frame count must be positive, got {}",
                self.frames
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(EngineError::Metadata(format!(
                "invalid dimensions {}x{}",
                self.width, self.height
            )));
        }
        if self.keyframe_positions.len() != self.keyframe_byte_offsets.len() {
            return Err(EngineError::Metadata(
                "keyframe position and byte offset vectors differ in length".into(),
            ));
        }
        if self.keyframe_positions.first() != Some(&0) {
            return Err(EngineError::Metadata(
                "first keyframe must be frame 0".into(),
            ));
        }
        for pair in self.keyframe_positions.windows(2) {
            if pair[1] <= pair[0] {
                return Err(EngineError::Metadata(
                    "keyframe positions must be strictly increasing".into(),
                ));
            }
        }
        for pair in self.keyframe_byte_offsets.windows(2) {
            if pair[1] <= pair[0] {
                return Err(EngineError::Metadata(
                    "keyframe byte offsets must be strictly increasing".into(),
                ));
            }
        }
        if let Some(&last) = self.keyframe_positions.last()
            && last >= self.frames
        {
            return Err(EngineError::Metadata(format!(
                "keyframe at frame {last} beyond frame count {}",
                self.frames
            )));
        }
        Ok(())
    }
}

/// One shard of work: frames `[start_frame, end_frame)` of one video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub video_index: usize,
    pub start_frame: i64,
    pub end_frame: i64,
}

impl WorkItem {
    pub fn frames(&self) -> i64 {
        self.end_frame - self.start_frame
    }
}

/// Byte size of one NV12 frame: a full-resolution Y plane followed by an
/// interleaved half-resolution UV plane.
pub fn nv12_frame_size(width: u32, height: u32) -> usize {
    let w = width as usize;
    let h = height as usize;
    w * h + 2 * (w.div_ceil(2) * h.div_ceil(2))
}
