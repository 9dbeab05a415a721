//! Decode stage: one worker per GPU, feeding a hardware (or software)
//! decoder and landing the work item's frames in a pool buffer.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use fovea_core::error::{EngineError, Result};
use fovea_core::packet::PacketStream;
use fovea_core::profile::Profiler;
use fovea_core::types::nv12_frame_size;
use fovea_codec::{VideoDecoder, open_decoder};
use fovea_cuda::GpuDevice;

use crate::abort::AbortFlag;
use crate::entries::{DecodeWork, EvalItem, EvalWork};
use crate::job::JobContext;
use crate::pool::FramePool;
use crate::queue::WorkQueue;

pub struct DecodeStage {
    pub ctx: Arc<JobContext>,
    pub gpu: usize,
    pub device: Arc<GpuDevice>,
    pub input: WorkQueue<DecodeWork>,
    pub pool: FramePool,
    pub output: WorkQueue<EvalWork>,
    pub abort: AbortFlag,
    pub base: Instant,
}

impl DecodeStage {
    pub fn run(self) -> Result<Profiler> {
        let setup_start = Instant::now();
        let mut profiler = Profiler::new(self.base);
        self.device.bind_thread()?;
        // Codec and geometry are uniform across the dataset (verified at
        // job setup), so one decoder configured from the first item serves
        // every work item this worker sees.
        let mut decoder = open_decoder(&self.ctx.metadata[0], &self.device)?;
        profiler.add_interval("setup", setup_start, Instant::now());

        loop {
            let idle_start = Instant::now();
            let entry = match self.input.pop()? {
                DecodeWork::Item(entry) => entry,
                DecodeWork::Stop => break,
            };
            let mut frames = self.pool.acquire(&self.abort)?;
            profiler.add_interval("idle", idle_start, Instant::now());
            let work_start = Instant::now();

            let item = *self.ctx.plan.get(entry.work_item_index)?;
            let meta = &self.ctx.metadata[item.video_index];
            let frame_size = nv12_frame_size(meta.width, meta.height);

            let mut packets = PacketStream::new(&entry.encoded);
            let mut discontinuity = true;
            let mut current = entry.start_keyframe;
            while current < item.end_frame {
                let packet = match packets.next() {
                    Some(result) => result?,
                    // Out of packets: flush whatever the decoder holds.
                    None => &[],
                };
                let have_frames = decoder.feed(packet, discontinuity)?;
                if packet.is_empty() && !have_frames {
                    return Err(EngineError::Decode(format!(
                        "decoder starved at frame {current} of work item {}",
                        entry.work_item_index
                    )));
                }
                if have_frames {
                    let mut more = true;
                    while more && current < item.end_frame {
                        if current >= item.start_frame {
                            let offset = frame_size * (current - item.start_frame) as usize;
                            more = decoder.get_frame(frames.buffer_mut(), offset, frame_size)?;
                        } else {
                            // Keyframe run-in ahead of the item.
                            more = decoder.discard_frame()?;
                        }
                        current += 1;
                    }
                }
                discontinuity = false;
            }
            decoder.wait_until_frames_copied()?;
            while decoder.frames_buffered() > 0 {
                decoder.discard_frame()?;
            }

            drop(entry.encoded);

            profiler.add_interval("task", work_start, Instant::now());
            self.output.push(EvalWork::Item(EvalItem {
                work_item_index: entry.work_item_index,
                frames,
            }))?;
        }

        debug!(gpu = self.gpu, "decode worker finished");
        Ok(profiler)
    }
}
