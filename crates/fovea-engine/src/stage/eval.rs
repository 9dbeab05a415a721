//! Evaluate stage: one worker per GPU, batching frames through the network
//! and packing the per-frame feature vectors into a host buffer.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use fovea_core::error::Result;
use fovea_core::profile::Profiler;
use fovea_core::types::nv12_frame_size;
use fovea_cuda::GpuDevice;
use fovea_net::{FrameView, NetDescriptor, Network, open_network};

use crate::entries::{EvalWork, SaveItem, SaveWork};
use crate::job::JobContext;
use crate::queue::WorkQueue;

pub struct EvalStage {
    pub ctx: Arc<JobContext>,
    pub gpu: usize,
    pub device: Arc<GpuDevice>,
    pub descriptor: NetDescriptor,
    pub input: WorkQueue<EvalWork>,
    pub output: WorkQueue<SaveWork>,
    pub base: Instant,
}

impl EvalStage {
    pub fn run(self) -> Result<Profiler> {
        let setup_start = Instant::now();
        let mut profiler = Profiler::new(self.base);
        self.device.bind_thread()?;
        let mut net = open_network(&self.descriptor, &self.device, self.ctx.config.streams)?;
        let bytes_per_frame = self.descriptor.output_bytes_per_frame();
        profiler.add_interval("setup", setup_start, Instant::now());

        loop {
            let idle_start = Instant::now();
            let entry = match self.input.pop()? {
                EvalWork::Item(entry) => entry,
                EvalWork::Stop => break,
            };
            profiler.add_interval("idle", idle_start, Instant::now());
            let work_start = Instant::now();

            let item = *self.ctx.plan.get(entry.work_item_index)?;
            let meta = &self.ctx.metadata[item.video_index];
            let frame_size = nv12_frame_size(meta.width, meta.height);
            let total = item.frames() as usize;
            let mut output = vec![0u8; total * bytes_per_frame];

            let mut done = 0;
            while done < total {
                let batch = self.ctx.config.batch_size.min(total - done);
                net.begin_batch(batch)?;
                for i in 0..batch {
                    net.stage_frame(i, FrameView {
                        buffer: entry.frames.buffer(),
                        offset: frame_size * (done + i),
                        width: meta.width,
                        height: meta.height,
                    })?;
                }
                let net_start = Instant::now();
                net.forward()?;
                profiler.add_interval("net", net_start, Instant::now());
                net.read_outputs(&mut output[done * bytes_per_frame..(done + batch) * bytes_per_frame])?;
                done += batch;
            }

            // Return the pool buffer before the result leaves the stage.
            drop(entry.frames);

            profiler.add_interval("task", work_start, Instant::now());
            self.output.push(SaveWork::Item(SaveItem {
                work_item_index: entry.work_item_index,
                output,
            }))?;
        }

        debug!(gpu = self.gpu, "evaluate worker finished");
        Ok(profiler)
    }
}
