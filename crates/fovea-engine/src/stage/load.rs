//! Load stage: fetch the encoded byte range covering a work item.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use fovea_core::error::{EngineError, Result};
use fovea_core::plan::keyframe_span;
use fovea_core::profile::Profiler;
use fovea_storage::paths::dataset_item_data_path;
use fovea_storage::{BackoffPolicy, RandomRead, StorageBackend, with_backoff};

use crate::entries::{DecodeItem, DecodeWork, LoadWork};
use crate::job::JobContext;
use crate::queue::WorkQueue;

pub struct LoadStage {
    pub ctx: Arc<JobContext>,
    pub storage: Arc<dyn StorageBackend>,
    pub input: WorkQueue<LoadWork>,
    pub output: WorkQueue<DecodeWork>,
    pub backoff: BackoffPolicy,
    pub base: Instant,
    pub worker: usize,
}

impl LoadStage {
    pub fn run(self) -> Result<Profiler> {
        let setup_start = Instant::now();
        let mut profiler = Profiler::new(self.base);
        // One open handle, reused across consecutive items of the same
        // video to amortise the open cost.
        let mut open_video: Option<(String, Box<dyn RandomRead>, u64)> = None;
        profiler.add_interval("setup", setup_start, Instant::now());

        loop {
            let idle_start = Instant::now();
            let index = match self.input.pop()? {
                LoadWork::Item(index) => index,
                LoadWork::Stop => break,
            };
            profiler.add_interval("idle", idle_start, Instant::now());
            let work_start = Instant::now();

            let item = *self.ctx.plan.get(index)?;
            let name = &self.ctx.items[item.video_index];
            let meta = &self.ctx.metadata[item.video_index];

            if open_video.as_ref().map(|(n, _, _)| n.as_str()) != Some(name.as_str()) {
                let mut file = self
                    .storage
                    .open_read(&dataset_item_data_path(&self.ctx.dataset, name))?;
                let size = file.size()?;
                open_video = Some((name.clone(), file, size));
            }
            let (_, file, file_size) = open_video.as_mut().expect("handle just opened");

            // Virtual terminal keyframe so the tail interval has an end.
            let mut positions = meta.keyframe_positions.clone();
            let mut offsets = meta.keyframe_byte_offsets.clone();
            positions.push(meta.frames);
            offsets.push(*file_size as i64);

            let (start_kf, end_kf) = keyframe_span(&positions, item.start_frame, item.end_frame)?;
            let start_offset = offsets[start_kf] as u64;
            let data_size = (offsets[end_kf] - offsets[start_kf]) as usize;

            let mut encoded = vec![0u8; data_size];
            let io_start = Instant::now();
            let (read, _outcome) =
                with_backoff(&self.backoff, || file.read_at(start_offset, &mut encoded))?;
            profiler.add_interval("io", io_start, Instant::now());
            if read != data_size {
                return Err(EngineError::Metadata(format!(
                    "short read on {name}: {read} of {data_size} bytes at offset {start_offset}"
                )));
            }

            profiler.add_interval("task", work_start, Instant::now());
            self.output.push(DecodeWork::Item(DecodeItem {
                work_item_index: index,
                start_keyframe: positions[start_kf],
                end_keyframe: positions[end_kf],
                encoded,
            }))?;
        }

        debug!(worker = self.worker, "load worker finished");
        Ok(profiler)
    }
}
