//! Save stage: append each work item's feature buffer to its output file.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use fovea_core::error::Result;
use fovea_core::profile::Profiler;
use fovea_storage::paths::job_item_output_path;
use fovea_storage::{AppendFile, BackoffPolicy, StorageBackend, with_backoff};

use crate::entries::SaveWork;
use crate::job::JobContext;
use crate::queue::WorkQueue;

pub struct SaveStage {
    pub ctx: Arc<JobContext>,
    pub storage: Arc<dyn StorageBackend>,
    pub input: WorkQueue<SaveWork>,
    pub backoff: BackoffPolicy,
    pub base: Instant,
    pub worker: usize,
}

impl SaveStage {
    pub fn run(self) -> Result<Profiler> {
        let setup_start = Instant::now();
        let mut profiler = Profiler::new(self.base);
        profiler.add_interval("setup", setup_start, Instant::now());

        loop {
            let idle_start = Instant::now();
            let entry = match self.input.pop()? {
                SaveWork::Item(entry) => entry,
                SaveWork::Stop => break,
            };
            profiler.add_interval("idle", idle_start, Instant::now());
            let work_start = Instant::now();

            let item = *self.ctx.plan.get(entry.work_item_index)?;
            let name = &self.ctx.items[item.video_index];
            let path =
                job_item_output_path(&self.ctx.job, name, item.start_frame, item.end_frame);

            let mut file = self.storage.open_write(&path)?;
            let io_start = Instant::now();
            with_backoff(&self.backoff, || file.append(&entry.output))?;
            file.commit()?;
            profiler.add_interval("io", io_start, Instant::now());

            drop(entry.output);
            profiler.add_interval("task", work_start, Instant::now());
        }

        debug!(worker = self.worker, "save worker finished");
        Ok(profiler)
    }
}
