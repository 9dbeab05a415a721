//! Job orchestration: plan, spawn, distribute, drain.
//!
//! Every rank runs the same local pipeline; rank 0 additionally hands out
//! work-item indices. Shutdown pushes one sentinel per worker and joins
//! stage by stage in pipeline order, so no live buffer can outlive its
//! consumer. A failing stage raises the abort flag, the full sentinel/join
//! sequence still runs, and the first real error is returned.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{error, info};

use fovea_core::config::EngineConfig;
use fovea_core::error::{EngineError, Result};
use fovea_core::plan::{JobDescriptor, WorkPlan};
use fovea_core::profile::{self, Profiler};
use fovea_core::types::{ItemMetadata, nv12_frame_size};
use fovea_cuda::{GpuDevice, GpuRuntime};
use fovea_net::NetDescriptor;
use fovea_storage::backend::write_all;
use fovea_storage::paths::{job_descriptor_path, job_profiler_path};
use fovea_storage::{BackoffPolicy, StorageBackend, dataset};

use crate::abort::AbortFlag;
use crate::dist::{Cluster, NO_MORE_WORK};
use crate::entries::{DecodeWork, EvalWork, LoadWork, SaveWork};
use crate::pool::FramePool;
use crate::queue::WorkQueue;
use crate::stage::{DecodeStage, EvalStage, LoadStage, SaveStage};

const DIST_POLL: Duration = Duration::from_millis(10);
const DIST_IDLE: Duration = Duration::from_micros(500);

/// Shared read-only job state handed to every stage worker.
pub struct JobContext {
    pub config: EngineConfig,
    pub dataset: String,
    pub job: String,
    pub items: Vec<String>,
    pub metadata: Vec<ItemMetadata>,
    pub plan: WorkPlan,
}

#[derive(Debug, Clone)]
pub struct JobRequest {
    pub dataset: String,
    pub job: String,
    pub net: NetDescriptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSummary {
    pub work_items: usize,
    pub total_frames: i64,
}

type WorkerHandle = JoinHandle<Result<Profiler>>;

fn unix_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos().min(i64::MAX as u128) as i64)
        .unwrap_or(0)
}

fn spawn_worker(
    name: String,
    abort: AbortFlag,
    f: impl FnOnce() -> Result<Profiler> + Send + 'static,
) -> Result<WorkerHandle> {
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let result = f();
            if let Err(err) = &result {
                error!(worker = %name, error = %err, "stage worker failed");
                abort.set();
            }
            result
        })
        .map_err(|e| EngineError::Pipeline(format!("spawn {e}")))
}

/// Keep the first error, but let a concrete failure displace `Aborted`
/// (which only says that some other stage failed first).
fn record(first: &mut Option<EngineError>, err: EngineError) {
    match first {
        None => *first = Some(err),
        Some(EngineError::Aborted) if !matches!(err, EngineError::Aborted) => *first = Some(err),
        _ => {}
    }
}

fn join_workers(
    handles: Vec<WorkerHandle>,
    abort: &AbortFlag,
    first: &mut Option<EngineError>,
) -> Vec<Profiler> {
    let mut profilers = Vec::new();
    for handle in handles {
        match handle.join() {
            Ok(Ok(profiler)) => profilers.push(profiler),
            Ok(Err(err)) => {
                abort.set();
                record(first, err);
            }
            Err(_) => {
                abort.set();
                record(first, EngineError::Pipeline("stage worker panicked".into()));
            }
        }
    }
    profilers
}

fn local_depth(
    load: &WorkQueue<LoadWork>,
    decode: &WorkQueue<DecodeWork>,
    evals: &[WorkQueue<EvalWork>],
) -> usize {
    load.len() + decode.len() + evals.iter().map(|q| q.len()).sum::<usize>()
}

fn distribute(
    ctx: &JobContext,
    cluster: &mut dyn Cluster,
    abort: &AbortFlag,
    load: &WorkQueue<LoadWork>,
    decode: &WorkQueue<DecodeWork>,
    evals: &[WorkQueue<EvalWork>],
) -> Result<()> {
    let threshold = ctx.config.queue_threshold();
    if cluster.rank() == 0 {
        let total = ctx.plan.len();
        let mut next = 0usize;
        while next < total {
            if abort.is_set() {
                return Err(EngineError::Aborted);
            }
            // Local bias: keep this node's own pipeline fed first.
            if local_depth(load, decode, evals) < threshold {
                load.push(LoadWork::Item(next))?;
                next += 1;
                if (total - next) % 10 == 0 {
                    info!(remaining = total - next, "work items left");
                }
                continue;
            }
            if cluster.world() > 1 {
                if let Some(worker) = cluster.poll_request(DIST_POLL)? {
                    cluster.respond(worker, next as i32)?;
                    next += 1;
                    if (total - next) % 10 == 0 {
                        info!(remaining = total - next, "work items left");
                    }
                }
            } else {
                thread::sleep(DIST_IDLE);
            }
        }
        // Hand every remote worker its end-of-work marker exactly once.
        let mut done = 1;
        while done < cluster.world() {
            if abort.is_set() {
                return Err(EngineError::Aborted);
            }
            if let Some(worker) = cluster.poll_request(DIST_POLL)? {
                cluster.respond(worker, NO_MORE_WORK)?;
                done += 1;
            }
        }
    } else {
        loop {
            if abort.is_set() {
                return Err(EngineError::Aborted);
            }
            if local_depth(load, decode, evals) < threshold {
                match cluster.request_work()? {
                    NO_MORE_WORK => break,
                    index if index >= 0 => load.push(LoadWork::Item(index as usize))?,
                    other => {
                        return Err(EngineError::Comm(format!("invalid work index {other}")));
                    }
                }
            } else {
                thread::sleep(DIST_IDLE);
            }
        }
    }
    Ok(())
}

/// Run one job on this rank, returning once every stage has drained.
pub fn run_job(
    config: EngineConfig,
    storage: Arc<dyn StorageBackend>,
    cluster: &mut dyn Cluster,
    request: JobRequest,
) -> Result<JobSummary> {
    config.validate()?;
    request.net.validate()?;
    let rank = cluster.rank();
    let base = Instant::now();
    let start_ns = unix_ns();

    let descriptor = dataset::load_descriptor(storage.as_ref(), &request.dataset)?;
    if descriptor.items.is_empty() {
        return Err(EngineError::Metadata(format!(
            "dataset {} has no items",
            request.dataset
        )));
    }
    let mut metadata = Vec::with_capacity(descriptor.items.len());
    for item in &descriptor.items {
        metadata.push(dataset::load_item_metadata(
            storage.as_ref(),
            &request.dataset,
            item,
        )?);
    }
    // The decoder and the frame pool are configured once from the first
    // item, so a mixed dataset must be rejected before anything runs.
    let first = metadata[0].clone();
    for (item, meta) in descriptor.items.iter().zip(&metadata) {
        if meta.width != first.width || meta.height != first.height || meta.codec != first.codec {
            return Err(EngineError::Metadata(format!(
                "heterogeneous dataset: item {item} is {}x{} {:?}, expected {}x{} {:?}",
                meta.width, meta.height, meta.codec, first.width, first.height, first.codec
            )));
        }
    }

    let plan = WorkPlan::build(&metadata, config.work_item_size)?;
    let summary = JobSummary {
        work_items: plan.len(),
        total_frames: plan.total_frames(),
    };
    if rank == 0 {
        info!(
            work_items = summary.work_items,
            total_frames = summary.total_frames,
            "work plan built"
        );
    }
    let job_descriptor = JobDescriptor {
        dataset: request.dataset.clone(),
        intervals: plan.intervals(&descriptor.items),
    };

    let ctx = Arc::new(JobContext {
        config,
        dataset: request.dataset.clone(),
        job: request.job.clone(),
        items: descriptor.items,
        metadata,
        plan,
    });

    let runtime = GpuRuntime::detect(config.device_mode)?;
    if let GpuRuntime::Cuda(driver) = &runtime {
        let count = driver.device_count()? as usize;
        if count < config.gpus {
            return Err(EngineError::Config(format!(
                "{} GPUs requested, {count} visible",
                config.gpus
            )));
        }
    }

    // One work item of decoded NV12 frames per buffer, LOAD_BUFFERS
    // buffers per GPU for the life of the job.
    let frame_bytes =
        nv12_frame_size(first.width, first.height) * config.work_item_size;
    let mut job_devices = Vec::with_capacity(config.gpus);
    let mut decode_devices = Vec::with_capacity(config.gpus);
    let mut pools = Vec::with_capacity(config.gpus);
    for gpu in 0..config.gpus {
        let device = Arc::new(GpuDevice::open(&runtime, gpu as u32)?);
        device.bind_thread()?;
        let mut buffers = Vec::with_capacity(config.tasks_in_queue_per_gpu);
        for _ in 0..config.tasks_in_queue_per_gpu {
            buffers.push(device.alloc_frames(frame_bytes)?);
        }
        pools.push(FramePool::new(buffers));
        // The decode stage holds its own context retention so it can be
        // released right after the decoders join.
        decode_devices.push(Arc::new(GpuDevice::open(&runtime, gpu as u32)?));
        job_devices.push(device);
    }

    let load_q: WorkQueue<LoadWork> = WorkQueue::new();
    let decode_q: WorkQueue<DecodeWork> = WorkQueue::new();
    let eval_qs: Vec<WorkQueue<EvalWork>> = (0..config.gpus).map(|_| WorkQueue::new()).collect();
    let save_q: WorkQueue<SaveWork> = WorkQueue::new();
    let abort = AbortFlag::new();

    let mut load_handles = Vec::with_capacity(config.load_workers);
    for worker in 0..config.load_workers {
        let stage = LoadStage {
            ctx: ctx.clone(),
            storage: storage.clone(),
            input: load_q.clone(),
            output: decode_q.clone(),
            backoff: BackoffPolicy::default(),
            base,
            worker,
        };
        load_handles.push(spawn_worker(
            format!("fovea-load-{worker}"),
            abort.clone(),
            move || stage.run(),
        )?);
    }

    let mut decode_handles = Vec::with_capacity(config.gpus);
    for gpu in 0..config.gpus {
        let stage = DecodeStage {
            ctx: ctx.clone(),
            gpu,
            device: decode_devices[gpu].clone(),
            input: decode_q.clone(),
            pool: pools[gpu].clone(),
            output: eval_qs[gpu].clone(),
            abort: abort.clone(),
            base,
        };
        decode_handles.push(spawn_worker(
            format!("fovea-decode-{gpu}"),
            abort.clone(),
            move || stage.run(),
        )?);
    }

    let mut eval_handles = Vec::with_capacity(config.gpus);
    for gpu in 0..config.gpus {
        let stage = EvalStage {
            ctx: ctx.clone(),
            gpu,
            device: job_devices[gpu].clone(),
            descriptor: request.net.clone(),
            input: eval_qs[gpu].clone(),
            output: save_q.clone(),
            base,
        };
        eval_handles.push(spawn_worker(
            format!("fovea-eval-{gpu}"),
            abort.clone(),
            move || stage.run(),
        )?);
    }

    let mut save_handles = Vec::with_capacity(config.save_workers);
    for worker in 0..config.save_workers {
        let stage = SaveStage {
            ctx: ctx.clone(),
            storage: storage.clone(),
            input: save_q.clone(),
            backoff: BackoffPolicy::default(),
            base,
            worker,
        };
        save_handles.push(spawn_worker(
            format!("fovea-save-{worker}"),
            abort.clone(),
            move || stage.run(),
        )?);
    }

    let mut first_err: Option<EngineError> = None;
    if let Err(err) = distribute(&ctx, cluster, &abort, &load_q, &decode_q, &eval_qs) {
        abort.set();
        record(&mut first_err, err);
    }

    // Drain in strict pipeline order: one sentinel per worker, join, then
    // the next stage. Sentinels are only pushed after the upstream joined,
    // so a worker's first sentinel means its queue holds no more work.
    for _ in 0..config.load_workers {
        if let Err(err) = load_q.push(LoadWork::Stop) {
            record(&mut first_err, err);
        }
    }
    let load_profilers = join_workers(load_handles, &abort, &mut first_err);

    for _ in 0..config.gpus {
        if let Err(err) = decode_q.push(DecodeWork::Stop) {
            record(&mut first_err, err);
        }
    }
    let decode_profilers = join_workers(decode_handles, &abort, &mut first_err);
    for device in &decode_devices {
        if let Err(err) = device.release_context() {
            record(&mut first_err, err);
        }
    }

    for queue in &eval_qs {
        if let Err(err) = queue.push(EvalWork::Stop) {
            record(&mut first_err, err);
        }
    }
    let eval_profilers = join_workers(eval_handles, &abort, &mut first_err);

    for _ in 0..config.save_workers {
        if let Err(err) = save_q.push(SaveWork::Stop) {
            record(&mut first_err, err);
        }
    }
    let save_profilers = join_workers(save_handles, &abort, &mut first_err);

    if first_err.is_none() {
        for (gpu, pool) in pools.iter().enumerate() {
            if pool.available() != pool.capacity() {
                record(
                    &mut first_err,
                    EngineError::InvariantViolation(format!(
                        "gpu {gpu}: {} of {} pool buffers returned",
                        pool.available(),
                        pool.capacity()
                    )),
                );
            }
        }
    }

    if first_err.is_none() {
        if rank == 0 {
            let bytes = serde_json::to_vec_pretty(&job_descriptor)
                .map_err(|e| EngineError::Metadata(format!("job descriptor: {e}")))?;
            write_all(storage.as_ref(), &job_descriptor_path(&request.job), &bytes)?;
        }
        let dump = profile::encode_dump(start_ns, unix_ns(), &[
            &load_profilers,
            &decode_profilers,
            &eval_profilers,
            &save_profilers,
        ])?;
        write_all(
            storage.as_ref(),
            &job_profiler_path(&request.job, rank),
            &dump,
        )?;
        info!(rank, work_items = summary.work_items, "job complete");
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(summary),
    }
}
