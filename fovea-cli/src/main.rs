//! fovea CLI entrypoint.
//!
//! ```bash
//! fovea ingest --data-root /data --dataset clips --item a --frames 200 --width 640 --height 360
//! fovea plan --data-root /data --dataset clips --work-item-size 96
//! fovea run --data-root /data --dataset clips --job feats --net alexnet.json
//! fovea probe --json
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use fovea_core::config::{DeviceMode, EngineConfig};
use fovea_core::logging::init_tracing;
use fovea_core::plan::WorkPlan;
use fovea_core::types::nv12_frame_size;
use fovea_cuda::CudaDriver;
use fovea_engine::{Cluster, JobRequest, SingleNode, TcpCluster, run_job};
use fovea_net::NetDescriptor;
use fovea_storage::{PosixStorage, dataset};

#[derive(Parser, Debug)]
#[command(
    name = "fovea",
    version,
    about = "Batch engine that turns video frames into CNN feature vectors",
    arg_required_else_help = true,
    after_help = "Examples:\n  fovea probe --json\n  fovea ingest --data-root /data --dataset clips --item a --frames 200 --width 640 --height 360\n  fovea run --data-root /data --dataset clips --job feats --net net.json --device cpu\n  fovea run --data-root /data --dataset clips --job feats --net net.json --rank 1 --world 2 --cluster-addr master:9477"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a feature-extraction job over a dataset.
    Run(RunArgs),
    /// Print the work items a job would be broken into.
    Plan(PlanArgs),
    /// Build a raw-codec dataset item from raw NV12 frames.
    Ingest(IngestArgs),
    /// Probe CUDA driver availability and device count.
    Probe(ProbeArgs),
}

#[derive(Args, Debug, Clone)]
struct SharedArgs {
    /// Root directory holding datasets and job output.
    #[arg(long = "data-root", env = "FOVEA_DATA_ROOT")]
    data_root: PathBuf,

    /// Dataset name.
    #[arg(long, env = "FOVEA_DATASET")]
    dataset: String,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    shared: SharedArgs,

    /// Job name; output lands under jobs/<job>/.
    #[arg(long)]
    job: String,

    /// Path to the JSON net descriptor.
    #[arg(long)]
    net: PathBuf,

    /// Load worker threads per node.
    #[arg(long = "load-workers", default_value_t = 2)]
    load_workers: usize,

    /// Save worker threads per node.
    #[arg(long = "save-workers", default_value_t = 2)]
    save_workers: usize,

    /// GPUs per node (decode/evaluate worker pairs).
    #[arg(long, default_value_t = 1)]
    gpus: usize,

    /// Pre-allocated frame buffers (and queued tasks) per GPU.
    #[arg(long = "queue-depth", default_value_t = 4)]
    queue_depth: usize,

    /// Frames per work item.
    #[arg(long = "work-item-size", default_value_t = 96)]
    work_item_size: usize,

    /// Frames per network forward pass.
    #[arg(long = "batch-size", default_value_t = 32)]
    batch_size: usize,

    /// Preprocessing streams per evaluator.
    #[arg(long, default_value_t = 4)]
    streams: usize,

    /// Device mode: auto, cpu, or cuda.
    #[arg(long, default_value = "auto")]
    device: String,

    /// Rank of this process; rank 0 is the master.
    #[arg(long, env = "FOVEA_RANK", default_value_t = 0)]
    rank: u32,

    /// Number of ranks in the job.
    #[arg(long, env = "FOVEA_WORLD", default_value_t = 1)]
    world: u32,

    /// Master address: bound by rank 0, dialled by workers.
    #[arg(long = "cluster-addr", env = "FOVEA_CLUSTER_ADDR", default_value = "127.0.0.1:9477")]
    cluster_addr: String,
}

#[derive(Args, Debug)]
struct PlanArgs {
    #[command(flatten)]
    shared: SharedArgs,

    /// Frames per work item.
    #[arg(long = "work-item-size", default_value_t = 96)]
    work_item_size: usize,

    /// Emit the plan as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct IngestArgs {
    #[command(flatten)]
    shared: SharedArgs,

    /// Item name inside the dataset.
    #[arg(long)]
    item: String,

    /// Frame width in pixels.
    #[arg(long)]
    width: u32,

    /// Frame height in pixels.
    #[arg(long)]
    height: u32,

    /// Keyframe every this many frames.
    #[arg(long = "keyframe-interval", default_value_t = 24)]
    keyframe_interval: usize,

    /// Raw NV12 input file (concatenated frames). Omit for synthetic frames.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Synthetic frame count when no input file is given.
    #[arg(long, default_value_t = 0)]
    frames: usize,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Plan(args) => cmd_plan(args),
        Commands::Ingest(args) => cmd_ingest(args),
        Commands::Probe(args) => cmd_probe(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "command failed");
            ExitCode::FAILURE
        }
    }
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let device_mode: DeviceMode = args.device.parse()?;
    let config = EngineConfig {
        load_workers: args.load_workers,
        save_workers: args.save_workers,
        gpus: args.gpus,
        tasks_in_queue_per_gpu: args.queue_depth,
        work_item_size: args.work_item_size,
        batch_size: args.batch_size,
        streams: args.streams,
        device_mode,
    };
    let net_bytes = std::fs::read(&args.net)
        .with_context(|| format!("read net descriptor {}", args.net.display()))?;
    let net = NetDescriptor::from_json(&net_bytes)?;

    let storage = Arc::new(PosixStorage::new(&args.shared.data_root));
    let mut cluster: Box<dyn Cluster> = if args.world <= 1 {
        Box::new(SingleNode)
    } else if args.rank == 0 {
        Box::new(TcpCluster::master(&args.cluster_addr, args.world)?)
    } else {
        Box::new(TcpCluster::worker(&args.cluster_addr, args.rank, args.world)?)
    };

    let request = JobRequest {
        dataset: args.shared.dataset,
        job: args.job,
        net,
    };
    let summary = run_job(config, storage, cluster.as_mut(), request)?;
    info!(
        rank = args.rank,
        work_items = summary.work_items,
        total_frames = summary.total_frames,
        "job finished"
    );
    Ok(())
}

fn cmd_plan(args: PlanArgs) -> Result<()> {
    let storage = PosixStorage::new(&args.shared.data_root);
    let descriptor = dataset::load_descriptor(&storage, &args.shared.dataset)?;
    let mut metadata = Vec::with_capacity(descriptor.items.len());
    for item in &descriptor.items {
        metadata.push(dataset::load_item_metadata(
            &storage,
            &args.shared.dataset,
            item,
        )?);
    }
    let plan = WorkPlan::build(&metadata, args.work_item_size)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(plan.items())?);
    } else {
        for (index, item) in plan.items().iter().enumerate() {
            println!(
                "{index:6}  {}  [{}, {})",
                descriptor.items[item.video_index], item.start_frame, item.end_frame
            );
        }
        println!(
            "{} work items over {} videos, {} frames",
            plan.len(),
            descriptor.items.len(),
            plan.total_frames()
        );
    }
    Ok(())
}

fn cmd_ingest(args: IngestArgs) -> Result<()> {
    let storage = PosixStorage::new(&args.shared.data_root);
    if args.width == 0 || args.height == 0 {
        bail!("frame dimensions must be positive, got {}x{}", args.width, args.height);
    }
    let frame_size = nv12_frame_size(args.width, args.height);

    let frames: Vec<Vec<u8>> = match &args.input {
        Some(path) => {
            let bytes =
                std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
            if bytes.is_empty() || bytes.len() % frame_size != 0 {
                bail!(
                    "{} is {} bytes, not a positive multiple of the {frame_size}-byte frame size",
                    path.display(),
                    bytes.len()
                );
            }
            bytes.chunks(frame_size).map(<[u8]>::to_vec).collect()
        }
        None => {
            if args.frames == 0 {
                bail!("either --input or a positive --frames is required");
            }
            (0..args.frames as i64)
                .map(|index| dataset::synthetic_frame(args.width, args.height, index))
                .collect()
        }
    };

    let meta = dataset::write_raw_item(
        &storage,
        &args.shared.dataset,
        &args.item,
        args.width,
        args.height,
        args.keyframe_interval,
        &frames,
    )?;
    info!(
        dataset = args.shared.dataset,
        item = args.item,
        frames = meta.frames,
        keyframes = meta.keyframe_positions.len(),
        "item ingested"
    );
    Ok(())
}

fn cmd_probe(args: ProbeArgs) -> Result<()> {
    let (available, devices, error) = match CudaDriver::load() {
        Ok(driver) => match driver.device_count() {
            Ok(count) => (true, count, None),
            Err(err) => (false, 0, Some(err.to_string())),
        },
        Err(err) => (false, 0, Some(err.to_string())),
    };

    if args.json {
        println!(
            "{}",
            serde_json::json!({
                "cuda": available,
                "devices": devices,
                "error": error,
            })
        );
    } else if available {
        println!("CUDA driver loaded, {devices} device(s) visible");
    } else {
        println!(
            "CUDA unavailable ({}); jobs will run on the software backends",
            error.unwrap_or_else(|| "unknown".into())
        );
    }
    Ok(())
}
