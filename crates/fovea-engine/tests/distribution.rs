//! Two-rank cluster run over TCP: every work item processed exactly once,
//! the worker receives its end-of-work marker, and both ranks drain.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use fovea_core::config::{DeviceMode, EngineConfig};
use fovea_core::plan::JobDescriptor;
use fovea_engine::{JobRequest, TcpCluster, run_job};
use fovea_net::{NetBackend, NetDescriptor};
use fovea_storage::backend::read_all;
use fovea_storage::paths::{job_descriptor_path, job_item_output_path, job_profiler_path};
use fovea_storage::{PosixStorage, dataset};

fn unique_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "fovea_dist_{label}_{}_{}",
        std::process::id(),
        nanos
    ));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn config() -> EngineConfig {
    EngineConfig {
        load_workers: 1,
        save_workers: 1,
        gpus: 1,
        tasks_in_queue_per_gpu: 2, // threshold T = 2
        work_item_size: 96,
        batch_size: 16,
        streams: 2,
        device_mode: DeviceMode::Cpu,
    }
}

fn request() -> JobRequest {
    JobRequest {
        dataset: "clips".into(),
        job: "feats".into(),
        net: NetDescriptor {
            name: "testnet".into(),
            backend: NetBackend::Software,
            input_dim: 8,
            outputs_per_frame: 5,
            mean_pixel: [104.0, 117.0, 123.0],
        },
    }
}

#[test]
fn two_ranks_process_ten_work_items_exactly_once() {
    let root = unique_temp_dir("two_ranks");
    let posix = PosixStorage::new(root.clone());
    // 960 frames at 96 per item: ten work items.
    let frames: Vec<Vec<u8>> = (0..960i64)
        .map(|i| dataset::synthetic_frame(16, 12, i))
        .collect();
    dataset::write_raw_item(&posix, "clips", "clip", 16, 12, 24, &frames).unwrap();

    let mut master = TcpCluster::master("127.0.0.1:0", 2).unwrap();
    let addr = master.local_addr().unwrap().to_string();

    let worker = {
        let root = root.clone();
        std::thread::spawn(move || {
            let mut cluster = TcpCluster::worker(&addr, 1, 2).unwrap();
            run_job(
                config(),
                Arc::new(PosixStorage::new(root)),
                &mut cluster,
                request(),
            )
        })
    };

    let master_summary = run_job(
        config(),
        Arc::new(PosixStorage::new(root)),
        &mut master,
        request(),
    )
    .expect("master run");
    let worker_summary = worker.join().expect("worker thread").expect("worker run");

    assert_eq!(master_summary.work_items, 10);
    assert_eq!(worker_summary.work_items, 10);

    // Every interval saved exactly once, with the right size.
    for index in 0..10i64 {
        let (start, end) = (index * 96, (index + 1) * 96);
        let bytes = read_all(&posix, &job_item_output_path("feats", "clip", start, end))
            .unwrap_or_else(|_| panic!("missing output for ({start}, {end})"));
        assert_eq!(bytes.len(), 96 * 5 * 4);
    }

    // The master wrote the descriptor; both ranks wrote profiler dumps,
    // which also proves the worker saw its end-of-work marker and exited
    // distribution cleanly.
    let descriptor: JobDescriptor =
        serde_json::from_slice(&read_all(&posix, &job_descriptor_path("feats")).unwrap()).unwrap();
    assert_eq!(descriptor.intervals["clip"].len(), 10);
    assert!(read_all(&posix, &job_profiler_path("feats", 0)).is_ok());
    assert!(read_all(&posix, &job_profiler_path("feats", 1)).is_ok());
}
