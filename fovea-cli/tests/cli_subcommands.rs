use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir =
        std::env::temp_dir().join(format!("fovea_cli_{label}_{}_{}", std::process::id(), nanos));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn fovea() -> Command {
    Command::new(env!("CARGO_BIN_EXE_fovea"))
}

#[test]
fn help_lists_subcommands() {
    let output = fovea().arg("help").output().expect("run fovea help");
    assert!(
        output.status.success(),
        "fovea help failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    for subcommand in ["run", "plan", "ingest", "probe"] {
        assert!(stdout.contains(subcommand), "missing {subcommand} in help");
    }
}

#[test]
fn probe_json_reports_cuda_state() {
    let output = fovea()
        .args(["probe", "--json"])
        .output()
        .expect("run fovea probe");
    assert!(output.status.success());

    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("probe output should be JSON");
    assert!(value.get("cuda").is_some());
    assert!(value.get("devices").is_some());
}

#[test]
fn ingest_plan_run_round_trip() {
    let root = unique_temp_dir("roundtrip");
    let root_arg = root.to_string_lossy().to_string();

    let ingest = fovea()
        .args([
            "ingest",
            "--data-root",
            root_arg.as_str(),
            "--dataset",
            "clips",
            "--item",
            "clip",
            "--frames",
            "40",
            "--width",
            "16",
            "--height",
            "12",
            "--keyframe-interval",
            "8",
        ])
        .output()
        .expect("run fovea ingest");
    assert!(
        ingest.status.success(),
        "ingest failed: {}",
        String::from_utf8_lossy(&ingest.stderr)
    );

    let plan = fovea()
        .args([
            "plan",
            "--data-root",
            root_arg.as_str(),
            "--dataset",
            "clips",
            "--work-item-size",
            "16",
        ])
        .output()
        .expect("run fovea plan");
    assert!(plan.status.success());
    let stdout = String::from_utf8_lossy(&plan.stdout);
    assert!(
        stdout.contains("3 work items"),
        "unexpected plan output: {stdout}"
    );

    let net_path = root.join("net.json");
    fs::write(
        &net_path,
        serde_json::json!({
            "name": "testnet",
            "backend": "software",
            "input_dim": 8,
            "outputs_per_frame": 4,
            "mean_pixel": [104.0, 117.0, 123.0],
        })
        .to_string(),
    )
    .expect("write net descriptor");

    let run = fovea()
        .args([
            "run",
            "--data-root",
            root_arg.as_str(),
            "--dataset",
            "clips",
            "--job",
            "feats",
            "--net",
            net_path.to_string_lossy().as_ref(),
            "--work-item-size",
            "16",
            "--device",
            "cpu",
        ])
        .output()
        .expect("run fovea run");
    assert!(
        run.status.success(),
        "run failed: {}",
        String::from_utf8_lossy(&run.stderr)
    );

    // 40 frames at 16 per item: (0,16), (16,32), (32,40).
    for (start, end) in [(0, 16), (16, 32), (32, 40)] {
        let output_path = root
            .join("jobs/feats/outputs")
            .join(format!("clip_{start}-{end}.feat"));
        let bytes = fs::read(&output_path)
            .unwrap_or_else(|_| panic!("missing output {}", output_path.display()));
        assert_eq!(bytes.len(), (end - start) * 4 * 4);
    }
    assert!(root.join("jobs/feats/descriptor.json").exists());
}

#[test]
fn plan_json_is_machine_readable() {
    let root = unique_temp_dir("plan_json");
    let root_arg = root.to_string_lossy().to_string();

    let ingest = fovea()
        .args([
            "ingest",
            "--data-root",
            root_arg.as_str(),
            "--dataset",
            "clips",
            "--item",
            "clip",
            "--frames",
            "10",
            "--width",
            "8",
            "--height",
            "8",
        ])
        .output()
        .expect("run fovea ingest");
    assert!(ingest.status.success());

    let plan = fovea()
        .args([
            "plan",
            "--data-root",
            root_arg.as_str(),
            "--dataset",
            "clips",
            "--work-item-size",
            "4",
            "--json",
        ])
        .output()
        .expect("run fovea plan");
    assert!(plan.status.success());

    let value: serde_json::Value =
        serde_json::from_slice(&plan.stdout).expect("plan --json should be JSON");
    assert_eq!(value.as_array().map(|a| a.len()), Some(3));
}

#[test]
fn run_fails_cleanly_on_missing_dataset() {
    let root = unique_temp_dir("missing");
    let net_path = root.join("net.json");
    fs::write(
        &net_path,
        serde_json::json!({
            "name": "testnet",
            "backend": "software",
            "input_dim": 8,
            "outputs_per_frame": 4,
            "mean_pixel": [0.0, 0.0, 0.0],
        })
        .to_string(),
    )
    .expect("write net descriptor");

    let run = fovea()
        .args([
            "run",
            "--data-root",
            root.to_string_lossy().as_ref(),
            "--dataset",
            "nope",
            "--job",
            "feats",
            "--net",
            net_path.to_string_lossy().as_ref(),
        ])
        .output()
        .expect("run fovea run");
    assert!(!run.status.success());
}
