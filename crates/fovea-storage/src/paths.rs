//! Logical path layout for datasets and job output.

pub fn dataset_descriptor_path(dataset: &str) -> String {
    format!("datasets/{dataset}/descriptor.json")
}

pub fn dataset_item_data_path(dataset: &str, item: &str) -> String {
    format!("datasets/{dataset}/items/{item}.pkt")
}

pub fn dataset_item_metadata_path(dataset: &str, item: &str) -> String {
    format!("datasets/{dataset}/items/{item}.meta.json")
}

pub fn job_item_output_path(job: &str, video: &str, start_frame: i64, end_frame: i64) -> String {
    format!("jobs/{job}/outputs/{video}_{start_frame}-{end_frame}.feat")
}

pub fn job_descriptor_path(job: &str) -> String {
    format!("jobs/{job}/descriptor.json")
}

pub fn job_profiler_path(job: &str, rank: u32) -> String {
    format!("jobs/{job}/profile_{rank}.bin")
}
