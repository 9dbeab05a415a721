#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod abort;
pub mod dist;
pub mod entries;
pub mod job;
pub mod pool;
pub mod queue;
pub mod stage;

pub use abort::AbortFlag;
pub use dist::{Cluster, SingleNode, TcpCluster};
pub use job::{JobRequest, JobSummary, run_job};
pub use queue::WorkQueue;
