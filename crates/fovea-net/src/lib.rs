#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod descriptor;
pub mod network;
pub mod software;
pub mod tensorrt;

pub use descriptor::{NetBackend, NetDescriptor};
pub use network::{FrameView, Network, open_network};
pub use software::SoftwareNet;
