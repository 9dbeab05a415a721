#![doc = include_str!("../README.md")]

pub mod device;
pub mod driver;

pub use device::{FrameBuffer, GpuDevice, GpuRuntime};
pub use driver::CudaDriver;
