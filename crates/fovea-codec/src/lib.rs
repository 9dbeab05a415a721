#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod decoder;
pub mod nvdec;
pub mod software;

pub use decoder::{VideoDecoder, open_decoder};
pub use software::SoftwareDecoder;
