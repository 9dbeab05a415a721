//! Typed error hierarchy for the engine.
//!
//! Uses `thiserror` for library-grade errors. Application code should wrap
//! these in `anyhow::Result` at call sites.
//!
//! Each variant maps to a stable integer code via [`EngineError::error_code`]
//! for structured telemetry without string parsing.

/// All errors originating from the fovea engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // CUDA / device layer
    #[error("CUDA driver error: {0}")]
    Cuda(String),

    // Codecs
    #[error("decode error: {0}")]
    Decode(String),

    // Inference
    #[error("inference error: {0}")]
    Inference(String),

    // Storage
    #[error("storage error: {0}")]
    Storage(String),

    #[error("dataset metadata error: {0}")]
    Metadata(String),

    #[error("malformed packet stream at byte {offset}")]
    MalformedPacket { offset: u64 },

    // Pipeline
    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("pipeline channel closed unexpectedly")]
    ChannelClosed,

    #[error("job aborted by another stage")]
    Aborted,

    // Distribution
    #[error("cluster communication error: {0}")]
    Comm(String),

    // Contracts
    #[error("buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl EngineError {
    /// Stable integer error code for structured telemetry.
    ///
    /// Codes are grouped by category:
    /// - 1xx: CUDA/driver
    /// - 2xx: codecs and inference
    /// - 3xx: storage and dataset
    /// - 4xx: pipeline
    /// - 5xx: distribution
    /// - 6xx: contracts and invariants
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Cuda(_) => 100,
            Self::Decode(_) => 200,
            Self::Inference(_) => 201,
            Self::Storage(_) => 300,
            Self::Metadata(_) => 301,
            Self::MalformedPacket { .. } => 302,
            Self::Pipeline(_) => 400,
            Self::ChannelClosed => 401,
            Self::Aborted => 402,
            Self::Comm(_) => 500,
            Self::BufferTooSmall { .. } => 600,
            Self::Config(_) => 601,
            Self::InvariantViolation(_) => 602,
        }
    }
}

/// Convenience alias used throughout the engine crates.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_grouped_by_category() {
        assert_eq!(EngineError::Cuda("x".into()).error_code(), 100);
        assert_eq!(EngineError::ChannelClosed.error_code(), 401);
        assert_eq!(
            EngineError::BufferTooSmall { need: 2, have: 1 }.error_code(),
            600
        );
    }

    #[test]
    fn display_includes_context() {
        let err = EngineError::MalformedPacket { offset: 12 };
        assert!(err.to_string().contains("12"));
    }
}
