use thiserror::Error;

/// Contract violations raised by the detection engine.
///
/// Data-quality problems (sensor dropout, flat signals, empty sessions) never
/// surface here; they degrade to empty or zero results instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DetectError {
    #[error("{signal} has {actual} samples but timestamps has {expected}")]
    LengthMismatch {
        signal: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("timestamps must be finite and strictly increasing (violation at index {index})")]
    NonMonotonicTimestamps { index: usize },

    #[error("invalid detector config `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, DetectError>;
