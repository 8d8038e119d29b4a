use crate::sequence::IndexValue;

use thiserror::Error;

/// Conditions that abort a whole run before any frame is processed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProcessorError {
    #[error("driving sequence is empty")]
    EmptySequence,

    #[error("sequence length mismatch: {what} has {found} entries, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("index value mismatch: {what} has no entry at index value {index_value}")]
    IndexMismatch {
        what: &'static str,
        index_value: IndexValue,
    },

    #[error("missing configuration: {0}")]
    MissingConfiguration(&'static str),

    #[error("invalid geometry: {0}")]
    Geometry(String),
}

/// Per-frame failures. The current frame is skipped and the run continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("mask selects no voxels")]
    EmptyMask,

    #[error("no {what} at this index value")]
    MissingInput { what: &'static str },

    #[error("{what} grid does not match the frame grid")]
    GeometryMismatch { what: &'static str },

    #[error("transform is not invertible")]
    SingularTransform,

    #[error("region of interest does not intersect the frame")]
    OutsideRoi,

    #[error("registration did not complete after {attempts} polls")]
    TimedOut { attempts: u32 },

    #[error("registration ended with status {status}")]
    ServiceFailed { status: String },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Errors reported by the external registration service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("unknown handle")]
    UnknownHandle,

    #[error("service result unavailable: {0}")]
    NoResult(String),

    #[error("service error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum StatisticsError {
    #[error("unknown metric {0:?}")]
    UnknownKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
