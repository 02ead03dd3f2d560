//! Error types and handling
//!
//! Common error types used across the recorder core.

use thiserror::Error;

use crate::sensors::SourceId;

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no sensor sources configured")]
    NoSources,

    #[error("duplicate source id: {0}")]
    DuplicateSource(SourceId),

    #[error("no wakeup-capable sensor available")]
    NoWakeupSource,

    #[error("unknown channel layout for sensor: {0}")]
    UnsupportedSensor(String),

    #[error("muxer error: {0}")]
    Muxer(String),
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;
