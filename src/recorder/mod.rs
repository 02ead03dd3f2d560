//! Recording core
//!
//! This module implements the multi-channel recording architecture:
//! - SensorChannel per source, converting events into fixed-rate bytes
//! - StartBarrier gating every channel on a common start instant
//! - RecordingSession orchestrating the session lifecycle
//! - the shutdown sequence driving flush, close and process join

pub mod barrier;
pub mod channel;
pub mod rate;
pub mod session;
mod shutdown;
pub mod state;

pub use barrier::StartBarrier;
pub use channel::SensorChannel;
pub use rate::{Emission, RateConverter};
pub use session::{RecordingSession, SessionEvent};
pub use state::{
    RecorderStatus, RecordingConfig, RecordingSummary, SessionMetadata, SessionState,
    StreamSummary, WakeupPolicy,
};
