//! Fixed-rate multi-sensor stream recorder.
//!
//! Converts irregular, independently-timestamped sensor event streams into
//! byte-exact fixed-rate f32 sample streams and feeds them to an external
//! muxer process. The host wires its hardware callbacks to
//! [`SensorChannel::push`] and drives the lifecycle through
//! [`RecordingSession`].

pub mod error;
pub mod mux;
pub mod recorder;
pub mod sensors;

pub use error::{RecorderError, RecorderResult};
pub use recorder::{
    RecorderStatus, RecordingConfig, RecordingSession, RecordingSummary, SensorChannel,
    SessionEvent, SessionMetadata, SessionState, StreamSummary, WakeupPolicy,
};
pub use sensors::{SensorControl, SensorDescriptor, SensorEvent, SensorKind, SourceId};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing for hosts that do not bring their own subscriber.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sensor_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
