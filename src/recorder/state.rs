//! Session state management
//!
//! Defines the recording state machine, session configuration and the
//! summary returned when a session completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sensors::SourceId;

/// Current state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No channels exist
    Idle,
    /// Channels registered, output gated on the start barrier
    Starting,
    /// Barrier resolved, channels emitting
    Recording,
    /// Shutdown sequence running
    Stopping,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Coarse status for external observers (status surfaces)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderStatus {
    /// Session started but not all sources have produced an event yet
    Preparing,
    /// All sources live, samples flowing
    Recording,
    /// No active session
    Stopped,
}

/// What to do when no configured source is wakeup-capable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WakeupPolicy {
    /// Refuse to start; without a wakeup source the recording silently
    /// stalls whenever the device suspends
    Require,
    /// Log and start anyway
    Warn,
}

impl Default for WakeupPolicy {
    fn default() -> Self {
        Self::Require
    }
}

/// Configuration for starting a recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingConfig {
    /// Target output rate for every stream, in Hz
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f64,

    /// Wakeup-capability requirement
    #[serde(default)]
    pub wakeup_policy: WakeupPolicy,

    /// Session metadata handed to the muxer
    #[serde(default)]
    pub metadata: SessionMetadata,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            rate_hz: default_rate_hz(),
            wakeup_policy: WakeupPolicy::default(),
            metadata: SessionMetadata::default(),
        }
    }
}

fn default_rate_hz() -> f64 {
    50.0
}

/// Opaque session tags for the muxer
///
/// The core stamps these onto the output container and never interprets
/// them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Recorder name and version
    pub recorder_version: String,

    /// Stable installation identifier
    pub device_id: String,

    /// Platform description
    pub platform: String,

    /// Build fingerprint of the host software
    pub fingerprint: String,
}

impl Default for SessionMetadata {
    fn default() -> Self {
        Self {
            recorder_version: format!("sensor-recorder {}", env!("CARGO_PKG_VERSION")),
            device_id: Uuid::new_v4().simple().to_string(),
            platform: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            fingerprint: String::new(),
        }
    }
}

impl SessionMetadata {
    /// Assemble the tag list for the muxer, stamping the session start.
    pub fn tags(&self, started_at: DateTime<Utc>) -> Vec<(String, String)> {
        vec![
            ("recorder".into(), self.recorder_version.clone()),
            ("device_id".into(), self.device_id.clone()),
            ("platform".into(), self.platform.clone()),
            ("fingerprint".into(), self.fingerprint.clone()),
            ("beginning".into(), format_session_timestamp(started_at)),
        ]
    }
}

/// ISO-8601 UTC at minute precision, e.g. `2018-08-07T16:04Z`
pub fn format_session_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%MZ").to_string()
}

/// Per-stream outcome of a completed session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSummary {
    pub source: SourceId,
    pub name: String,
    /// Fixed-rate samples written to the sink
    pub samples: u64,
    /// Whether the channel detached after a sink write failure
    pub failed: bool,
}

/// Result of a completed recording session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    /// Wall-clock session start
    pub started_at: Option<DateTime<Utc>>,

    /// Common start instant all streams were aligned to, if the start
    /// barrier ever resolved
    pub start_instant_ns: Option<i64>,

    pub streams: Vec<StreamSummary>,
}
