//! Sensor descriptors and event types
//!
//! Platform-agnostic description of the hardware sources that feed a
//! recording session. The sensor subsystem itself lives outside this crate;
//! events cross the boundary through `SensorChannel::push` and control
//! requests go back out through the [`SensorControl`] trait.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RecorderError;

/// Identifies one sensor source within a session.
///
/// Also the muxer stream index: stream order equals descriptor order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kinds of hardware sensors a session can record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
    MagneticField,
    RotationVector,
    RelativeHumidity,
    Pressure,
    Light,
    AmbientTemperature,
    /// A sensor the recorder has no channel layout for
    Other(String),
}

impl SensorKind {
    /// Samples per frame for this sensor kind, or `None` when unknown.
    ///
    /// Rotation vectors carry the four quaternion components plus the
    /// estimated heading accuracy.
    pub fn channel_count(&self) -> Option<usize> {
        match self {
            SensorKind::Accelerometer | SensorKind::Gyroscope | SensorKind::MagneticField => {
                Some(3)
            }
            SensorKind::RotationVector => Some(5),
            SensorKind::RelativeHumidity
            | SensorKind::Pressure
            | SensorKind::Light
            | SensorKind::AmbientTemperature => Some(1),
            SensorKind::Other(_) => None,
        }
    }
}

/// Immutable description of one sensor source
///
/// Built from the external sensor registry when a session starts and not
/// modified afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorDescriptor {
    /// Source id, unique within the session
    pub id: SourceId,

    /// Sensor kind, determines the channel layout
    pub kind: SensorKind,

    /// Descriptive sensor name, used as the per-stream name tag
    pub name: String,

    /// Whether the source keeps delivering while the device is suspended
    pub wakeup_capable: bool,

    /// Hardware FIFO depth, in events; 0 when the source has no FIFO
    pub fifo_max_event_count: u32,

    /// Explicit channel-count override for layout variants
    channel_count: Option<usize>,
}

impl SensorDescriptor {
    /// Create a descriptor with no wakeup capability and no FIFO.
    pub fn new(id: SourceId, kind: SensorKind, name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            wakeup_capable: false,
            fifo_max_event_count: 0,
            channel_count: None,
        }
    }

    pub fn with_wakeup(mut self, wakeup_capable: bool) -> Self {
        self.wakeup_capable = wakeup_capable;
        self
    }

    pub fn with_fifo_depth(mut self, events: u32) -> Self {
        self.fifo_max_event_count = events;
        self
    }

    /// Override the channel count derived from the kind.
    ///
    /// Needed for rotation-vector variants that report four values instead
    /// of five.
    pub fn with_channel_count(mut self, channels: usize) -> Self {
        self.channel_count = Some(channels);
        self
    }

    /// Samples per frame for this source.
    pub fn channel_count(&self) -> Result<usize, RecorderError> {
        self.channel_count
            .or_else(|| self.kind.channel_count())
            .ok_or_else(|| RecorderError::UnsupportedSensor(self.name.clone()))
    }

    /// Frame length in bytes: one native f32 per channel.
    pub fn frame_len(&self) -> Result<usize, RecorderError> {
        Ok(4 * self.channel_count()?)
    }

    /// Reporting latency that lets a wakeup source batch events in its
    /// hardware FIFO, in microseconds. Half the FIFO is left as headroom so
    /// no events are dropped between deliveries.
    pub fn batching_latency_us(&self, rate_hz: f64) -> i64 {
        if !self.wakeup_capable || self.fifo_max_event_count == 0 {
            return 0;
        }
        let period_us = (1e6 / rate_hz) as i64;
        i64::from(self.fifo_max_event_count / 2) * period_us
    }
}

/// One hardware sensor event
///
/// Transient: produced by the host's sensor callback, consumed by
/// `SensorChannel::push`, never retained.
#[derive(Debug, Clone)]
pub struct SensorEvent {
    /// Source that produced the event
    pub source: SourceId,

    /// Monotonic event timestamp, source-specific epoch, in nanoseconds
    pub timestamp_ns: i64,

    /// Sample values, one per channel
    pub values: Vec<f32>,
}

/// Host-side control surface for the sensor subsystem
///
/// The recording core never talks to hardware directly. It asks the host to
/// flush buffered events on shutdown and to stop delivering for a source
/// whose sink has failed.
pub trait SensorControl: Send + Sync {
    /// Request that buffered events for `source` are delivered now, followed
    /// by a flush-completed signal on the source's channel.
    fn flush(&self, source: SourceId);

    /// Stop delivering events for `source`.
    fn unregister(&self, source: SourceId);
}
