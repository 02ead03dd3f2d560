//! Muxer process boundary
//!
//! The external muxer consumes one raw byte stream per sensor and owns the
//! output container. The core only needs a write handle per stream and a
//! way to join the process on shutdown.

use std::io;

use serde::{Deserialize, Serialize};

use crate::error::RecorderError;

#[cfg(unix)]
pub mod ffmpeg;
#[cfg(unix)]
pub use ffmpeg::{FfmpegMuxer, FfmpegMuxerFactory};

/// One byte-writable stream handle backed by the muxer process
///
/// Closing the handle is the end-of-stream signal; there is no sentinel
/// value in the byte stream itself.
pub trait StreamSink: Send {
    /// Write one complete frame of `4 * channel_count` bytes.
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Signal end-of-stream. Called at most once.
    fn close(&mut self) -> io::Result<()>;
}

/// Fixed-rate stream layout handed to the muxer at spawn time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSpec {
    /// Descriptive stream name, recorded as a per-stream tag
    pub name: String,

    /// Samples per frame
    pub channels: usize,

    /// Fixed output rate in Hz
    pub rate_hz: f64,
}

/// Handle to a live muxer process
pub trait MuxerProcess: Send {
    /// Hand out the write end for stream `index`. Each sink is taken once.
    fn take_sink(&mut self, index: usize) -> Result<Box<dyn StreamSink>, RecorderError>;

    /// Block until the process exits. No timeout: once every sink is
    /// closed the muxer is expected to terminate promptly.
    fn wait(&mut self) -> io::Result<()>;
}

/// Spawns one muxer process per recording session
///
/// `tags` are opaque key/value session metadata; the core never interprets
/// them.
pub trait MuxerFactory: Send + Sync {
    fn spawn(
        &self,
        streams: &[StreamSpec],
        tags: &[(String, String)],
    ) -> Result<Box<dyn MuxerProcess>, RecorderError>;
}
