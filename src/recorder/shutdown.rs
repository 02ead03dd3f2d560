//! Orderly session shutdown
//!
//! Flush, close, join: ask the hardware to drain its buffers, drive every
//! channel to close its stream, then join the muxer process. The join is
//! deliberately unbounded; once all sinks are closed the muxer is expected
//! to terminate promptly.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::mux::MuxerProcess;
use crate::recorder::barrier::StartBarrier;
use crate::recorder::channel::SensorChannel;
use crate::recorder::state::{RecordingSummary, StreamSummary};
use crate::sensors::SensorControl;

pub(crate) struct ShutdownCoordinator {
    channels: Vec<Arc<SensorChannel>>,
    barrier: Arc<StartBarrier>,
    muxer: Box<dyn MuxerProcess>,
    control: Arc<dyn SensorControl>,
    started_at: Option<DateTime<Utc>>,
}

impl ShutdownCoordinator {
    pub fn new(
        channels: Vec<Arc<SensorChannel>>,
        barrier: Arc<StartBarrier>,
        muxer: Box<dyn MuxerProcess>,
        control: Arc<dyn SensorControl>,
        started_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self { channels, barrier, muxer, control, started_at }
    }

    pub fn run(mut self) -> RecordingSummary {
        let start_instant_ns = self.barrier.start_instant_ns();
        if start_instant_ns.is_none() {
            tracing::warn!("stopping before all sources reported; releasing blocked channels");
            self.barrier.force_release();
        }

        for channel in &self.channels {
            if channel.is_active() {
                self.control.flush(channel.source_id());
            }
        }

        // A session that never started recording cannot expect flush
        // signals from the hardware; close the streams directly.
        let wait_for_flush = start_instant_ns.is_some();
        for channel in &self.channels {
            channel.finish(wait_for_flush);
        }

        match self.muxer.wait() {
            Ok(()) => tracing::info!("muxer process finished"),
            Err(err) => {
                tracing::error!("muxer join interrupted: {}; forcing session idle", err);
            }
        }

        RecordingSummary {
            started_at: self.started_at,
            start_instant_ns,
            streams: self
                .channels
                .iter()
                .map(|c| StreamSummary {
                    source: c.source_id(),
                    name: c.descriptor().name.clone(),
                    samples: c.samples_written(),
                    failed: c.is_failed(),
                })
                .collect(),
        }
    }
}
