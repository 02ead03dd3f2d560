//! Recording session orchestration
//!
//! Owns the channels, the start barrier and the muxer handle; enforces the
//! single-active-session state machine and drives startup and shutdown.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::error::RecorderError;
use crate::mux::{MuxerFactory, MuxerProcess, StreamSpec};
use crate::recorder::barrier::StartBarrier;
use crate::recorder::channel::SensorChannel;
use crate::recorder::rate::RateConverter;
use crate::recorder::shutdown::ShutdownCoordinator;
use crate::recorder::state::{
    RecorderStatus, RecordingConfig, RecordingSummary, SessionState, WakeupPolicy,
};
use crate::sensors::{SensorControl, SensorDescriptor, SourceId};

/// Events emitted during a recording session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// All sources reported; channels are emitting
    Started { start_instant_ns: i64 },
    /// Session returned to idle
    Stopped,
    /// A channel detached after a sink write failure
    ChannelFailed(SourceId),
}

/// Orchestrates one recording session at a time
///
/// The session constructs a channel, a sink and a barrier slot per sensor
/// on [`start`], hands the channels to the host for callback wiring, and
/// tears everything down on [`stop`]. At most one session is active; a
/// `start` while active is a logged no-op.
///
/// [`start`]: RecordingSession::start
/// [`stop`]: RecordingSession::stop
pub struct RecordingSession {
    config: RecordingConfig,
    control: Arc<dyn SensorControl>,
    muxers: Arc<dyn MuxerFactory>,

    state: Arc<RwLock<SessionState>>,
    channels: Vec<Arc<SensorChannel>>,
    barrier: Option<Arc<StartBarrier>>,
    muxer: Option<Box<dyn MuxerProcess>>,
    started_at: Option<DateTime<Utc>>,

    event_tx: broadcast::Sender<SessionEvent>,
}

impl RecordingSession {
    pub fn new(
        config: RecordingConfig,
        control: Arc<dyn SensorControl>,
        muxers: Arc<dyn MuxerFactory>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            config,
            control,
            muxers,
            state: Arc::new(RwLock::new(SessionState::Idle)),
            channels: Vec::new(),
            barrier: None,
            muxer: None,
            started_at: None,
            event_tx,
        }
    }

    /// Get the current session state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Coarse status for external observers.
    pub fn status(&self) -> RecorderStatus {
        match self.state() {
            SessionState::Idle | SessionState::Stopping => RecorderStatus::Stopped,
            SessionState::Starting => RecorderStatus::Preparing,
            SessionState::Recording => RecorderStatus::Recording,
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Channels of the active session, in descriptor order.
    pub fn channels(&self) -> &[Arc<SensorChannel>] {
        &self.channels
    }

    pub fn channel(&self, source: SourceId) -> Option<Arc<SensorChannel>> {
        self.channels
            .iter()
            .find(|c| c.source_id() == source)
            .cloned()
    }

    /// Start a recording session over `descriptors`.
    ///
    /// Spawns the muxer, creates one gated channel per descriptor and moves
    /// to `Starting`; the transition to `Recording` happens on its own once
    /// every source has produced an event. Calling `start` while a session
    /// is active is a no-op. Configuration failures abort the start and
    /// leave the session idle.
    pub fn start(&mut self, descriptors: &[SensorDescriptor]) -> Result<(), RecorderError> {
        {
            let mut state = self.state.write();
            if *state != SessionState::Idle {
                tracing::warn!("start requested while session is {:?}; ignoring", *state);
                return Ok(());
            }
            *state = SessionState::Starting;
        }

        match self.start_channels(descriptors) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.channels.clear();
                self.barrier = None;
                self.muxer = None;
                self.started_at = None;
                *self.state.write() = SessionState::Idle;
                Err(err)
            }
        }
    }

    fn start_channels(&mut self, descriptors: &[SensorDescriptor]) -> Result<(), RecorderError> {
        if descriptors.is_empty() {
            return Err(RecorderError::NoSources);
        }
        let mut ids = HashSet::new();
        for d in descriptors {
            if !ids.insert(d.id) {
                return Err(RecorderError::DuplicateSource(d.id));
            }
        }

        if !descriptors.iter().any(|d| d.wakeup_capable) {
            match self.config.wakeup_policy {
                WakeupPolicy::Require => return Err(RecorderError::NoWakeupSource),
                WakeupPolicy::Warn => tracing::warn!(
                    "no wakeup-capable sensor; recording may stall while the device sleeps"
                ),
            }
        }

        let mut streams = Vec::with_capacity(descriptors.len());
        for d in descriptors {
            streams.push(StreamSpec {
                name: d.name.clone(),
                channels: d.channel_count()?,
                rate_hz: self.config.rate_hz,
            });
        }

        let started_at = Utc::now();
        let tags = self.config.metadata.tags(started_at);
        let mut muxer = self.muxers.spawn(&streams, &tags)?;

        let barrier = Arc::new(StartBarrier::new(descriptors.iter().map(|d| d.id)));
        {
            let state = Arc::clone(&self.state);
            let events = self.event_tx.clone();
            barrier.set_resolve_hook(move |start_instant_ns| {
                {
                    let mut state = state.write();
                    if *state == SessionState::Starting {
                        *state = SessionState::Recording;
                    }
                }
                tracing::info!("all sources reported; recording from {}", start_instant_ns);
                let _ = events.send(SessionEvent::Started { start_instant_ns });
            });
        }

        let mut channels = Vec::with_capacity(descriptors.len());
        for (index, (descriptor, spec)) in descriptors.iter().zip(&streams).enumerate() {
            let sink = muxer.take_sink(index)?;
            tracing::info!(
                "recording {}{}",
                if descriptor.wakeup_capable { "wakeup " } else { "" },
                descriptor.name
            );
            channels.push(Arc::new(SensorChannel::new(
                descriptor.clone(),
                spec.channels,
                RateConverter::new(self.config.rate_hz),
                sink,
                Arc::clone(&barrier),
                Arc::clone(&self.control),
                self.event_tx.clone(),
            )));
        }

        self.channels = channels;
        self.barrier = Some(barrier);
        self.muxer = Some(muxer);
        self.started_at = Some(started_at);
        Ok(())
    }

    /// Stop the active session.
    ///
    /// Runs the flush → close → join shutdown sequence and returns the
    /// session summary. A `stop` with no active session is a no-op and
    /// returns `None`. The session always ends idle, even when the muxer
    /// join fails.
    pub fn stop(&mut self) -> Option<RecordingSummary> {
        {
            let mut state = self.state.write();
            match *state {
                SessionState::Idle => {
                    tracing::debug!("stop requested while idle; ignoring");
                    return None;
                }
                SessionState::Stopping => return None,
                _ => *state = SessionState::Stopping,
            }
        }

        tracing::info!("stopping recording");

        let channels = std::mem::take(&mut self.channels);
        let barrier = self.barrier.take();
        let muxer = self.muxer.take();
        let started_at = self.started_at.take();

        let summary = match (barrier, muxer) {
            (Some(barrier), Some(muxer)) => ShutdownCoordinator::new(
                channels,
                barrier,
                muxer,
                Arc::clone(&self.control),
                started_at,
            )
            .run(),
            _ => RecordingSummary::default(),
        };

        *self.state.write() = SessionState::Idle;
        let _ = self.event_tx.send(SessionEvent::Stopped);
        tracing::info!("recording stopped, {} streams", summary.streams.len());
        Some(summary)
    }
}
