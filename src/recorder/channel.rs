//! Per-sensor recording channel
//!
//! Converts one source's event stream into a fixed-rate byte stream. All
//! channel state is owned here and only ever touched from that source's
//! own callback path, so the mutex is uncontended in normal operation.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tokio::sync::broadcast;

use crate::mux::StreamSink;
use crate::recorder::barrier::StartBarrier;
use crate::recorder::rate::RateConverter;
use crate::recorder::session::SessionEvent;
use crate::sensors::{SensorControl, SensorDescriptor, SensorEvent, SourceId};

struct ChannelState {
    last_timestamp_ns: Option<i64>,
    converter: RateConverter,
    sample_count: u64,
    /// Frame scratch buffer, cleared and refilled per event
    scratch: Vec<u8>,
    sink: Option<Box<dyn StreamSink>>,
    closed: bool,
    failed: bool,
}

/// One recording channel, bound to one sensor source
///
/// The host wires its hardware callback for the source to [`push`], from
/// whatever thread that callback runs on.
///
/// [`push`]: SensorChannel::push
pub struct SensorChannel {
    descriptor: SensorDescriptor,
    channel_count: usize,
    barrier: Arc<StartBarrier>,
    control: Arc<dyn SensorControl>,
    events: broadcast::Sender<SessionEvent>,
    state: Mutex<ChannelState>,
    flush_done: Mutex<bool>,
    flush_cond: Condvar,
}

impl SensorChannel {
    pub(crate) fn new(
        descriptor: SensorDescriptor,
        channel_count: usize,
        converter: RateConverter,
        sink: Box<dyn StreamSink>,
        barrier: Arc<StartBarrier>,
        control: Arc<dyn SensorControl>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            descriptor,
            channel_count,
            barrier,
            control,
            events,
            state: Mutex::new(ChannelState {
                last_timestamp_ns: None,
                converter,
                sample_count: 0,
                scratch: Vec::with_capacity(4 * channel_count),
                sink: Some(sink),
                closed: false,
                failed: false,
            }),
            flush_done: Mutex::new(false),
            flush_cond: Condvar::new(),
        }
    }

    pub fn descriptor(&self) -> &SensorDescriptor {
        &self.descriptor
    }

    pub fn source_id(&self) -> SourceId {
        self.descriptor.id
    }

    /// Fixed-rate samples written to the sink so far.
    pub fn samples_written(&self) -> u64 {
        self.state.lock().sample_count
    }

    /// Whether the channel still accepts events.
    pub fn is_active(&self) -> bool {
        let state = self.state.lock();
        !state.closed && !state.failed
    }

    /// Whether the channel detached after a sink write failure.
    pub fn is_failed(&self) -> bool {
        self.state.lock().failed
    }

    /// Entry point for the host's hardware callback. Callable from any
    /// thread; blocks until the session's start barrier has resolved.
    pub fn push(&self, event: &SensorEvent) {
        debug_assert_eq!(event.source, self.descriptor.id);

        self.barrier.report_first(self.descriptor.id, event.timestamp_ns);
        let Some(start_instant_ns) = self.barrier.await_resolution() else {
            // released during shutdown; the session never started
            return;
        };

        let mut state = self.state.lock();
        if state.closed || state.failed {
            return;
        }

        if *self.flush_done.lock() {
            // The hardware queue is drained; closing the sink tells the
            // muxer this stream is finished.
            close_sink(&self.descriptor, &mut state);
            return;
        }

        if event.timestamp_ns < start_instant_ns {
            return; // pre-barrier noise
        }

        if event.values.len() != self.channel_count {
            tracing::warn!(
                "{}: dropping event with {} values, expected {}",
                self.descriptor.name,
                event.values.len(),
                self.channel_count
            );
            return;
        }

        if state.last_timestamp_ns.is_none() {
            tracing::debug!("{} started at {}", self.descriptor.name, event.timestamp_ns);
        }

        let delta_us = state
            .last_timestamp_ns
            .map(|last| (event.timestamp_ns - last) / 1_000);
        state.last_timestamp_ns = Some(event.timestamp_ns);

        let emission = state.converter.advance(delta_us);
        if state.converter.backlog_excessive(emission.backlog_us) {
            tracing::warn!(
                "sample delay too large {:.4} {}",
                emission.backlog_us as f64 / 1e6,
                self.descriptor.name
            );
        }

        let ChannelState { scratch, sink, sample_count, failed, .. } = &mut *state;
        scratch.clear();
        for v in &event.values {
            scratch.extend_from_slice(&v.to_ne_bytes());
        }

        let Some(out) = sink.as_mut() else {
            return;
        };
        for _ in 0..emission.count {
            if let Err(err) = out.write_frame(scratch) {
                tracing::error!(
                    "{}: write failed after {} samples: {}",
                    self.descriptor.name,
                    sample_count,
                    err
                );
                *failed = true;
                break;
            }
            *sample_count += 1;
        }

        if state.failed {
            state.sink = None;
            drop(state);
            // stop the hardware from calling back into a dead channel
            self.control.unregister(self.descriptor.id);
            let _ = self
                .events
                .send(SessionEvent::ChannelFailed(self.descriptor.id));
        }
    }

    /// Flush-completion signal from the hardware source.
    pub fn flush_completed(&self) {
        *self.flush_done.lock() = true;
        self.flush_cond.notify_all();
    }

    /// Drive the channel to closure during shutdown.
    ///
    /// With `wait_for_flush` set this blocks until the flush-completion
    /// signal has arrived, so buffered hardware samples still in flight are
    /// not truncated. The close itself is idempotent: a channel whose final
    /// `push` already closed the sink is left alone.
    pub(crate) fn finish(&self, wait_for_flush: bool) {
        if wait_for_flush && self.is_active() {
            let mut done = self.flush_done.lock();
            while !*done {
                self.flush_cond.wait(&mut done);
            }
        }

        let mut state = self.state.lock();
        if !state.closed && !state.failed {
            close_sink(&self.descriptor, &mut state);
        }
    }
}

fn close_sink(descriptor: &SensorDescriptor, state: &mut ChannelState) {
    if state.closed {
        return;
    }
    state.closed = true;
    if let Some(mut sink) = state.sink.take() {
        match sink.close() {
            Ok(()) => tracing::info!(
                "{}: stream closed, {} samples written",
                descriptor.name,
                state.sample_count
            ),
            Err(err) => tracing::warn!("{}: closing stream failed: {}", descriptor.name, err),
        }
    }
}
