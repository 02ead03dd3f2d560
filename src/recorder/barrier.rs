//! Start-instant synchronization
//!
//! Every channel holds its output until all configured sources have
//! produced at least one event. The start instant is the maximum of the
//! per-source first timestamps: the latest-starting source defines the
//! earliest instant at which every source is live, so no stream begins
//! with a gap.

use std::collections::HashSet;

use parking_lot::{Condvar, Mutex};

use crate::sensors::SourceId;

#[derive(Debug)]
enum BarrierPhase {
    /// Waiting for first events; tracks the sources still missing and the
    /// running maximum of the reported timestamps.
    Collecting {
        pending: HashSet<SourceId>,
        max_timestamp_ns: i64,
    },
    /// All sources reported; holds the agreed start instant.
    Resolved(i64),
    /// Shut down before resolution; waiters proceed without a start instant.
    Released,
}

type ResolveHook = Box<dyn FnOnce(i64) + Send>;

/// One-shot barrier over the session's sources
pub struct StartBarrier {
    phase: Mutex<BarrierPhase>,
    cond: Condvar,
    on_resolve: Mutex<Option<ResolveHook>>,
}

impl StartBarrier {
    pub fn new(sources: impl IntoIterator<Item = SourceId>) -> Self {
        let pending: HashSet<SourceId> = sources.into_iter().collect();
        Self {
            phase: Mutex::new(BarrierPhase::Collecting {
                pending,
                max_timestamp_ns: i64::MIN,
            }),
            cond: Condvar::new(),
            on_resolve: Mutex::new(None),
        }
    }

    /// Install a hook that runs exactly once, on the thread whose report
    /// resolves the barrier.
    pub fn set_resolve_hook(&self, hook: impl FnOnce(i64) + Send + 'static) {
        *self.on_resolve.lock() = Some(Box::new(hook));
    }

    /// Record a source's first event timestamp.
    ///
    /// Repeated reports for the same source, and any report after the
    /// barrier has resolved or been released, are ignored.
    pub fn report_first(&self, source: SourceId, timestamp_ns: i64) {
        let resolved_at = {
            let mut phase = self.phase.lock();
            let BarrierPhase::Collecting { pending, max_timestamp_ns } = &mut *phase else {
                return;
            };
            if !pending.remove(&source) {
                return;
            }
            *max_timestamp_ns = (*max_timestamp_ns).max(timestamp_ns);
            if !pending.is_empty() {
                return;
            }
            let instant = *max_timestamp_ns;
            *phase = BarrierPhase::Resolved(instant);
            self.cond.notify_all();
            instant
        };

        // hook runs outside the phase lock; it may touch session state
        if let Some(hook) = self.on_resolve.lock().take() {
            hook(resolved_at);
        }
    }

    /// Block until every source has reported, returning the start instant,
    /// or `None` if the barrier was force-released.
    pub fn await_resolution(&self) -> Option<i64> {
        let mut phase = self.phase.lock();
        loop {
            match &*phase {
                BarrierPhase::Resolved(instant) => return Some(*instant),
                BarrierPhase::Released => return None,
                BarrierPhase::Collecting { .. } => self.cond.wait(&mut phase),
            }
        }
    }

    /// Release all waiters without a start instant. A no-op once resolved.
    pub fn force_release(&self) {
        let mut phase = self.phase.lock();
        if matches!(*phase, BarrierPhase::Collecting { .. }) {
            *phase = BarrierPhase::Released;
            self.cond.notify_all();
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.phase.lock(), BarrierPhase::Resolved(_))
    }

    /// The agreed start instant, if the barrier has resolved.
    pub fn start_instant_ns(&self) -> Option<i64> {
        match *self.phase.lock() {
            BarrierPhase::Resolved(instant) => Some(instant),
            _ => None,
        }
    }
}
