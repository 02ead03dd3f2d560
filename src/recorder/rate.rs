//! Fixed-rate drift correction
//!
//! Sensors deliver at approximately, but never exactly, the nominal rate.
//! The converter turns inter-arrival jitter into an exact fixed-period
//! output by duplicating or dropping samples, never by interpolating.

/// Result of feeding one arrival into the converter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emission {
    /// How many times the current sample buffer is written out
    pub count: u32,

    /// Accumulated un-emitted source time before this arrival was drained,
    /// in microseconds
    pub backlog_us: i64,
}

/// Per-stream drift accumulator
///
/// Tracks how much source time has not yet been covered by an emission.
/// Every emission accounts for exactly one nominal period, so the emitted
/// stream advances by exactly one period per sample regardless of how the
/// source jitters.
#[derive(Debug, Clone)]
pub struct RateConverter {
    nominal_period_us: i64,
    accumulated_error_us: i64,
}

impl RateConverter {
    pub fn new(rate_hz: f64) -> Self {
        Self {
            nominal_period_us: (1e6 / rate_hz) as i64,
            accumulated_error_us: 0,
        }
    }

    pub fn nominal_period_us(&self) -> i64 {
        self.nominal_period_us
    }

    pub fn accumulated_error_us(&self) -> i64 {
        self.accumulated_error_us
    }

    /// Decide how many emissions `delta_us` of elapsed source time is worth.
    ///
    /// `None` marks the first sample of the stream: it is emitted once and
    /// resets the accumulator. Afterwards the accumulator grows by the
    /// inter-arrival delta and drains one nominal period per emission. An
    /// arrival faster than nominal leaves the accumulator short of a full
    /// period and emits nothing; a slower arrival drains as many whole
    /// periods as the gap spans, repeating the newest sample.
    pub fn advance(&mut self, delta_us: Option<i64>) -> Emission {
        let Some(delta_us) = delta_us else {
            self.accumulated_error_us = 0;
            return Emission { count: 1, backlog_us: 0 };
        };

        self.accumulated_error_us += delta_us;
        let backlog_us = self.accumulated_error_us;

        let mut count = 0;
        while self.accumulated_error_us >= self.nominal_period_us {
            self.accumulated_error_us -= self.nominal_period_us;
            count += 1;
        }

        Emission { count, backlog_us }
    }

    /// Whether `backlog_us` says the source is persistently off its nominal
    /// cadence. Informational only; the emission loop already corrected it.
    pub fn backlog_excessive(&self, backlog_us: i64) -> bool {
        backlog_us.unsigned_abs() as f64 > 1.1 * self.nominal_period_us as f64
    }
}
