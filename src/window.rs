//! Time-based flush scheduling for the batching mode.
//!
//! There is a single deadline for the whole engine, not one per group,
//! so every group's batches close on the same event-time cadence.

use chrono::{DateTime, Duration, Utc};

use crate::errors::{AggError, Result};

/// What the scheduler decided for an incoming point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
    /// No period configured or deadline not reached.
    Hold,
    /// First point seen; the deadline was just set.
    Armed(DateTime<Utc>),
    /// Deadline reached; flush every group. Carries the deadline that
    /// fired. The scheduler has already advanced past it.
    FlushAll(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushScheduler {
    period: Option<Duration>,
    next_flush: Option<DateTime<Utc>>,
}

impl FlushScheduler {
    /// A zero or negative period disables time-based flushing.
    pub fn new(period: Duration) -> Self {
        let period = (period > Duration::zero()).then_some(period);
        Self {
            period,
            next_flush: None,
        }
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    pub fn next_flush(&self) -> Option<DateTime<Utc>> {
        self.next_flush
    }

    /// Restore a previously observed deadline.
    pub fn resume(&mut self, next_flush: Option<DateTime<Utc>>) {
        self.next_flush = next_flush;
    }

    /// Check a point's time against the deadline.
    ///
    /// The deadline only ever moves by one period per firing, even if
    /// `time` is several periods past it; the next point will fire
    /// again. If the next deadline isn't representable the point is
    /// rejected and the scheduler is left as it was.
    pub fn observe(&mut self, time: DateTime<Utc>) -> Result<FlushDecision> {
        let Some(period) = self.period else {
            return Ok(FlushDecision::Hold);
        };
        match self.next_flush {
            None => {
                let deadline = advance(time, period)?;
                self.next_flush = Some(deadline);
                Ok(FlushDecision::Armed(deadline))
            }
            Some(deadline) if time >= deadline => {
                self.next_flush = Some(advance(deadline, period)?);
                Ok(FlushDecision::FlushAll(deadline))
            }
            Some(_) => Ok(FlushDecision::Hold),
        }
    }
}

fn advance(from: DateTime<Utc>, period: Duration) -> Result<DateTime<Utc>> {
    from.checked_add_signed(period)
        .ok_or_else(|| AggError::Point(format!("flush deadline {from} + {period} is out of range")))
}
