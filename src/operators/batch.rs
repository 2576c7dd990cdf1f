//! Windowed batching.
//!
//! Points are buffered per group and released as a begin / points /
//! end envelope when either the group's buffer is full or the
//! engine-wide flush deadline passes. A deadline flush releases every
//! group at once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BatchingConfig;
use crate::errors::{AggError, Result};
use crate::metrics::Metrics;
use crate::point::{GroupKey, Point};
use crate::snapshot::StoreSnapshot;
use crate::state::{GroupState, GroupStore};
use crate::window::{FlushDecision, FlushScheduler};

use super::{AggregateLogic, BeginBatch, Emission, EndBatch};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BufferState {
    /// Maximum buffered points; 0 disables the size trigger.
    pub capacity: usize,
    /// Arrival order.
    pub buffer: Vec<Point>,
}

impl BufferState {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: Vec::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.buffer.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Append all buffered points as one envelope to `out` and clear
    /// the buffer. Does nothing if the buffer is empty.
    fn drain_into(&mut self, group: &GroupKey, out: &mut Vec<Emission>) -> bool {
        let (Some(last), Some(tmax)) = (
            self.buffer.last(),
            self.buffer.iter().map(|p| p.time).max(),
        ) else {
            return false;
        };
        let begin = BeginBatch {
            name: last.name.clone(),
            group: group.clone(),
            tags: last.tags.clone(),
            size: self.buffer.len(),
        };
        let end = EndBatch {
            name: begin.name.clone(),
            group: group.clone(),
            tags: begin.tags.clone(),
            tmax,
        };
        out.reserve(self.buffer.len() + 2);
        out.push(Emission::Begin(begin));
        out.extend(self.buffer.drain(..).map(Emission::Point));
        out.push(Emission::End(end));
        true
    }

    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        if self.capacity > 0 && self.buffer.len() > self.capacity {
            return Err(format!(
                "{} buffered points exceed capacity {}",
                self.buffer.len(),
                self.capacity
            ));
        }
        Ok(())
    }
}

impl GroupState for BufferState {
    fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Buffers points per group and releases them in batches.
pub struct BatchLogic {
    size: usize,
    scheduler: FlushScheduler,
    store: GroupStore<BufferState>,
    metrics: Metrics,
}

impl BatchLogic {
    pub fn new(config: BatchingConfig, metrics: Metrics) -> Self {
        Self {
            size: config.size,
            scheduler: FlushScheduler::new(config.period),
            store: GroupStore::new(),
            metrics,
        }
    }

    pub fn state(&self, group: &GroupKey) -> Option<&BufferState> {
        self.store.get(group)
    }

    pub fn next_flush(&self) -> Option<DateTime<Utc>> {
        self.scheduler.next_flush()
    }

    fn flush_all(&mut self, deadline: DateTime<Utc>, out: &mut Vec<Emission>) {
        let mut flushed = 0;
        self.store.for_each(|group, state| {
            if state.drain_into(group, out) {
                flushed += 1;
            }
        });
        tracing::debug!(%deadline, groups = flushed, "flushed all groups on deadline");
        self.metrics
            .batches_flushed
            .with_label_values(&["time"])
            .inc_by(flushed);
    }
}

impl AggregateLogic for BatchLogic {
    fn on_point(&mut self, point: Point) -> Result<Vec<Emission>> {
        // Nothing is touched until the scheduler accepts the point.
        let decision = self.scheduler.observe(point.time)?;

        let mut out = Vec::new();
        match decision {
            FlushDecision::FlushAll(deadline) => self.flush_all(deadline, &mut out),
            FlushDecision::Armed(deadline) => {
                tracing::debug!(%deadline, "first flush deadline set");
            }
            FlushDecision::Hold => {}
        }

        let key = point.group_key();
        let size = self.size;
        let state = self
            .store
            .get_or_create(&key, || BufferState::new(size));
        if state.is_full() {
            let count = state.len();
            state.drain_into(&key, &mut out);
            tracing::debug!(group = %key, count, "flushed full buffer");
            self.metrics
                .batches_flushed
                .with_label_values(&["size"])
                .inc();
        }
        state.buffer.push(point);
        self.metrics.groups.set(self.store.len() as i64);
        Ok(out)
    }

    fn group_count(&self) -> usize {
        self.store.len()
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot::Buffer {
            next_flush: self.scheduler.next_flush(),
            groups: self
                .store
                .iter()
                .map(|(key, state)| (key.clone(), state.clone()))
                .collect(),
        }
    }

    fn restore(&mut self, snapshot: StoreSnapshot) -> Result<()> {
        match snapshot {
            StoreSnapshot::Buffer { next_flush, groups } => {
                for (key, state) in groups.iter() {
                    state
                        .validate()
                        .map_err(|err| AggError::SnapshotDecode(format!("group {key}: {err}")))?;
                }
                self.store = GroupStore::from_entries(groups);
                self.scheduler.resume(next_flush);
                self.metrics.groups.set(self.store.len() as i64);
                Ok(())
            }
            other => Err(AggError::SnapshotDecode(format!(
                "expected a batch snapshot, got {}",
                other.kind()
            ))),
        }
    }
}
