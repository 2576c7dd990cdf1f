//! Exponentially decaying moving average.
//!
//! Every group keeps the alpha-scaled contribution of each value still
//! inside its window. Each step multiplies every retained contribution
//! by `beta`, so the oldest one can be subtracted back out of the
//! running average exactly when the window is full.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::SmoothingConfig;
use crate::errors::{AggError, Result};
use crate::metrics::Metrics;
use crate::point::{GroupKey, Point};
use crate::snapshot::StoreSnapshot;
use crate::state::{GroupState, GroupStore};

use super::{AggregateLogic, Emission};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecayState {
    /// Maximum number of retained contributions; 0 is unbounded.
    pub capacity: usize,
    /// Oldest first.
    pub contributions: VecDeque<f64>,
    pub average: f64,
    pub alpha: f64,
}

impl DecayState {
    pub fn new(capacity: usize, alpha: f64) -> Self {
        Self {
            capacity,
            contributions: VecDeque::new(),
            average: 0.0,
            alpha,
        }
    }

    /// Always derived so it can never drift from `alpha`.
    pub fn beta(&self) -> f64 {
        1.0 - self.alpha
    }

    fn is_full(&self) -> bool {
        self.capacity > 0 && self.contributions.len() >= self.capacity
    }

    /// Fold `value` in and return the new average.
    pub fn update(&mut self, value: f64) -> f64 {
        let beta = self.beta();
        let evicted = if self.is_full() {
            self.contributions.pop_front()
        } else {
            None
        };
        self.average = match evicted {
            Some(oldest) => value * self.alpha + (self.average - oldest) * beta,
            None => value * self.alpha + self.average * beta,
        };
        for contribution in self.contributions.iter_mut() {
            *contribution *= beta;
        }
        self.contributions.push_back(value * self.alpha);
        self.average
    }

    /// Check invariants of a state that came from outside.
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(format!("alpha {} outside (0, 1]", self.alpha));
        }
        if self.capacity > 0 && self.contributions.len() > self.capacity {
            return Err(format!(
                "{} contributions exceed capacity {}",
                self.contributions.len(),
                self.capacity
            ));
        }
        Ok(())
    }
}

impl GroupState for DecayState {
    fn reset(&mut self) {
        self.contributions.clear();
        self.average = 0.0;
    }
}

/// Emits one smoothed value per incoming point.
pub struct DecayLogic {
    config: SmoothingConfig,
    store: GroupStore<DecayState>,
    metrics: Metrics,
}

impl DecayLogic {
    pub fn new(config: SmoothingConfig, metrics: Metrics) -> Self {
        Self {
            config,
            store: GroupStore::new(),
            metrics,
        }
    }

    pub fn state(&self, group: &GroupKey) -> Option<&DecayState> {
        self.store.get(group)
    }
}

impl AggregateLogic for DecayLogic {
    fn on_point(&mut self, mut point: Point) -> Result<Vec<Emission>> {
        let value = point.numeric_field(&self.config.field).ok_or_else(|| {
            AggError::Point(format!(
                "point {:?} has no numeric field {:?}",
                point.name, self.config.field
            ))
        })?;
        let key = point.group_key();
        let (capacity, alpha) = (self.config.size, self.config.alpha);
        let state = self
            .store
            .get_or_create(&key, || DecayState::new(capacity, alpha));
        let average = state.update(value);
        tracing::trace!(group = %key, value, average, "smoothed");

        self.metrics.groups.set(self.store.len() as i64);
        point.replace_fields(&self.config.as_name, average);
        Ok(vec![Emission::Point(point)])
    }

    fn group_count(&self) -> usize {
        self.store.len()
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot::Decay {
            groups: self
                .store
                .iter()
                .map(|(key, state)| (key.clone(), state.clone()))
                .collect(),
        }
    }

    fn restore(&mut self, snapshot: StoreSnapshot) -> Result<()> {
        match snapshot {
            StoreSnapshot::Decay { groups } => {
                for (key, state) in groups.iter() {
                    state
                        .validate()
                        .map_err(|err| AggError::SnapshotDecode(format!("group {key}: {err}")))?;
                }
                self.store = GroupStore::from_entries(groups);
                self.metrics.groups.set(self.store.len() as i64);
                Ok(())
            }
            other => Err(AggError::SnapshotDecode(format!(
                "expected a moving-average snapshot, got {}",
                other.kind()
            ))),
        }
    }
}
