//! Aggregation logic.
//!
//! Each aggregation mode is an [`AggregateLogic`] that owns its own
//! [`crate::state::GroupStore`]. Logic is synchronous: it consumes one
//! point and returns everything that must be emitted because of it, in
//! order. The agent loop is responsible for getting those emissions to
//! the host.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::point::{GroupKey, Point};
use crate::snapshot::StoreSnapshot;

pub mod batch;
pub mod decay;

/// Opens a batch envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeginBatch {
    #[serde(default)]
    pub name: String,
    pub group: GroupKey,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Number of points in the batch.
    pub size: usize,
}

/// Closes a batch envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndBatch {
    #[serde(default)]
    pub name: String,
    pub group: GroupKey,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Latest timestamp among the batch's points.
    pub tmax: DateTime<Utc>,
}

/// Something the logic wants sent downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    Begin(BeginBatch),
    Point(Point),
    End(EndBatch),
}

/// Impl this trait to create an aggregation mode.
pub trait AggregateLogic: Send {
    /// Absorb one point and return what must be emitted, in order.
    ///
    /// If this returns an error no state was modified.
    fn on_point(&mut self, point: Point) -> Result<Vec<Emission>>;

    /// Number of groups currently tracked.
    fn group_count(&self) -> usize;

    /// Capture all state needed to resume exactly where this logic is.
    fn snapshot(&self) -> StoreSnapshot;

    /// Replace all state with a previously captured snapshot.
    ///
    /// On error the current state is left untouched.
    fn restore(&mut self, snapshot: StoreSnapshot) -> Result<()>;
}
