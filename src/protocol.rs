//! Agent protocol messages.
//!
//! One JSON document per line in each direction. Messages are
//! externally tagged, e.g. `{"point": {...}}` or the bare string
//! `"info"` for requests without a body.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{EdgeType, InitOption, ValueType};
use crate::operators::{BeginBatch, Emission, EndBatch};
use crate::point::Point;
use crate::snapshot::StateBytes;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    Info,
    Init(InitRequest),
    Keepalive(Keepalive),
    Snapshot,
    Restore(RestoreRequest),
    Begin(BeginBatch),
    Point(Point),
    End(EndBatch),
}

impl Request {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Init(_) => "init",
            Self::Keepalive(_) => "keepalive",
            Self::Snapshot => "snapshot",
            Self::Restore(_) => "restore",
            Self::Begin(_) => "begin",
            Self::Point(_) => "point",
            Self::End(_) => "end",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitRequest {
    #[serde(default)]
    pub options: Vec<InitOption>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keepalive {
    pub time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub snapshot: StateBytes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Info(InfoResponse),
    Init(InitResponse),
    Keepalive(Keepalive),
    Snapshot(SnapshotResponse),
    Restore(RestoreResponse),
    Error(ErrorResponse),
    Begin(BeginBatch),
    Point(Point),
    End(EndBatch),
}

impl From<Emission> for Response {
    fn from(emission: Emission) -> Self {
        match emission {
            Emission::Begin(begin) => Self::Begin(begin),
            Emission::Point(point) => Self::Point(point),
            Emission::End(end) => Self::End(end),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionInfo {
    pub value_types: Vec<ValueType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoResponse {
    pub wants: EdgeType,
    pub provides: EdgeType,
    pub options: BTreeMap<String, OptionInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitResponse {
    pub success: bool,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub snapshot: StateBytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreResponse {
    pub success: bool,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
