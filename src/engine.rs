//! Request dispatch for one aggregation engine.
//!
//! The [`Engine`] is the synchronous core behind the agent loop: it
//! takes one decoded [`Request`] and returns the responses to send, in
//! order. Per-request failures become [`Response::Error`] here; nothing
//! the engine does is fatal to the loop.

use std::collections::BTreeMap;

use crate::config::{AggregateConfig, InitOption, Mode};
use crate::errors::{AggError, Result};
use crate::metrics::Metrics;
use crate::operators::batch::BatchLogic;
use crate::operators::decay::DecayLogic;
use crate::operators::{AggregateLogic, Emission};
use crate::point::Point;
use crate::protocol::{
    ErrorResponse, InfoResponse, InitResponse, OptionInfo, Request, Response, RestoreResponse,
    SnapshotResponse,
};
use crate::snapshot::{self, StateBytes, StoreSnapshot};
use crate::with_timer;

pub struct Engine {
    mode: Mode,
    metrics: Metrics,
    logic: Option<Box<dyn AggregateLogic>>,
}

impl Engine {
    /// Create an uninitialized engine. Points are rejected until a
    /// successful `init`.
    pub fn new(mode: Mode, metrics: Metrics) -> Self {
        Self {
            mode,
            metrics,
            logic: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_initialized(&self) -> bool {
        self.logic.is_some()
    }

    pub fn group_count(&self) -> usize {
        self.logic.as_ref().map_or(0, |logic| logic.group_count())
    }

    /// Handle one request.
    pub fn handle(&mut self, request: Request) -> Vec<Response> {
        let label = request.label();
        let result = match request {
            Request::Info => Ok(vec![Response::Info(self.info())]),
            Request::Init(init) => Ok(vec![Response::Init(self.init(&init.options))]),
            Request::Keepalive(keepalive) => Ok(vec![Response::Keepalive(keepalive)]),
            Request::Snapshot => self
                .snapshot()
                .map(|snapshot| vec![Response::Snapshot(SnapshotResponse { snapshot })]),
            Request::Restore(restore) => {
                Ok(vec![Response::Restore(self.restore(&restore.snapshot.0))])
            }
            Request::Begin(_) | Request::End(_) => Err(AggError::Unsupported(format!(
                "{} engines do not accept batched input ({label})",
                self.mode
            ))),
            Request::Point(point) => self
                .point(point)
                .map(|emissions| emissions.into_iter().map(Response::from).collect()),
        };
        result.unwrap_or_else(|err| vec![self.reject(label, err)])
    }

    /// Turn a non-fatal error into the response that reports it.
    pub fn reject(&self, request: &str, err: AggError) -> Response {
        tracing::warn!(request, kind = err.kind(), "{err}");
        self.metrics
            .request_errors
            .with_label_values(&[err.kind()])
            .inc();
        Response::Error(ErrorResponse {
            error: err.to_string(),
        })
    }

    pub fn info(&self) -> InfoResponse {
        let options = self
            .mode
            .option_types()
            .into_iter()
            .map(|(name, value_type)| {
                (
                    name.to_owned(),
                    OptionInfo {
                        value_types: vec![value_type],
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();
        InfoResponse {
            wants: self.mode.wants(),
            provides: self.mode.provides(),
            options,
        }
    }

    /// Configure the engine.
    ///
    /// A successful init replaces any previous configuration and drops
    /// all group state. A failed one leaves the engine as it was.
    pub fn init(&mut self, options: &[InitOption]) -> InitResponse {
        match AggregateConfig::decode(self.mode, options) {
            Ok(config) => {
                if self.logic.is_some() {
                    tracing::warn!("re-initializing {} engine; group state dropped", self.mode);
                }
                tracing::info!(?config, "initialized {} engine", self.mode);
                let metrics = self.metrics.clone();
                let logic: Box<dyn AggregateLogic> = match config {
                    AggregateConfig::Smoothing(config) => Box::new(DecayLogic::new(config, metrics)),
                    AggregateConfig::Batching(config) => Box::new(BatchLogic::new(config, metrics)),
                };
                self.metrics.groups.set(0);
                self.logic = Some(logic);
                InitResponse {
                    success: true,
                    error: String::new(),
                }
            }
            Err(err) => {
                tracing::info!("rejected init: {err}");
                self.metrics
                    .request_errors
                    .with_label_values(&[err.kind()])
                    .inc();
                InitResponse {
                    success: false,
                    error: err.to_string(),
                }
            }
        }
    }

    /// Serialize all group state.
    ///
    /// Before init this is the empty store for the engine's mode.
    pub fn snapshot(&self) -> Result<StateBytes> {
        let store = match &self.logic {
            Some(logic) => logic.snapshot(),
            None => self.empty_store(),
        };
        snapshot::serialize(&store)
    }

    /// Replace all group state from a serialized snapshot.
    pub fn restore(&mut self, bytes: &[u8]) -> RestoreResponse {
        match self.try_restore(bytes) {
            Ok(groups) => {
                tracing::info!(groups, "restored {} engine", self.mode);
                RestoreResponse {
                    success: true,
                    error: String::new(),
                }
            }
            Err(err) => {
                tracing::warn!("restore failed: {err}");
                self.metrics
                    .request_errors
                    .with_label_values(&[err.kind()])
                    .inc();
                RestoreResponse {
                    success: false,
                    error: err.to_string(),
                }
            }
        }
    }

    /// Like [`Engine::restore`] but returns the error and the number of
    /// groups restored.
    pub fn try_restore(&mut self, bytes: &[u8]) -> Result<usize> {
        let logic = self.logic.as_mut().ok_or_else(|| {
            AggError::Configuration("cannot restore before a successful init".to_owned())
        })?;
        let store = snapshot::deserialize(bytes)?;
        logic.restore(store)?;
        Ok(logic.group_count())
    }

    /// Aggregate one point.
    pub fn point(&mut self, point: Point) -> Result<Vec<Emission>> {
        let logic = self.logic.as_mut().ok_or_else(|| {
            AggError::Configuration("received a point before a successful init".to_owned())
        })?;
        self.metrics.points_received.inc();
        let emissions = with_timer!(self.metrics.point_duration, logic.on_point(point))?;
        let points = emissions
            .iter()
            .filter(|emission| matches!(emission, Emission::Point(_)))
            .count();
        self.metrics.points_emitted.inc_by(points as u64);
        Ok(emissions)
    }

    fn empty_store(&self) -> StoreSnapshot {
        match self.mode {
            Mode::MovingAverage => StoreSnapshot::Decay { groups: Vec::new() },
            Mode::Batch => StoreSnapshot::Buffer {
                next_flush: None,
                groups: Vec::new(),
            },
        }
    }
}
