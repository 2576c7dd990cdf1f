//! Partitioned windowed aggregation for point streams.
//!
//! Points are partitioned into groups by their tags. Each group keeps
//! its own state, either an exponentially decaying moving average over
//! a bounded window ([`operators::decay`]) or a buffer of raw points
//! released as begin/points/end batches on size or on a store-wide
//! event-time deadline ([`operators::batch`]).
//!
//! The [`engine::Engine`] dispatches protocol requests to that logic
//! and [`run::run_agent()`] serves the JSON-lines agent protocol.

pub mod config;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod operators;
pub mod point;
pub mod protocol;
pub mod recovery;
pub mod run;
pub mod snapshot;
pub mod state;
pub mod webserver;
pub mod window;

pub use crate::config::Mode;
pub use crate::engine::Engine;
pub use crate::errors::{AggError, Result};
pub use crate::point::{GroupKey, Point};
pub use crate::run::{run_agent, AgentOptions};
