//! Error taxonomy for the aggregation engine.
//!
//! Only failures of the protocol streams themselves
//! ([`AggError::Emission`] and [`AggError::Io`]) are fatal. Everything
//! else is reported back to the host as a structured response and the
//! agent keeps reading requests.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AggError>;

#[derive(Error, Debug)]
pub enum AggError {
    /// Missing or invalid option at init.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Batch framing delivered to a stream-only engine.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Malformed, unknown-version, or wrong-mode snapshot bytes.
    #[error("unable to decode snapshot: {0}")]
    SnapshotDecode(String),

    #[error("unable to encode snapshot: {0}")]
    SnapshotEncode(String),

    /// The output sink went away.
    #[error("unable to emit response: {0}")]
    Emission(String),

    /// A point the engine can't aggregate.
    #[error("rejected point: {0}")]
    Point(String),

    /// A request line that isn't part of the protocol.
    #[error("malformed request: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("checkpoint store: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AggError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Unsupported(_) => "unsupported",
            Self::SnapshotDecode(_) => "snapshot_decode",
            Self::SnapshotEncode(_) => "snapshot_encode",
            Self::Emission(_) => "emission",
            Self::Point(_) => "point",
            Self::Protocol(_) => "protocol",
            Self::Checkpoint(_) => "checkpoint",
            Self::Io(_) => "io",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Emission(_) | Self::Io(_))
    }
}

impl From<rusqlite::Error> for AggError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Checkpoint(err.to_string())
    }
}

impl From<rusqlite_migration::Error> for AggError {
    fn from(err: rusqlite_migration::Error) -> Self {
        Self::Checkpoint(err.to_string())
    }
}

#[test]
fn only_sink_failures_are_fatal() {
    assert!(AggError::Emission("closed".into()).is_fatal());
    assert!(!AggError::Unsupported("batch".into()).is_fatal());
    assert!(!AggError::SnapshotDecode("bad".into()).is_fatal());
}
