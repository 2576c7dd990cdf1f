//! Versioned snapshot encoding of a whole group store.
//!
//! The wire format is a JSON envelope `{"version": N, "store": ...}`.
//! The version is read on its own first so an unknown version is
//! reported as such instead of as whatever field happened to fail to
//! parse. Floats round-trip bit for bit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{AggError, Result};
use crate::operators::batch::BufferState;
use crate::operators::decay::DecayState;
use crate::point::GroupKey;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Opaque serialized snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateBytes(pub Vec<u8>);

/// Everything needed to resume one engine's aggregation state.
///
/// Groups are listed in first-insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreSnapshot {
    Decay {
        groups: Vec<(GroupKey, DecayState)>,
    },
    Buffer {
        next_flush: Option<DateTime<Utc>>,
        groups: Vec<(GroupKey, BufferState)>,
    },
}

impl StoreSnapshot {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decay { .. } => "decay",
            Self::Buffer { .. } => "buffer",
        }
    }

    pub fn group_count(&self) -> usize {
        match self {
            Self::Decay { groups } => groups.len(),
            Self::Buffer { groups, .. } => groups.len(),
        }
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    store: &'a StoreSnapshot,
}

#[derive(Deserialize)]
struct Header {
    version: u32,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    #[allow(dead_code)]
    version: u32,
    store: StoreSnapshot,
}

pub fn serialize(snapshot: &StoreSnapshot) -> Result<StateBytes> {
    let envelope = EnvelopeRef {
        version: SNAPSHOT_VERSION,
        store: snapshot,
    };
    serde_json::to_vec(&envelope)
        .map(StateBytes)
        .map_err(|err| AggError::SnapshotEncode(err.to_string()))
}

pub fn deserialize(bytes: &[u8]) -> Result<StoreSnapshot> {
    let header: Header = serde_json::from_slice(bytes)
        .map_err(|err| AggError::SnapshotDecode(format!("unreadable header: {err}")))?;
    if header.version != SNAPSHOT_VERSION {
        return Err(AggError::SnapshotDecode(format!(
            "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
            header.version
        )));
    }
    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|err| AggError::SnapshotDecode(err.to_string()))?;
    Ok(envelope.store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Point;
    use chrono::TimeZone;

    fn decay_snapshot() -> StoreSnapshot {
        let mut a = DecayState::new(3, 0.1);
        let mut b = DecayState::new(0, 0.37);
        for v in [0.1, 1.0 / 3.0, 2.0_f64.sqrt(), 1e-300, 123456.789] {
            a.update(v);
            b.update(v * 7.0);
        }
        StoreSnapshot::Decay {
            groups: vec![(GroupKey::from("z"), a), (GroupKey::from("a"), b)],
        }
    }

    #[test]
    fn decay_round_trip_is_exact() {
        let snapshot = decay_snapshot();
        let bytes = serialize(&snapshot).unwrap();
        let restored = deserialize(&bytes.0).unwrap();
        assert_eq!(restored, snapshot);
        if let (StoreSnapshot::Decay { groups: x }, StoreSnapshot::Decay { groups: y }) =
            (&restored, &snapshot)
        {
            for ((_, x), (_, y)) in x.iter().zip(y) {
                assert_eq!(x.average.to_bits(), y.average.to_bits());
            }
        }
    }

    #[test]
    fn buffer_round_trip_keeps_deadline_and_order() {
        let t = Utc.timestamp_opt(1_000, 500).unwrap();
        let mut state = BufferState::new(4);
        state
            .buffer
            .push(Point::new("m", t).with_group("g").with_double("v", 0.3));
        let snapshot = StoreSnapshot::Buffer {
            next_flush: Some(t),
            groups: vec![
                (GroupKey::from("g"), state),
                (GroupKey::from("e"), BufferState::new(4)),
            ],
        };
        let restored = deserialize(&serialize(&snapshot).unwrap().0).unwrap();
        assert_eq!(restored, snapshot);
        assert_eq!(restored.group_count(), 2);
    }

    #[test]
    fn rejects_unknown_version() {
        let bytes = br#"{"version": 99, "store": {"kind": "decay", "groups": []}}"#;
        let err = deserialize(bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported snapshot version 99"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            deserialize(b"\x00\x01not json"),
            Err(AggError::SnapshotDecode(_))
        ));
    }

    #[test]
    fn rejects_unknown_fields() {
        let bytes = br#"{"version": 1, "store": {"kind": "decay", "groups": [["g",
            {"capacity": 1, "contributions": [], "average": 0.0, "alpha": 0.5, "beta": 0.5}]]}}"#;
        assert!(matches!(
            deserialize(bytes),
            Err(AggError::SnapshotDecode(_))
        ));
    }

    #[test]
    fn rejects_unknown_kind() {
        let bytes = br#"{"version": 1, "store": {"kind": "sigma", "groups": []}}"#;
        assert!(matches!(
            deserialize(bytes),
            Err(AggError::SnapshotDecode(_))
        ));
    }
}
