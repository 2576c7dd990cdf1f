//! Data points flowing through the engine and their group identity.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of one partition of aggregation state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(pub String);

impl GroupKey {
    /// Derive a group identity from a tag set.
    ///
    /// Tags are rendered `k=v` in key order and joined with `,`, so the
    /// same tag set always yields the same key no matter what order
    /// the host sent it in.
    pub fn from_tags(tags: &BTreeMap<String, String>) -> Self {
        let key = tags
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        Self(key)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A single timestamped, tagged observation.
///
/// Field maps are split by value type the same way the host protocol
/// splits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    #[serde(default)]
    pub name: String,
    pub time: DateTime<Utc>,
    /// Group id assigned by the host. When empty the group is derived
    /// from [`Point::tags`].
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub fields_double: BTreeMap<String, f64>,
    #[serde(default)]
    pub fields_int: BTreeMap<String, i64>,
    #[serde(default)]
    pub fields_string: BTreeMap<String, String>,
}

impl Point {
    pub fn new(name: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            time,
            group: String::new(),
            tags: BTreeMap::new(),
            fields_double: BTreeMap::new(),
            fields_int: BTreeMap::new(),
            fields_string: BTreeMap::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_double(mut self, field: impl Into<String>, value: f64) -> Self {
        self.fields_double.insert(field.into(), value);
        self
    }

    pub fn with_int(mut self, field: impl Into<String>, value: i64) -> Self {
        self.fields_int.insert(field.into(), value);
        self
    }

    /// Resolve which group this point belongs to.
    pub fn group_key(&self) -> GroupKey {
        if self.group.is_empty() {
            GroupKey::from_tags(&self.tags)
        } else {
            GroupKey(self.group.clone())
        }
    }

    /// Read a numeric field, widening integers.
    pub fn numeric_field(&self, field: &str) -> Option<f64> {
        self.fields_double
            .get(field)
            .copied()
            .or_else(|| self.fields_int.get(field).map(|v| *v as f64))
    }

    /// Drop every field and keep only `field = value`.
    pub fn replace_fields(&mut self, field: &str, value: f64) {
        self.fields_int.clear();
        self.fields_string.clear();
        self.fields_double.clear();
        self.fields_double.insert(field.to_owned(), value);
    }
}
