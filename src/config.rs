//! Option decoding for `init` requests.
//!
//! Hosts send options as a list of `(name, [value])` pairs with
//! loosely typed values. They are decoded once here into a typed
//! [`AggregateConfig`]; nothing past this module ever looks at a raw
//! [`OptionValue`]. Every problem found is reported, not just the
//! first one.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{AggError, Result};

/// A single option value as sent by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    /// Nanoseconds.
    Duration(i64),
}

impl OptionValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::Double(_) => ValueType::Double,
            Self::String(_) => ValueType::String,
            Self::Duration(_) => ValueType::Duration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bool,
    Int,
    Double,
    String,
    Duration,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Double => "double",
            Self::String => "string",
            Self::Duration => "duration",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitOption {
    pub name: String,
    #[serde(default)]
    pub values: Vec<OptionValue>,
}

impl InitOption {
    pub fn new(name: impl Into<String>, value: OptionValue) -> Self {
        Self {
            name: name.into(),
            values: vec![value],
        }
    }
}

/// Shape of data an engine consumes or produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Stream,
    Batch,
}

/// Which aggregation an agent process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Exponentially decaying moving average, one output per point.
    MovingAverage,
    /// Buffer points per group and release them in batches.
    Batch,
}

impl Mode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::MovingAverage => "moving-average",
            Self::Batch => "batch",
        }
    }

    pub fn wants(&self) -> EdgeType {
        EdgeType::Stream
    }

    pub fn provides(&self) -> EdgeType {
        match self {
            Self::MovingAverage => EdgeType::Stream,
            Self::Batch => EdgeType::Batch,
        }
    }

    /// Options this mode accepts and the value type of each.
    pub fn option_types(&self) -> BTreeMap<&'static str, ValueType> {
        let mut options = BTreeMap::from([
            ("field", ValueType::String),
            ("as", ValueType::String),
            ("size", ValueType::Int),
        ]);
        match self {
            Self::MovingAverage => options.insert("alpha", ValueType::Double),
            Self::Batch => options.insert("period", ValueType::Duration),
        };
        options
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingConfig {
    pub field: String,
    pub as_name: String,
    /// Window capacity; 0 is unbounded.
    pub size: usize,
    pub alpha: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchingConfig {
    pub field: String,
    pub as_name: String,
    /// Buffer capacity; 0 disables the size trigger.
    pub size: usize,
    /// Zero disables the time trigger.
    pub period: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateConfig {
    Smoothing(SmoothingConfig),
    Batching(BatchingConfig),
}

/// Options that passed the type checks, by name.
#[derive(Default)]
struct Decoded {
    values: BTreeMap<String, OptionValue>,
}

impl Decoded {
    fn string(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(OptionValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(OptionValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    fn double(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(OptionValue::Double(v)) => Some(*v),
            _ => None,
        }
    }

    fn duration(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(OptionValue::Duration(v)) => Some(*v),
            _ => None,
        }
    }
}

impl AggregateConfig {
    /// Decode and validate `init` options for `mode`.
    pub fn decode(mode: Mode, options: &[InitOption]) -> Result<Self> {
        let mut problems = Vec::new();
        let decoded = check_types(mode, options, &mut problems);

        let field = decoded.string("field").unwrap_or_default().to_owned();
        if field.is_empty() {
            problems.push("must supply field".to_owned());
        }
        let as_name = decoded.string("as").unwrap_or_default().to_owned();
        if as_name.is_empty() {
            problems.push("must supply as".to_owned());
        }
        let size = decoded.int("size").unwrap_or(0);
        let size = usize::try_from(size).unwrap_or_else(|_| {
            problems.push(format!("size must not be negative, got {size}"));
            0
        });

        let config = match mode {
            Mode::MovingAverage => {
                let alpha = decoded.double("alpha").unwrap_or(0.0);
                // Written so NaN fails too.
                if !(alpha > 0.0 && alpha <= 1.0) {
                    problems.push(format!("alpha must be in (0, 1], got {alpha}"));
                }
                AggregateConfig::Smoothing(SmoothingConfig {
                    field,
                    as_name,
                    size,
                    alpha,
                })
            }
            Mode::Batch => {
                let nanos = decoded.duration("period").unwrap_or(0);
                if nanos < 0 {
                    problems.push(format!("period must not be negative, got {nanos}ns"));
                }
                if size == 0 && nanos <= 0 {
                    problems.push("must supply a maximum size or period".to_owned());
                }
                AggregateConfig::Batching(BatchingConfig {
                    field,
                    as_name,
                    size,
                    period: Duration::nanoseconds(nanos.max(0)),
                })
            }
        };

        if problems.is_empty() {
            Ok(config)
        } else {
            Err(AggError::Configuration(problems.join("; ")))
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Self::Smoothing(_) => Mode::MovingAverage,
            Self::Batching(_) => Mode::Batch,
        }
    }
}

fn check_types(mode: Mode, options: &[InitOption], problems: &mut Vec<String>) -> Decoded {
    let known = mode.option_types();
    let mut seen = HashSet::new();
    let mut decoded = Decoded::default();
    for option in options {
        let name = option.name.as_str();
        let Some(&expected) = known.get(name) else {
            problems.push(format!("unknown option {name:?} for {mode}"));
            continue;
        };
        if !seen.insert(name) {
            problems.push(format!("option {name:?} given more than once"));
            continue;
        }
        let value = match option.values.as_slice() {
            [value] => value,
            values => {
                problems.push(format!(
                    "option {name:?} takes exactly one value, got {}",
                    values.len()
                ));
                continue;
            }
        };
        if value.value_type() != expected {
            problems.push(format!(
                "option {name:?} must be {expected}, got {}",
                value.value_type()
            ));
            continue;
        }
        decoded.values.insert(name.to_owned(), value.clone());
    }
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_test::{assert_tokens, Token};

    fn s(name: &str, v: &str) -> InitOption {
        InitOption::new(name, OptionValue::String(v.to_owned()))
    }

    fn i(name: &str, v: i64) -> InitOption {
        InitOption::new(name, OptionValue::Int(v))
    }

    fn err_msg(result: Result<AggregateConfig>) -> String {
        match result {
            Err(AggError::Configuration(msg)) => msg,
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn option_value_wire_format() {
        assert_tokens(
            &OptionValue::Duration(5),
            &[
                Token::NewtypeVariant {
                    name: "OptionValue",
                    variant: "duration",
                },
                Token::I64(5),
            ],
        );
        assert_tokens(
            &OptionValue::String("x".into()),
            &[
                Token::NewtypeVariant {
                    name: "OptionValue",
                    variant: "string",
                },
                Token::Str("x"),
            ],
        );
    }

    #[test]
    fn decodes_smoothing() {
        let options = vec![
            s("field", "value"),
            s("as", "avg"),
            i("size", 10),
            InitOption::new("alpha", OptionValue::Double(0.25)),
        ];
        let config = AggregateConfig::decode(Mode::MovingAverage, &options).unwrap();
        assert_eq!(
            config,
            AggregateConfig::Smoothing(SmoothingConfig {
                field: "value".into(),
                as_name: "avg".into(),
                size: 10,
                alpha: 0.25,
            })
        );
    }

    #[test]
    fn smoothing_size_defaults_to_unbounded() {
        let options = vec![
            s("field", "value"),
            s("as", "avg"),
            InitOption::new("alpha", OptionValue::Double(1.0)),
        ];
        match AggregateConfig::decode(Mode::MovingAverage, &options).unwrap() {
            AggregateConfig::Smoothing(c) => assert_eq!(c.size, 0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_zero_and_out_of_range_alpha() {
        for alpha in [0.0, -0.5, 1.5, f64::NAN] {
            let options = vec![
                s("field", "value"),
                s("as", "avg"),
                InitOption::new("alpha", OptionValue::Double(alpha)),
            ];
            let msg = err_msg(AggregateConfig::decode(Mode::MovingAverage, &options));
            assert!(msg.contains("alpha must be in (0, 1]"), "{msg}");
        }
    }

    #[test]
    fn reports_every_problem() {
        let options = vec![i("size", -1), i("alpha", 1)];
        let msg = err_msg(AggregateConfig::decode(Mode::MovingAverage, &options));
        assert!(msg.contains("must supply field"));
        assert!(msg.contains("must supply as"));
        assert!(msg.contains("size must not be negative"));
        assert!(msg.contains(r#"option "alpha" must be double, got int"#));
    }

    #[test]
    fn decodes_batching() {
        let options = vec![
            s("field", "value"),
            s("as", "out"),
            InitOption::new("period", OptionValue::Duration(10_000_000_000)),
        ];
        let config = AggregateConfig::decode(Mode::Batch, &options).unwrap();
        assert_eq!(
            config,
            AggregateConfig::Batching(BatchingConfig {
                field: "value".into(),
                as_name: "out".into(),
                size: 0,
                period: Duration::seconds(10),
            })
        );
        assert_eq!(config.mode(), Mode::Batch);
    }

    #[test]
    fn batching_needs_size_or_period() {
        let options = vec![s("field", "value"), s("as", "out")];
        let msg = err_msg(AggregateConfig::decode(Mode::Batch, &options));
        assert!(msg.contains("must supply a maximum size or period"));
    }

    #[test]
    fn rejects_options_of_the_other_mode() {
        let options = vec![
            s("field", "value"),
            s("as", "out"),
            i("size", 3),
            InitOption::new("alpha", OptionValue::Double(0.5)),
        ];
        let msg = err_msg(AggregateConfig::decode(Mode::Batch, &options));
        assert!(msg.contains(r#"unknown option "alpha" for batch"#));
    }

    #[test]
    fn rejects_duplicates_and_value_counts() {
        let options = vec![
            s("field", "value"),
            s("field", "other"),
            s("as", "out"),
            InitOption {
                name: "size".into(),
                values: vec![],
            },
        ];
        let msg = err_msg(AggregateConfig::decode(Mode::Batch, &options));
        assert!(msg.contains(r#"option "field" given more than once"#));
        assert!(msg.contains(r#"option "size" takes exactly one value, got 0"#));
    }
}
