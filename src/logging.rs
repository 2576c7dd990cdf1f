//! Logging setup.
//!
//! Logs always go to stderr; stdout carries the agent protocol. The
//! level comes from `--log-level` and defaults to "ERROR". Setting
//! `STREAMAGG_LOG` to an `EnvFilter` directive overrides it entirely.

use tracing::{level_filters::LevelFilter, Subscriber};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer, Registry};

use crate::errors::{AggError, Result};

pub const LOG_ENV: &str = "STREAMAGG_LOG";

pub fn get_log_level(level: Option<&str>) -> Result<LevelFilter> {
    let Some(level) = level else {
        return Ok(LevelFilter::ERROR);
    };
    match level.to_lowercase().as_str() {
        "trace" => Ok(LevelFilter::TRACE),
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warn" => Ok(LevelFilter::WARN),
        "error" => Ok(LevelFilter::ERROR),
        level => Err(AggError::Configuration(format!("wrong log level: {level}"))),
    }
}

fn build_filter(level: LevelFilter) -> Result<EnvFilter> {
    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive)
            .map_err(|err| AggError::Configuration(format!("bad {LOG_ENV} directive: {err}"))),
        Err(_) => EnvFilter::try_new(format!("streamagg={level}"))
            .map_err(|err| AggError::Configuration(err.to_string())),
    }
}

/// Install the global subscriber.
pub fn setup(log_level: Option<&str>) -> Result<()> {
    let filter = build_filter(get_log_level(log_level)?)?;

    let logs = tracing_subscriber::fmt::Layer::default()
        .compact()
        .with_writer(std::io::stderr)
        // Show source file
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_filter(filter);

    set_global_subscriber(Registry::default().with(logs));
    Ok(())
}

// Setting the global subscriber twice is not an error worth dying
// over; it happens whenever tests set up logging.
fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        tracing::warn!("{err}");
    }
}

#[test]
fn parses_levels() {
    assert_eq!(get_log_level(None).unwrap(), LevelFilter::ERROR);
    assert_eq!(get_log_level(Some("DEBUG")).unwrap(), LevelFilter::DEBUG);
    assert!(matches!(
        get_log_level(Some("loud")),
        Err(AggError::Configuration(_))
    ));
}
