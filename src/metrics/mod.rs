use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

const NAMESPACE: &str = "streamagg";

#[macro_export]
macro_rules! with_timer {
    ($histogram: expr, $body: expr) => {{
        let now = std::time::Instant::now();
        let res = $body;
        $histogram.observe(now.elapsed().as_secs_f64());
        res
    }};
}

/// Engine instrumentation.
///
/// Cloning is cheap and every clone updates the same series.
#[derive(Clone)]
pub struct Metrics {
    pub points_received: IntCounter,
    pub points_emitted: IntCounter,
    /// Labelled by `trigger`: `size` or `time`.
    pub batches_flushed: IntCounterVec,
    /// Labelled by error `kind`.
    pub request_errors: IntCounterVec,
    pub groups: IntGauge,
    pub point_duration: Histogram,
}

impl Metrics {
    /// Create all series and register them in `registry`.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let points_received = IntCounter::with_opts(
            Opts::new("points_received_total", "Points handed to the engine").namespace(NAMESPACE),
        )?;
        let points_emitted = IntCounter::with_opts(
            Opts::new("points_emitted_total", "Points sent back to the host").namespace(NAMESPACE),
        )?;
        let batches_flushed = IntCounterVec::new(
            Opts::new("batches_flushed_total", "Batches released").namespace(NAMESPACE),
            &["trigger"],
        )?;
        let request_errors = IntCounterVec::new(
            Opts::new("request_errors_total", "Requests answered with an error")
                .namespace(NAMESPACE),
            &["kind"],
        )?;
        let groups = IntGauge::with_opts(
            Opts::new("groups", "Groups currently tracked").namespace(NAMESPACE),
        )?;
        let point_duration = Histogram::with_opts(
            HistogramOpts::new("point_duration_seconds", "Time spent aggregating one point")
                .namespace(NAMESPACE)
                .buckets(vec![
                    0.000_001, 0.000_005, 0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005,
                    0.01, 0.05, 0.1,
                ]),
        )?;

        registry.register(Box::new(points_received.clone()))?;
        registry.register(Box::new(points_emitted.clone()))?;
        registry.register(Box::new(batches_flushed.clone()))?;
        registry.register(Box::new(request_errors.clone()))?;
        registry.register(Box::new(groups.clone()))?;
        registry.register(Box::new(point_duration.clone()))?;

        Ok(Self {
            points_received,
            points_emitted,
            batches_flushed,
            request_errors,
            groups,
            point_duration,
        })
    }
}

#[test]
fn registers_all_series() {
    let registry = Registry::new();
    let metrics = Metrics::new(&registry).unwrap();
    metrics.batches_flushed.with_label_values(&["size"]).inc();
    metrics.request_errors.with_label_values(&["point"]).inc();
    let names: Vec<_> = registry
        .gather()
        .iter()
        .map(|family| family.get_name().to_owned())
        .collect();
    assert!(names.contains(&"streamagg_points_received_total".to_owned()));
    assert!(names.contains(&"streamagg_batches_flushed_total".to_owned()));
    assert!(names.contains(&"streamagg_point_duration_seconds".to_owned()));
}

#[test]
fn double_registration_fails() {
    let registry = Registry::new();
    Metrics::new(&registry).unwrap();
    assert!(Metrics::new(&registry).is_err());
}
