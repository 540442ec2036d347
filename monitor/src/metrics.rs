use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref ADMIN_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "monitor_admin_requests_total",
            "Total admin requests received, by route"
        ),
        &["route"]
    )
    .unwrap();
    pub static ref AUTH_REJECTIONS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_auth_rejections_total",
        "Total admin requests rejected by the token check"
    ))
    .unwrap();
    pub static ref STORE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_store_failures_total",
        "Total failed activity store queries"
    ))
    .unwrap();
    pub static ref STORE_QUERY_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "monitor_store_query_latency_seconds",
            "Time taken by activity store queries"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
    pub static ref CONNECTED_DEVICES: Gauge = Gauge::with_opts(Opts::new(
        "monitor_connected_devices",
        "Devices reported as connected by the most recent query"
    ))
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(ADMIN_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(AUTH_REJECTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_QUERY_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(CONNECTED_DEVICES.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
