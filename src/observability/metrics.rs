use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub match_attempts_total: IntCounterVec,
    pub match_latency_seconds: HistogramVec,
    pub pending_requests: IntGauge,
    pub reclaimed_requests_total: IntCounterVec,
    pub provider_responses_total: IntCounterVec,
    pub scheduler_cycle_failures_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let match_attempts_total = IntCounterVec::new(
            Opts::new("match_attempts_total", "Total match attempts by outcome"),
            &["outcome"],
        )
        .expect("valid match_attempts_total metric");

        let match_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "match_latency_seconds",
                "Latency of a single match attempt in seconds",
            ),
            &["outcome"],
        )
        .expect("valid match_latency_seconds metric");

        let pending_requests = IntGauge::new(
            "pending_requests",
            "Requests waiting for a provider at the start of the last cycle",
        )
        .expect("valid pending_requests metric");

        let reclaimed_requests_total = IntCounterVec::new(
            Opts::new(
                "reclaimed_requests_total",
                "Requests returned to the pending pool by the sweeper",
            ),
            &["reason"],
        )
        .expect("valid reclaimed_requests_total metric");

        let provider_responses_total = IntCounterVec::new(
            Opts::new(
                "provider_responses_total",
                "Provider responses to proposed matches",
            ),
            &["action"],
        )
        .expect("valid provider_responses_total metric");

        let scheduler_cycle_failures_total = IntCounter::new(
            "scheduler_cycle_failures_total",
            "Matching cycles that failed before dispatching matches",
        )
        .expect("valid scheduler_cycle_failures_total metric");

        registry
            .register(Box::new(match_attempts_total.clone()))
            .expect("register match_attempts_total");
        registry
            .register(Box::new(match_latency_seconds.clone()))
            .expect("register match_latency_seconds");
        registry
            .register(Box::new(pending_requests.clone()))
            .expect("register pending_requests");
        registry
            .register(Box::new(reclaimed_requests_total.clone()))
            .expect("register reclaimed_requests_total");
        registry
            .register(Box::new(provider_responses_total.clone()))
            .expect("register provider_responses_total");
        registry
            .register(Box::new(scheduler_cycle_failures_total.clone()))
            .expect("register scheduler_cycle_failures_total");

        Self {
            registry,
            match_attempts_total,
            match_latency_seconds,
            pending_requests,
            reclaimed_requests_total,
            provider_responses_total,
            scheduler_cycle_failures_total,
        }
    }

    pub fn observe_match(&self, outcome: &str, elapsed_secs: f64) {
        self.match_attempts_total
            .with_label_values(&[outcome])
            .inc();
        self.match_latency_seconds
            .with_label_values(&[outcome])
            .observe(elapsed_secs);
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
