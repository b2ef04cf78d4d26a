use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub ride_transitions_total: IntCounterVec,
    pub dispatch_queue_depth: IntGauge,
    pub dispatch_latency_seconds: HistogramVec,
    pub wallet_transactions_total: IntCounterVec,
    pub drivers_indexed: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let ride_transitions_total = IntCounterVec::new(
            Opts::new(
                "ride_transitions_total",
                "Ride lifecycle transitions by event and outcome",
            ),
            &["transition", "outcome"],
        )
        .expect("valid ride_transitions_total metric");

        let dispatch_queue_depth =
            IntGauge::new("dispatch_queue_depth", "Rides waiting for background dispatch")
                .expect("valid dispatch_queue_depth metric");

        let dispatch_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatch_latency_seconds",
                "Latency of one dispatch attempt in seconds",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let wallet_transactions_total = IntCounterVec::new(
            Opts::new("wallet_transactions_total", "Ledger entries by kind"),
            &["kind"],
        )
        .expect("valid wallet_transactions_total metric");

        let drivers_indexed = IntGauge::new("drivers_indexed", "Drivers with a known position")
            .expect("valid drivers_indexed metric");

        registry
            .register(Box::new(ride_transitions_total.clone()))
            .expect("register ride_transitions_total");
        registry
            .register(Box::new(dispatch_queue_depth.clone()))
            .expect("register dispatch_queue_depth");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(wallet_transactions_total.clone()))
            .expect("register wallet_transactions_total");
        registry
            .register(Box::new(drivers_indexed.clone()))
            .expect("register drivers_indexed");

        Self {
            registry,
            ride_transitions_total,
            dispatch_queue_depth,
            dispatch_latency_seconds,
            wallet_transactions_total,
            drivers_indexed,
        }
    }

    pub fn record_transition<T>(&self, transition: &str, result: &Result<T, crate::error::AppError>) {
        let outcome = match result {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        self.ride_transitions_total
            .with_label_values(&[transition, outcome])
            .inc();
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
