use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub deliveries_created_total: IntCounter,
    pub delivery_transitions_total: IntCounterVec,
    pub batches_pooled_total: IntCounter,
    pub notifications_total: IntCounterVec,
    pub payment_records_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let deliveries_created_total = IntCounter::new(
            "deliveries_created_total",
            "Delivery requests created from purchase events",
        )
        .expect("valid deliveries_created_total metric");

        let delivery_transitions_total = IntCounterVec::new(
            Opts::new(
                "delivery_transitions_total",
                "Lifecycle transitions by transition and outcome",
            ),
            &["transition", "outcome"],
        )
        .expect("valid delivery_transitions_total metric");

        let batches_pooled_total = IntCounter::new(
            "batches_pooled_total",
            "Pending requests absorbed into an accepted delivery",
        )
        .expect("valid batches_pooled_total metric");

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Driver notifications by kind and outcome"),
            &["kind", "outcome"],
        )
        .expect("valid notifications_total metric");

        let payment_records_total = IntCounterVec::new(
            Opts::new(
                "payment_records_total",
                "Payment records written on completion by outcome",
            ),
            &["outcome"],
        )
        .expect("valid payment_records_total metric");

        registry
            .register(Box::new(deliveries_created_total.clone()))
            .expect("register deliveries_created_total");
        registry
            .register(Box::new(delivery_transitions_total.clone()))
            .expect("register delivery_transitions_total");
        registry
            .register(Box::new(batches_pooled_total.clone()))
            .expect("register batches_pooled_total");
        registry
            .register(Box::new(notifications_total.clone()))
            .expect("register notifications_total");
        registry
            .register(Box::new(payment_records_total.clone()))
            .expect("register payment_records_total");

        Self {
            registry,
            deliveries_created_total,
            delivery_transitions_total,
            batches_pooled_total,
            notifications_total,
            payment_records_total,
        }
    }

    pub fn record_transition(&self, transition: &str, outcome: &str) {
        self.delivery_transitions_total
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
