use prometheus::{opts, IntCounterVec, Registry, TextEncoder};

/// Business counters scraped from `/metrics`.
///
/// Labels only ever carry fixed outcome names or error codes, never booking
/// codes or customer data.
pub struct Metrics {
    registry: Registry,
    bookings: IntCounterVec,
    payment_callbacks: IntCounterVec,
    refunds: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let bookings = IntCounterVec::new(
            opts!("coach_bookings_total", "Booking creation attempts by result"),
            &["result"],
        )?;
        let payment_callbacks = IntCounterVec::new(
            opts!(
                "coach_payment_callbacks_total",
                "Payment gateway callbacks by outcome"
            ),
            &["outcome"],
        )?;
        let refunds = IntCounterVec::new(
            opts!("coach_refunds_total", "Refund requests by result"),
            &["result"],
        )?;

        registry.register(Box::new(bookings.clone()))?;
        registry.register(Box::new(payment_callbacks.clone()))?;
        registry.register(Box::new(refunds.clone()))?;

        Ok(Self {
            registry,
            bookings,
            payment_callbacks,
            refunds,
        })
    }

    pub fn record_booking(&self, result: &str) {
        self.bookings.with_label_values(&[result]).inc();
    }

    pub fn record_callback(&self, outcome: &str) {
        self.payment_callbacks.with_label_values(&[outcome]).inc();
    }

    pub fn record_refund(&self, result: &str) {
        self.refunds.with_label_values(&[result]).inc();
    }

    /// Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render_with_labels() {
        let metrics = Metrics::new().unwrap();
        metrics.record_booking("created");
        metrics.record_booking("created");
        metrics.record_callback("INVALID_SIGNATURE");

        let text = metrics.render().unwrap();
        assert!(text.contains(r#"coach_bookings_total{result="created"} 2"#));
        assert!(text.contains(r#"coach_payment_callbacks_total{outcome="INVALID_SIGNATURE"} 1"#));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_refund("requested");
        assert!(!b.render().unwrap().contains("requested"));
    }
}
