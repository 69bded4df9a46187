use std::sync::Arc;

use coach_booking::{BookingLookups, BookingService, LoyaltyEngine, PaymentReconciler, RefundEngine};
use coach_core::clock::Clock;
use coach_core::payment::PaymentGateway;
use coach_core::repository::{BookingLedger, SeatLockStore};
use coach_store::app_config::BookingRules;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub bookings: Arc<BookingService>,
    pub payments: Arc<PaymentReconciler>,
    pub refunds: Arc<RefundEngine>,
    pub lookups: Arc<BookingLookups>,
    pub loyalty: LoyaltyEngine,
    pub ledger: Arc<dyn BookingLedger>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<Metrics>,
    pub auth: AuthConfig,
}

impl AppState {
    /// Wires the engines over one ledger, one lock store and one clock.
    pub fn new(
        ledger: Arc<dyn BookingLedger>,
        locks: Arc<dyn SeatLockStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        rules: BookingRules,
        auth: AuthConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        let loyalty = LoyaltyEngine::new(rules.utc_offset_hours);
        Self {
            bookings: Arc::new(BookingService::new(
                ledger.clone(),
                locks.clone(),
                clock.clone(),
                rules,
            )),
            payments: Arc::new(PaymentReconciler::new(
                ledger.clone(),
                locks,
                gateway,
                loyalty,
                clock.clone(),
            )),
            refunds: Arc::new(RefundEngine::new(ledger.clone(), clock.clone())),
            lookups: Arc::new(BookingLookups::new(ledger.clone())),
            loyalty,
            ledger,
            clock,
            metrics,
            auth,
        }
    }
}
