pub mod codes;
pub mod emails;
pub mod lookups;
pub mod loyalty;
pub mod models;
pub mod outbox;
pub mod reconciliation;
pub mod refunds;
pub mod service;

pub use lookups::BookingLookups;
pub use loyalty::LoyaltyEngine;
pub use outbox::{DispatchReport, OutboxDispatcher};
pub use reconciliation::PaymentReconciler;
pub use refunds::RefundEngine;
pub use service::BookingService;
