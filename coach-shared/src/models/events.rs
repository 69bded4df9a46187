use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kafka topic names for booking lifecycle events.
pub mod topics {
    pub const BOOKING_CREATED: &str = "booking.created";
    pub const BOOKING_CONFIRMED: &str = "booking.confirmed";
    pub const BOOKING_CANCELLED: &str = "booking.cancelled";
    pub const BOOKING_PAYMENT_FAILED: &str = "booking.payment_failed";
    pub const REFUND_REQUESTED: &str = "refund.requested";
    pub const REFUND_APPROVED: &str = "refund.approved";
    pub const VOUCHER_ISSUED: &str = "voucher.issued";
    pub const NOTIFICATIONS: &str = "notifications.email";
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BookingCreatedEvent {
    pub booking_id: Uuid,
    pub booking_code: String,
    pub trip_id: i64,
    pub seat_ids: Vec<i64>,
    pub total_payment: i64,
    pub expires_at: DateTime<Utc>,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BookingConfirmedEvent {
    pub booking_id: Uuid,
    pub booking_code: String,
    pub trip_id: i64,
    pub seat_ids: Vec<i64>,
    pub customer_id: Option<i64>,
    pub amount_paid: i64,
    pub transaction_ref: String,
    pub timestamp: i64,
}

/// Emitted both for customer cancellations and for gateway-declined payments.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BookingReleasedEvent {
    pub booking_id: Uuid,
    pub booking_code: String,
    pub trip_id: i64,
    pub seat_ids: Vec<i64>,
    pub reason: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RefundEvent {
    pub refund_id: Uuid,
    pub refund_code: String,
    pub ticket_code: String,
    pub refund_amount: i64,
    pub refund_percentage: i32,
    pub employee_id: Option<i64>,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VoucherIssuedEvent {
    pub voucher_id: Uuid,
    pub voucher_code: String,
    pub customer_id: i64,
    pub discount_percentage: i32,
    pub valid_to: DateTime<Utc>,
    pub timestamp: i64,
}
