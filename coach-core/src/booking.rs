use chrono::{DateTime, Utc};
use coach_shared::Masked;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::refund::Refund;

/// Booking status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// Contact details of a customer booking without an account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuestContact {
    pub name: Masked<String>,
    pub email: Masked<String>,
    pub phone: Masked<String>,
}

/// Who the booking belongs to: a registered account or a guest, never both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CustomerRef {
    Registered { customer_id: i64 },
    Guest(GuestContact),
}

impl CustomerRef {
    /// Name shown to other buyers when this customer holds a seat.
    pub fn holder_name(&self) -> String {
        match self {
            CustomerRef::Guest(guest) => guest.name.as_inner().clone(),
            CustomerRef::Registered { customer_id } => registered_holder(*customer_id),
        }
    }
}

pub fn registered_holder(customer_id: i64) -> String {
    format!("customer #{}", customer_id)
}

/// Pickup or dropoff point: a company office or a named shuttle stop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StopPoint {
    Office { office_id: i64 },
    Shuttle { point_name: String },
}

impl StopPoint {
    pub fn is_valid(&self) -> bool {
        match self {
            StopPoint::Office { office_id } => *office_id > 0,
            StopPoint::Shuttle { point_name } => !point_name.trim().is_empty(),
        }
    }
}

/// What the gateway reported when the booking was paid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settlement {
    pub amount: i64,
    pub method: String,
    pub transaction_ref: String,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: Uuid,
    pub booking_code: String,
    pub booking_session: String,
    pub trip_id: i64,
    pub booking_status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub customer: CustomerRef,
    pub pickup: StopPoint,
    pub dropoff: StopPoint,
    pub number_of_tickets: i32,
    pub total_price: i64,
    pub total_payment: i64,
    pub discount_amount: i64,
    pub voucher_id: Option<Uuid>,
    pub payment_amount: Option<i64>,
    pub payment_method: Option<String>,
    pub payment_transaction_id: Option<String>,
    pub payment_time: Option<DateTime<Utc>>,
    pub expiration_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Pending, unpaid and not yet expired.
    pub fn is_awaiting_payment(&self, now: DateTime<Utc>) -> bool {
        self.booking_status == BookingStatus::Pending
            && self.payment_status == PaymentStatus::Pending
            && self.expiration_time > now
    }

    pub fn is_paid(&self) -> bool {
        self.booking_status == BookingStatus::Confirmed
            && self.payment_status == PaymentStatus::Completed
    }

    /// Amount the gateway must charge, in VND.
    pub fn payable_amount(&self) -> i64 {
        (self.total_payment - self.discount_amount).max(0)
    }

    pub fn customer_id(&self) -> Option<i64> {
        match &self.customer {
            CustomerRef::Registered { customer_id } => Some(*customer_id),
            CustomerRef::Guest(_) => None,
        }
    }

    pub fn guest(&self) -> Option<&GuestContact> {
        match &self.customer {
            CustomerRef::Guest(guest) => Some(guest),
            CustomerRef::Registered { .. } => None,
        }
    }

    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expiration_time - now).num_seconds().max(0)
    }

    /// Transition: pending/pending -> confirmed/completed
    pub fn confirm(&mut self, settlement: Settlement) -> Result<(), TransitionError> {
        self.require_open("confirmed")?;
        self.booking_status = BookingStatus::Confirmed;
        self.payment_status = PaymentStatus::Completed;
        self.payment_amount = Some(settlement.amount);
        self.payment_method = Some(settlement.method);
        self.payment_transaction_id = Some(settlement.transaction_ref);
        self.payment_time = Some(settlement.paid_at);
        self.updated_at = settlement.paid_at;
        Ok(())
    }

    /// Transition: pending/pending -> cancelled/failed
    pub fn fail_payment(
        &mut self,
        method: &str,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.require_open("cancelled")?;
        self.booking_status = BookingStatus::Cancelled;
        self.payment_status = PaymentStatus::Failed;
        self.payment_method = Some(method.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// Transition: pending/pending -> cancelled/failed, without payment details.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require_open("cancelled")?;
        self.booking_status = BookingStatus::Cancelled;
        self.payment_status = PaymentStatus::Failed;
        self.updated_at = now;
        Ok(())
    }

    pub fn apply_discount(&mut self, voucher_id: Uuid, discount: i64, now: DateTime<Utc>) {
        self.voucher_id = Some(voucher_id);
        self.discount_amount = discount.clamp(0, self.total_payment);
        self.updated_at = now;
    }

    fn require_open(&self, to: &str) -> Result<(), TransitionError> {
        if self.booking_status != BookingStatus::Pending
            || self.payment_status != PaymentStatus::Pending
        {
            return Err(TransitionError {
                from: format!(
                    "{}/{}",
                    self.booking_status.as_str(),
                    self.payment_status.as_str()
                ),
                to: to.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid booking transition from {from} to {to}")]
pub struct TransitionError {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ticket {
    pub ticket_id: Uuid,
    pub ticket_code: String,
    pub trip_id: i64,
    pub seat_id: i64,
    pub seat_name: String,
    pub ticket_amount: i64,
    pub is_export_ticket: bool,
    pub created_at: DateTime<Utc>,
}

/// Link row between a booking and one of its tickets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookingDetail {
    pub booking_id: Uuid,
    pub ticket_id: Uuid,
    pub price: i64,
}

/// Ledger-side inventory flag for one seat of one trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TripSeat {
    pub trip_id: i64,
    pub seat_id: i64,
    pub allocated: bool,
    pub booking_id: Option<Uuid>,
    pub hold_expires_at: Option<DateTime<Utc>>,
}

impl TripSeat {
    /// Free and not claimed by an unexpired pending booking.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        !self.allocated
            && match (self.booking_id, self.hold_expires_at) {
                (None, _) => true,
                (Some(_), Some(until)) => until <= now,
                (Some(_), None) => false,
            }
    }
}

/// A ledger seat that refused a claim and the booking sitting on it.
/// `hold_expires_at` is `None` once the seat is sold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimConflict {
    pub seat_id: i64,
    pub holder_name: String,
    pub hold_expires_at: Option<DateTime<Utc>>,
}

/// Catalog-owned trip schedule, read only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TripSchedule {
    pub trip_id: i64,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: Option<DateTime<Utc>>,
}

/// Registered customer row, including the loyalty balance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomerAccount {
    pub customer_id: i64,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub bonus_points: i64,
}

/// A booking with its tickets and schedule, as returned by lookups.
#[derive(Debug, Clone, Serialize)]
pub struct BookingSnapshot {
    pub booking: Booking,
    pub tickets: Vec<Ticket>,
    pub trip: Option<TripSchedule>,
}

impl BookingSnapshot {
    pub fn seat_ids(&self) -> Vec<i64> {
        self.tickets.iter().map(|t| t.seat_id).collect()
    }
}

/// One ticket joined with everything needed to display or refund it.
#[derive(Debug, Clone, Serialize)]
pub struct TicketRecord {
    pub ticket: Ticket,
    pub booking: Booking,
    pub trip: Option<TripSchedule>,
    pub customer: Option<CustomerAccount>,
    pub refund: Option<Refund>,
}

impl TicketRecord {
    /// True when `phone` belongs to the registered owner or the guest on the booking.
    pub fn owned_by_phone(&self, phone: &str) -> bool {
        match (&self.booking.customer, &self.customer) {
            (CustomerRef::Registered { .. }, Some(account)) => account.phone == phone,
            (CustomerRef::Guest(guest), _) => guest.phone.as_inner() == phone,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pending_booking(now: DateTime<Utc>) -> Booking {
        Booking {
            booking_id: Uuid::new_v4(),
            booking_code: "BOOK1700000000000ABCDEF12".into(),
            booking_session: "sess-1".into(),
            trip_id: 10,
            booking_status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            customer: CustomerRef::Registered { customer_id: 5 },
            pickup: StopPoint::Office { office_id: 1 },
            dropoff: StopPoint::Shuttle {
                point_name: "Ben Thanh".into(),
            },
            number_of_tickets: 2,
            total_price: 500_000,
            total_payment: 500_000,
            discount_amount: 0,
            voucher_id: None,
            payment_amount: None,
            payment_method: None,
            payment_transaction_id: None,
            payment_time: None,
            expiration_time: now + Duration::minutes(15),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_booking_lifecycle() {
        let now = Utc::now();
        let mut booking = pending_booking(now);
        assert!(booking.is_awaiting_payment(now));

        booking
            .confirm(Settlement {
                amount: 500_000,
                method: "vnpay".into(),
                transaction_ref: "14000001".into(),
                paid_at: now,
            })
            .unwrap();
        assert!(booking.is_paid());
        assert_eq!(booking.payment_amount, Some(500_000));

        // Confirmed is terminal
        assert!(booking.cancel(now).is_err());
        assert!(booking.fail_payment("vnpay", now).is_err());
        assert_eq!(booking.booking_status, BookingStatus::Confirmed);
    }

    #[test]
    fn test_expired_booking_is_not_payable() {
        let now = Utc::now();
        let booking = pending_booking(now);
        assert!(!booking.is_awaiting_payment(now + Duration::minutes(15)));
        assert_eq!(booking.seconds_remaining(now + Duration::minutes(20)), 0);
    }

    #[test]
    fn test_discount_is_clamped() {
        let now = Utc::now();
        let mut booking = pending_booking(now);
        booking.apply_discount(Uuid::new_v4(), 900_000, now);
        assert_eq!(booking.payable_amount(), 0);
    }

    #[test]
    fn test_trip_seat_claimable() {
        let now = Utc::now();
        let mut seat = TripSeat {
            trip_id: 1,
            seat_id: 2,
            allocated: false,
            booking_id: Some(Uuid::new_v4()),
            hold_expires_at: Some(now + Duration::minutes(5)),
        };
        assert!(!seat.is_claimable(now));
        assert!(seat.is_claimable(now + Duration::minutes(5)));

        seat.allocated = true;
        seat.hold_expires_at = None;
        assert!(!seat.is_claimable(now + Duration::days(1)));
    }
}
