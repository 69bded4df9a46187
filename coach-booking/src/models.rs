use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use coach_core::booking::{
    Booking, BookingSnapshot, BookingStatus, CustomerRef, GuestContact, PaymentStatus, StopPoint,
    Ticket, TicketRecord, TripSchedule,
};
use coach_core::refund::{Refund, RefundRecord};
use coach_core::{BookingError, CoreResult};
use coach_shared::Masked;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Booking creation
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerInfo {
    #[serde(default)]
    pub name: Option<Masked<String>>,
    #[serde(default)]
    pub email: Option<Masked<String>>,
    #[serde(default)]
    pub phone: Option<Masked<String>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SeatSelection {
    pub seat_id: i64,
    pub seat_name: String,
    pub price: i64,
}

/// Body of `create_booking`. Every field is optional on the wire so that
/// validation can report the first missing one with its own error code.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateBookingRequest {
    #[serde(default)]
    pub customer_info: CustomerInfo,
    #[serde(default)]
    pub seats: Vec<SeatSelection>,
    #[serde(default)]
    pub trip_id: Option<i64>,
    #[serde(default)]
    pub booking_session: Option<String>,
    #[serde(default)]
    pub pickup_info: Option<StopPoint>,
    #[serde(default)]
    pub dropoff_info: Option<StopPoint>,
}

/// A create request that passed validation.
#[derive(Debug, Clone)]
pub struct ValidBooking {
    pub customer: CustomerRef,
    pub seats: Vec<SeatSelection>,
    pub trip_id: i64,
    pub booking_session: String,
    pub pickup: StopPoint,
    pub dropoff: StopPoint,
}

impl ValidBooking {
    pub fn seat_ids(&self) -> Vec<i64> {
        self.seats.iter().map(|s| s.seat_id).collect()
    }

    pub fn total_price(&self) -> i64 {
        self.seats.iter().map(|s| s.price).sum()
    }

    pub fn seat_name(&self, seat_id: i64) -> String {
        self.seats
            .iter()
            .find(|s| s.seat_id == seat_id)
            .map(|s| s.seat_name.clone())
            .unwrap_or_else(|| seat_id.to_string())
    }
}

pub(crate) fn is_phone(value: &str) -> bool {
    value.len() == 10 && value.chars().all(|c| c.is_ascii_digit())
}

fn is_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn non_blank(value: &Option<Masked<String>>) -> Option<String> {
    value
        .as_ref()
        .map(|v| v.as_inner().trim().to_string())
        .filter(|v| !v.is_empty())
}

impl CreateBookingRequest {
    /// Checks the request in a fixed order and reports the first violation.
    /// `customer_id` comes from a verified token; when present the guest
    /// contact fields are not required.
    pub fn validate(self, customer_id: Option<i64>) -> CoreResult<ValidBooking> {
        let customer = match customer_id {
            Some(customer_id) => CustomerRef::Registered { customer_id },
            None => {
                let name = non_blank(&self.customer_info.name).ok_or_else(|| {
                    BookingError::validation("INVALID_CUSTOMER_NAME", "Customer name is invalid")
                        .with_suggestion("Please enter the customer's name")
                })?;
                let email = non_blank(&self.customer_info.email)
                    .filter(|e| is_email(e))
                    .ok_or_else(|| {
                        BookingError::validation(
                            "INVALID_CUSTOMER_EMAIL",
                            "Customer email is invalid",
                        )
                        .with_suggestion("Please enter a valid email address")
                    })?;
                let phone = non_blank(&self.customer_info.phone)
                    .filter(|p| is_phone(p))
                    .ok_or_else(|| {
                        BookingError::validation(
                            "INVALID_CUSTOMER_PHONE",
                            "Customer phone number is invalid",
                        )
                        .with_suggestion("Please enter a 10-digit phone number")
                    })?;
                CustomerRef::Guest(GuestContact {
                    name: Masked::new(name),
                    email: Masked::new(email),
                    phone: Masked::new(phone),
                })
            }
        };

        let mut seen = HashSet::new();
        if self.seats.is_empty() || !self.seats.iter().all(|s| seen.insert(s.seat_id)) {
            return Err(
                BookingError::validation("INVALID_SEAT_LIST", "Seat list is invalid")
                    .with_suggestion("Please choose at least one seat, each seat once"),
            );
        }

        let trip_id = self.trip_id.filter(|id| *id > 0).ok_or_else(|| {
            BookingError::validation("INVALID_TRIP_ID", "Trip id is invalid")
                .with_suggestion("Please provide the trip id")
        })?;

        let booking_session = self
            .booking_session
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                BookingError::validation("INVALID_BOOKING_SESSION", "Booking session is invalid")
                    .with_suggestion("Please provide a booking session token")
            })?;

        let (pickup, dropoff) = match (self.pickup_info, self.dropoff_info) {
            (Some(p), Some(d)) if p.is_valid() && d.is_valid() => (p, d),
            _ => {
                return Err(BookingError::validation(
                    "INVALID_PICKUP_DROPOFF_INFO",
                    "Pickup or dropoff information is invalid",
                )
                .with_suggestion("Please choose a pickup and a dropoff point"))
            }
        };

        if self.seats.iter().any(|s| s.price < 0) {
            return Err(BookingError::validation(
                "INVALID_SEAT_PRICE",
                "Seat price must not be negative",
            ));
        }

        Ok(ValidBooking {
            customer,
            seats: self.seats,
            trip_id,
            booking_session,
            pickup,
            dropoff,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingReceipt {
    pub booking_id: Uuid,
    pub booking_code: String,
    pub booking_status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub trip_id: i64,
    pub seats: Vec<TicketView>,
    pub total_price: i64,
    pub total_payment: i64,
    pub expiration_time: DateTime<Utc>,
    /// True when an earlier request with the same session produced this booking.
    pub replayed: bool,
}

impl BookingReceipt {
    pub fn from_snapshot(snapshot: &BookingSnapshot, replayed: bool) -> Self {
        let b = &snapshot.booking;
        Self {
            booking_id: b.booking_id,
            booking_code: b.booking_code.clone(),
            booking_status: b.booking_status,
            payment_status: b.payment_status,
            trip_id: b.trip_id,
            seats: snapshot.tickets.iter().map(TicketView::from).collect(),
            total_price: b.total_price,
            total_payment: b.total_payment,
            expiration_time: b.expiration_time,
            replayed,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TicketView {
    pub ticket_code: String,
    pub seat_id: i64,
    pub seat_name: String,
    pub ticket_amount: i64,
}

impl From<&Ticket> for TicketView {
    fn from(t: &Ticket) -> Self {
        Self {
            ticket_code: t.ticket_code.clone(),
            seat_id: t.seat_id,
            seat_name: t.seat_name.clone(),
            ticket_amount: t.ticket_amount,
        }
    }
}

// ============================================================================
// Cancellation, status, vouchers
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelBookingRequest {
    #[serde(default)]
    pub booking_code: Option<String>,
    #[serde(default)]
    pub seats: Vec<i64>,
    #[serde(default)]
    pub trip_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelReceipt {
    pub booking_code: String,
    pub booking_status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub released_seats: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingStatusView {
    pub booking_code: String,
    pub booking_status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub trip_id: i64,
    pub seats: Vec<TicketView>,
    pub payable_amount: i64,
    pub expiration_time: DateTime<Utc>,
    pub seconds_remaining: i64,
}

impl BookingStatusView {
    pub fn new(snapshot: &BookingSnapshot, now: DateTime<Utc>) -> Self {
        let b = &snapshot.booking;
        Self {
            booking_code: b.booking_code.clone(),
            booking_status: b.booking_status,
            payment_status: b.payment_status,
            trip_id: b.trip_id,
            seats: snapshot.tickets.iter().map(TicketView::from).collect(),
            payable_amount: b.payable_amount(),
            expiration_time: b.expiration_time,
            seconds_remaining: b.seconds_remaining(now),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplyVoucherRequest {
    #[serde(default)]
    pub voucher_code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoucherApplied {
    pub booking_code: String,
    pub voucher_code: String,
    pub discount_percentage: i32,
    pub discount_amount: i64,
    pub payable_amount: i64,
}

/// Full booking as returned by `get_booking_by_code`.
#[derive(Debug, Clone, Serialize)]
pub struct BookingView {
    pub booking: Booking,
    pub tickets: Vec<TicketView>,
    pub trip: Option<TripSchedule>,
    pub payable_amount: i64,
}

impl From<BookingSnapshot> for BookingView {
    fn from(snapshot: BookingSnapshot) -> Self {
        Self {
            payable_amount: snapshot.booking.payable_amount(),
            tickets: snapshot.tickets.iter().map(TicketView::from).collect(),
            trip: snapshot.trip,
            booking: snapshot.booking,
        }
    }
}

// ============================================================================
// Payment
// ============================================================================

/// Gateway callback as posted by the client redirect or the IPN relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentCallback {
    #[serde(rename = "vnp_Params", default)]
    pub vnp_params: Option<BTreeMap<String, String>>,
    #[serde(rename = "paymentMethod", default)]
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentConfirmation {
    pub booking_code: String,
    pub booking_status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub amount_paid: i64,
    pub transaction_ref: String,
    pub bonus_points: Option<i64>,
    pub voucher_issued: Option<String>,
}

// ============================================================================
// Tickets and refunds
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TicketDetails {
    pub ticket_code: String,
    pub seat_name: String,
    pub ticket_amount: i64,
    pub is_export_ticket: bool,
    pub booking_code: String,
    pub booking_status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub trip_id: i64,
    pub departure_time: Option<DateTime<Utc>>,
    pub arrival_time: Option<DateTime<Utc>>,
    pub pickup: StopPoint,
    pub dropoff: StopPoint,
    pub refunded: bool,
}

impl From<&TicketRecord> for TicketDetails {
    fn from(r: &TicketRecord) -> Self {
        Self {
            ticket_code: r.ticket.ticket_code.clone(),
            seat_name: r.ticket.seat_name.clone(),
            ticket_amount: r.ticket.ticket_amount,
            is_export_ticket: r.ticket.is_export_ticket,
            booking_code: r.booking.booking_code.clone(),
            booking_status: r.booking.booking_status,
            payment_status: r.booking.payment_status,
            trip_id: r.ticket.trip_id,
            departure_time: r.trip.as_ref().map(|t| t.departure_time),
            arrival_time: r.trip.as_ref().and_then(|t| t.arrival_time),
            pickup: r.booking.pickup.clone(),
            dropoff: r.booking.dropoff.clone(),
            refunded: r.refund.is_some(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefundRequest {
    #[serde(default)]
    pub ticket_code: Option<String>,
    #[serde(default)]
    pub phone: Option<Masked<String>>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundReceipt {
    pub refund_id: Uuid,
    pub refund_code: String,
    pub ticket_code: String,
    pub refund_amount: i64,
    pub refund_percentage: i32,
    pub hours_until_departure: i64,
    pub is_approved: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundView {
    pub refund: Refund,
    pub ticket_code: String,
    pub seat_name: String,
    pub booking_code: String,
}

impl From<RefundRecord> for RefundView {
    fn from(r: RefundRecord) -> Self {
        Self {
            ticket_code: r.ticket.ticket_code,
            seat_name: r.ticket.seat_name,
            booking_code: r.booking.booking_code,
            refund: r.refund,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guest_request() -> CreateBookingRequest {
        serde_json::from_value(serde_json::json!({
            "customer_info": {
                "name": "Nguyen Van A",
                "email": "a@example.com",
                "phone": "0901234567"
            },
            "seats": [
                { "seat_id": 1, "seat_name": "A01", "price": 250000 },
                { "seat_id": 2, "seat_name": "A02", "price": 250000 }
            ],
            "trip_id": 77,
            "booking_session": "sess-abc",
            "pickup_info": { "type": "office", "office_id": 3 },
            "dropoff_info": { "type": "shuttle", "point_name": "Ben xe Mien Dong" }
        }))
        .unwrap()
    }

    fn code_of(req: CreateBookingRequest, customer: Option<i64>) -> &'static str {
        req.validate(customer).unwrap_err().code()
    }

    #[test]
    fn test_valid_guest_request() {
        let valid = guest_request().validate(None).unwrap();
        assert_eq!(valid.total_price(), 500_000);
        assert_eq!(valid.seat_ids(), vec![1, 2]);
        assert!(matches!(valid.customer, CustomerRef::Guest(_)));
    }

    #[test]
    fn test_first_violation_wins() {
        let mut req = guest_request();
        req.customer_info.name = None;
        req.seats.clear();
        assert_eq!(code_of(req, None), "INVALID_CUSTOMER_NAME");

        let mut req = guest_request();
        req.customer_info.email = Some(Masked::new("not-an-email".into()));
        req.trip_id = None;
        assert_eq!(code_of(req, None), "INVALID_CUSTOMER_EMAIL");

        let mut req = guest_request();
        req.customer_info.phone = Some(Masked::new("12345".into()));
        assert_eq!(code_of(req, None), "INVALID_CUSTOMER_PHONE");
    }

    #[test]
    fn test_registered_customer_skips_contact_checks() {
        let mut req = guest_request();
        req.customer_info = CustomerInfo::default();
        let valid = req.validate(Some(42)).unwrap();
        assert_eq!(valid.customer, CustomerRef::Registered { customer_id: 42 });
    }

    #[test]
    fn test_seat_trip_session_and_stops() {
        let mut req = guest_request();
        let dup = req.seats[0].clone();
        req.seats.push(dup);
        assert_eq!(code_of(req, None), "INVALID_SEAT_LIST");

        let mut req = guest_request();
        req.trip_id = Some(0);
        assert_eq!(code_of(req, None), "INVALID_TRIP_ID");

        let mut req = guest_request();
        req.booking_session = Some("   ".into());
        assert_eq!(code_of(req, None), "INVALID_BOOKING_SESSION");

        let mut req = guest_request();
        req.dropoff_info = Some(StopPoint::Shuttle {
            point_name: String::new(),
        });
        assert_eq!(code_of(req, None), "INVALID_PICKUP_DROPOFF_INFO");

        let mut req = guest_request();
        req.seats[1].price = -1;
        assert_eq!(code_of(req, None), "INVALID_SEAT_PRICE");
    }

    #[test]
    fn test_callback_body_names() {
        let cb: PaymentCallback = serde_json::from_value(serde_json::json!({
            "vnp_Params": { "vnp_TxnRef": "BOOK1" },
            "paymentMethod": "vnpay"
        }))
        .unwrap();
        assert_eq!(cb.payment_method.as_deref(), Some("vnpay"));
        assert_eq!(cb.vnp_params.unwrap()["vnp_TxnRef"], "BOOK1");
    }
}
