use std::sync::Arc;

use chrono::{DateTime, Utc};
use coach_core::clock::Clock;
use coach_core::outbox::Outgoing;
use coach_core::refund::{Refund, RefundFilter};
use coach_core::repository::BookingLedger;
use coach_core::{BookingError, CoreResult, StoreError};
use coach_shared::models::events::{topics, RefundEvent};
use uuid::Uuid;

use crate::codes;
use crate::emails::{self, Contact};
use crate::models::{is_phone, RefundReceipt, RefundRequest, RefundView};

/// Refunds are refused this close to departure.
pub const MIN_HOURS_BEFORE_DEPARTURE: i64 = 12;
const DEFAULT_DESCRIPTION: &str = "Customer requested a refund";
const REFUND_METHOD: &str = "online";

/// Whole hours from `now` until `departure`, rounded down.
pub fn hours_until(departure: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (departure - now).num_seconds().div_euclid(3600)
}

/// Share of the fare returned for a refund requested `hours` before departure.
pub fn refund_percentage(hours: i64) -> Option<i32> {
    match hours {
        h if h < MIN_HOURS_BEFORE_DEPARTURE => None,
        h if h >= 48 => Some(40),
        h if h >= 24 => Some(30),
        _ => Some(20),
    }
}

/// Per-seat share of `paid`, scaled by `percentage` and rounded to the dong.
pub fn refund_amount(paid: i64, tickets: i32, percentage: i32) -> i64 {
    let numerator = paid.max(0) * i64::from(percentage);
    let denominator = i64::from(tickets.max(1)) * 100;
    (2 * numerator + denominator) / (2 * denominator)
}

pub struct RefundEngine {
    ledger: Arc<dyn BookingLedger>,
    clock: Arc<dyn Clock>,
}

impl RefundEngine {
    pub fn new(ledger: Arc<dyn BookingLedger>, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, clock }
    }

    pub async fn request_refund(&self, req: RefundRequest) -> CoreResult<RefundReceipt> {
        let ticket_code = req.ticket_code.as_deref().map(str::trim).unwrap_or_default();
        let phone = req
            .phone
            .as_ref()
            .map(|p| p.as_inner().trim())
            .unwrap_or_default();
        if ticket_code.is_empty() || phone.is_empty() {
            return Err(BookingError::validation(
                "MISSING_REFUND_INFO",
                "Ticket code and phone number are required",
            ));
        }
        if !is_phone(phone) {
            return Err(BookingError::validation(
                "INVALID_PHONE_NUMBER",
                "Phone number must be 10 digits",
            ));
        }

        let now = self.clock.now();
        let mut tx = self
            .ledger
            .begin()
            .await
            .map_err(BookingError::store("begin refund"))?;
        let record = tx
            .ticket_for_update(ticket_code)
            .await
            .map_err(BookingError::store("load ticket"))?
            .ok_or_else(|| {
                BookingError::not_found("TICKET_NOT_FOUND", format!("Ticket {} not found", ticket_code))
            })?;

        if record.refund.is_some() {
            return Err(already_refunded(ticket_code));
        }
        if !record.booking.is_paid() || !record.owned_by_phone(phone) {
            return Err(BookingError::not_found(
                "TICKET_NOT_FOUND_BY_CUSTOMER",
                "No paid ticket with this code belongs to that phone number",
            ));
        }
        let trip = record.trip.as_ref().ok_or_else(|| {
            BookingError::not_found(
                "TRIP_NOT_FOUND",
                format!("Trip {} has no schedule", record.ticket.trip_id),
            )
        })?;

        let hours = hours_until(trip.departure_time, now);
        let percentage = refund_percentage(hours).ok_or(BookingError::RefundWindowClosed {
            hours_until_departure: hours,
        })?;

        let booking = &record.booking;
        let paid = booking.payment_amount.unwrap_or_else(|| booking.payable_amount());
        let refund = Refund {
            refund_id: Uuid::new_v4(),
            refund_code: codes::refund_code(),
            ticket_id: record.ticket.ticket_id,
            refund_amount: refund_amount(paid, booking.number_of_tickets, percentage),
            refund_percentage: percentage,
            description: req
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            method: REFUND_METHOD.to_string(),
            is_approved: false,
            is_refunded: false,
            employee_id: None,
            created_at: now,
            approved_at: None,
        };

        tx.insert_refund(&refund).await.map_err(|e| match e {
            StoreError::Duplicate(ref key) if key.contains("ticket_id") => {
                already_refunded(ticket_code)
            }
            other => BookingError::store("insert refund")(other),
        })?;
        tx.release_seat(record.ticket.trip_id, record.ticket.seat_id)
            .await
            .map_err(BookingError::store("release refunded seat"))?;

        tx.enqueue(
            Outgoing::event(
                topics::REFUND_REQUESTED,
                refund.refund_code.clone(),
                &refund_event(&refund, ticket_code, now),
            ),
            now,
        )
        .await
        .map_err(BookingError::store("queue refund event"))?;
        match Contact::for_booking(booking, record.customer.as_ref()) {
            Some(contact) => tx
                .enqueue(
                    Outgoing::Email(emails::refund_requested(&contact, &refund, ticket_code)),
                    now,
                )
                .await
                .map_err(BookingError::store("queue refund notice"))?,
            None => tracing::warn!(ticket = %ticket_code, "No contact for refund notice"),
        }

        tx.commit()
            .await
            .map_err(BookingError::store("commit refund"))?;

        tracing::info!(
            refund = %refund.refund_code,
            ticket = %ticket_code,
            hours,
            percentage,
            amount = refund.refund_amount,
            "Refund requested, awaiting approval"
        );
        Ok(RefundReceipt {
            refund_id: refund.refund_id,
            refund_code: refund.refund_code,
            ticket_code: ticket_code.to_string(),
            refund_amount: refund.refund_amount,
            refund_percentage: percentage,
            hours_until_departure: hours,
            is_approved: false,
        })
    }

    /// Staff approval. One-way: a second approval is rejected.
    pub async fn approve_refund(&self, refund_id: Uuid, employee_id: i64) -> CoreResult<RefundView> {
        let now = self.clock.now();
        let mut tx = self
            .ledger
            .begin()
            .await
            .map_err(BookingError::store("begin refund approval"))?;
        let mut record = tx
            .refund_for_update(refund_id)
            .await
            .map_err(BookingError::store("load refund"))?
            .ok_or_else(|| {
                BookingError::not_found("REFUND_NOT_FOUND", format!("Refund {} not found", refund_id))
            })?;

        if !record.refund.approve(employee_id, now) {
            return Err(BookingError::conflict(
                "REFUND_ALREADY_APPROVED",
                format!("Refund {} is already approved", record.refund.refund_code),
            ));
        }
        tx.update_refund(&record.refund)
            .await
            .map_err(BookingError::store("approve refund"))?;

        let ticket_code = record.ticket.ticket_code.clone();
        tx.enqueue(
            Outgoing::event(
                topics::REFUND_APPROVED,
                record.refund.refund_code.clone(),
                &refund_event(&record.refund, &ticket_code, now),
            ),
            now,
        )
        .await
        .map_err(BookingError::store("queue refund event"))?;

        let account = match record.booking.customer_id() {
            Some(id) => tx
                .customer_for_update(id)
                .await
                .map_err(BookingError::store("load customer"))?,
            None => None,
        };
        match Contact::for_booking(&record.booking, account.as_ref()) {
            Some(contact) => tx
                .enqueue(
                    Outgoing::Email(emails::refund_approved(&contact, &record.refund, &ticket_code)),
                    now,
                )
                .await
                .map_err(BookingError::store("queue refund notice"))?,
            None => tracing::warn!(refund = %record.refund.refund_code, "No contact for approval notice"),
        }

        tx.commit()
            .await
            .map_err(BookingError::store("commit refund approval"))?;

        tracing::info!(refund = %record.refund.refund_code, employee_id, "Refund approved");
        Ok(RefundView::from(record))
    }

    pub async fn list_refunds(&self, filter: RefundFilter) -> CoreResult<Vec<RefundView>> {
        let records = self
            .ledger
            .list_refunds(filter, self.clock.now())
            .await
            .map_err(BookingError::store("list refunds"))?;
        Ok(records.into_iter().map(RefundView::from).collect())
    }
}

fn already_refunded(ticket_code: &str) -> BookingError {
    BookingError::conflict(
        "TICKET_ALREADY_REFUNDED",
        format!("Ticket {} already has a refund", ticket_code),
    )
}

fn refund_event(refund: &Refund, ticket_code: &str, now: DateTime<Utc>) -> RefundEvent {
    RefundEvent {
        refund_id: refund.refund_id,
        refund_code: refund.refund_code.clone(),
        ticket_code: ticket_code.to_string(),
        refund_amount: refund.refund_amount,
        refund_percentage: refund.refund_percentage,
        employee_id: refund.employee_id,
        timestamp: now.timestamp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pct_at(minutes_before: i64) -> Option<i32> {
        let now = Utc::now();
        refund_percentage(hours_until(now + Duration::minutes(minutes_before), now))
    }

    #[test]
    fn test_refund_percentage_table() {
        assert_eq!(pct_at(11 * 60 + 54), None);
        assert_eq!(pct_at(12 * 60), Some(20));
        assert_eq!(pct_at(23 * 60), Some(20));
        assert_eq!(pct_at(24 * 60), Some(30));
        assert_eq!(pct_at(24 * 60 + 6), Some(30));
        assert_eq!(pct_at(47 * 60), Some(30));
        assert_eq!(pct_at(48 * 60), Some(40));
        assert_eq!(pct_at(72 * 60), Some(40));
    }

    #[test]
    fn test_hours_round_down_and_past_departures_are_negative() {
        let now = Utc::now();
        assert_eq!(hours_until(now + Duration::minutes(59), now), 0);
        assert_eq!(hours_until(now - Duration::minutes(1), now), -1);
        assert_eq!(refund_percentage(-1), None);
    }

    #[test]
    fn test_refund_amount_rounds_to_the_dong() {
        assert_eq!(refund_amount(500_000, 2, 30), 75_000);
        // 100_001 * 20 / 300 = 6666.73
        assert_eq!(refund_amount(100_001, 3, 20), 6_667);
        assert_eq!(refund_amount(0, 1, 40), 0);
    }
}
