//! Read-only queries over the ledger.

use std::sync::Arc;

use coach_core::repository::BookingLedger;
use coach_core::{BookingError, CoreResult};

use crate::models::{is_phone, BookingView, RefundView, TicketDetails};

pub struct BookingLookups {
    ledger: Arc<dyn BookingLedger>,
}

impl BookingLookups {
    pub fn new(ledger: Arc<dyn BookingLedger>) -> Self {
        Self { ledger }
    }

    /// Any booking by code, whatever its status.
    pub async fn get_booking_by_code(&self, booking_code: &str) -> CoreResult<BookingView> {
        let booking_code = booking_code.trim();
        if booking_code.is_empty() {
            return Err(BookingError::validation(
                "MISSING_BOOKING_CODE",
                "Booking code is required",
            ));
        }
        self.ledger
            .booking_by_code(booking_code)
            .await
            .map_err(BookingError::store("load booking"))?
            .map(BookingView::from)
            .ok_or_else(|| {
                BookingError::not_found(
                    "BOOKING_NOT_FOUND",
                    format!("Booking {} not found", booking_code),
                )
            })
    }

    /// A paid, unrefunded ticket owned by `phone`.
    pub async fn search_ticket(&self, ticket_code: &str, phone: &str) -> CoreResult<TicketDetails> {
        let (ticket_code, phone) = (ticket_code.trim(), phone.trim());
        if ticket_code.is_empty() || phone.is_empty() {
            return Err(BookingError::validation(
                "MISSING_SEARCH_TICKET_INFO",
                "Ticket code and phone number are required",
            ));
        }
        if !is_phone(phone) {
            return Err(BookingError::validation(
                "INVALID_PHONE_NUMBER",
                "Phone number must be 10 digits",
            ));
        }

        self.ledger
            .ticket_by_code(ticket_code)
            .await
            .map_err(BookingError::store("load ticket"))?
            .filter(|r| r.booking.is_paid() && r.refund.is_none() && r.owned_by_phone(phone))
            .map(|r| TicketDetails::from(&r))
            .ok_or_else(|| {
                BookingError::not_found(
                    "TICKET_NOT_FOUND",
                    format!("No active ticket {} for this phone number", ticket_code),
                )
            })
    }

    /// Tickets of a registered customer, newest booking first, refunded ones left out.
    pub async fn list_customer_tickets(&self, customer_id: i64) -> CoreResult<Vec<TicketDetails>> {
        let records = self
            .ledger
            .tickets_for_customer(customer_id)
            .await
            .map_err(BookingError::store("list customer tickets"))?;
        Ok(records
            .iter()
            .filter(|r| r.refund.is_none())
            .map(TicketDetails::from)
            .collect())
    }

    pub async fn list_customer_refunds(&self, customer_id: i64) -> CoreResult<Vec<RefundView>> {
        let records = self
            .ledger
            .refunds_for_customer(customer_id)
            .await
            .map_err(BookingError::store("list customer refunds"))?;
        Ok(records.into_iter().map(RefundView::from).collect())
    }
}
