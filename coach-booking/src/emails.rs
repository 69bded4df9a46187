//! Templated e-mails queued through the outbox. Delivery is somebody else's job.

use coach_core::booking::{Booking, CustomerAccount, CustomerRef, Ticket, TripSchedule};
use coach_core::notify::Notification;
use coach_core::refund::Refund;
use coach_core::voucher::Voucher;
use serde_json::json;

pub const PAYMENT_SUCCESS: &str = "payment_success";
pub const VOUCHER_ISSUED: &str = "voucher_issued";
pub const REFUND_REQUESTED: &str = "refund_requested";
pub const REFUND_APPROVED: &str = "refund_approved";

/// Where a booking's e-mails go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub name: String,
    pub email: String,
}

impl Contact {
    /// Guest contact from the booking, or the registered account if loaded.
    pub fn for_booking(booking: &Booking, account: Option<&CustomerAccount>) -> Option<Self> {
        let contact = match (&booking.customer, account) {
            (CustomerRef::Guest(guest), _) => Contact {
                name: guest.name.as_inner().clone(),
                email: guest.email.as_inner().clone(),
            },
            (CustomerRef::Registered { .. }, Some(account)) => Contact::from(account),
            (CustomerRef::Registered { .. }, None) => return None,
        };
        (!contact.email.is_empty()).then_some(contact)
    }
}

impl From<&CustomerAccount> for Contact {
    fn from(account: &CustomerAccount) -> Self {
        Self {
            name: account.full_name.clone(),
            email: account.email.clone(),
        }
    }
}

pub fn payment_success(
    contact: &Contact,
    booking: &Booking,
    tickets: &[Ticket],
    trip: Option<&TripSchedule>,
) -> Notification {
    let seats: Vec<_> = tickets
        .iter()
        .map(|t| json!({ "ticket_code": t.ticket_code, "seat_name": t.seat_name, "price": t.ticket_amount }))
        .collect();
    Notification {
        template: PAYMENT_SUCCESS.to_string(),
        to: contact.email.clone(),
        subject: format!("Payment received for booking {}", booking.booking_code),
        context: json!({
            "name": contact.name,
            "booking_code": booking.booking_code,
            "amount_paid": booking.payment_amount,
            "transaction_ref": booking.payment_transaction_id,
            "departure_time": trip.map(|t| t.departure_time),
            "seats": seats,
        }),
    }
}

pub fn voucher_issued(contact: &Contact, voucher: &Voucher) -> Notification {
    Notification {
        template: VOUCHER_ISSUED.to_string(),
        to: contact.email.clone(),
        subject: format!("You received a {}% voucher", voucher.discount_percentage),
        context: json!({
            "name": contact.name,
            "voucher_code": voucher.voucher_code,
            "discount_percentage": voucher.discount_percentage,
            "valid_to": voucher.valid_to,
        }),
    }
}

pub fn refund_requested(contact: &Contact, refund: &Refund, ticket_code: &str) -> Notification {
    Notification {
        template: REFUND_REQUESTED.to_string(),
        to: contact.email.clone(),
        subject: format!("Refund request {} received", refund.refund_code),
        context: json!({
            "name": contact.name,
            "refund_code": refund.refund_code,
            "ticket_code": ticket_code,
            "refund_amount": refund.refund_amount,
            "refund_percentage": refund.refund_percentage,
        }),
    }
}

pub fn refund_approved(contact: &Contact, refund: &Refund, ticket_code: &str) -> Notification {
    Notification {
        template: REFUND_APPROVED.to_string(),
        to: contact.email.clone(),
        subject: format!("Refund {} approved", refund.refund_code),
        context: json!({
            "name": contact.name,
            "refund_code": refund.refund_code,
            "ticket_code": ticket_code,
            "refund_amount": refund.refund_amount,
            "approved_at": refund.approved_at,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use coach_core::booking::{BookingStatus, GuestContact, PaymentStatus, StopPoint};
    use coach_shared::Masked;
    use uuid::Uuid;

    fn booking(customer: CustomerRef) -> Booking {
        let now = Utc::now();
        Booking {
            booking_id: Uuid::new_v4(),
            booking_code: "BOOK1".into(),
            booking_session: "s".into(),
            trip_id: 1,
            booking_status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Completed,
            customer,
            pickup: StopPoint::Office { office_id: 1 },
            dropoff: StopPoint::Office { office_id: 2 },
            number_of_tickets: 1,
            total_price: 100,
            total_payment: 100,
            discount_amount: 0,
            voucher_id: None,
            payment_amount: Some(100),
            payment_method: Some("vnpay".into()),
            payment_transaction_id: Some("T1".into()),
            payment_time: Some(now),
            expiration_time: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_contact_resolution() {
        let guest = booking(CustomerRef::Guest(GuestContact {
            name: Masked::new("Guest".into()),
            email: Masked::new("guest@example.com".into()),
            phone: Masked::new("0901234567".into()),
        }));
        assert_eq!(
            Contact::for_booking(&guest, None).unwrap().email,
            "guest@example.com"
        );

        let registered = booking(CustomerRef::Registered { customer_id: 9 });
        assert!(Contact::for_booking(&registered, None).is_none());

        let account = CustomerAccount {
            customer_id: 9,
            full_name: "Tran B".into(),
            email: String::new(),
            phone: "0900000000".into(),
            bonus_points: 0,
        };
        // No address on file
        assert!(Contact::for_booking(&registered, Some(&account)).is_none());
    }

    #[test]
    fn test_payment_success_context() {
        let b = booking(CustomerRef::Registered { customer_id: 9 });
        let contact = Contact {
            name: "Tran B".into(),
            email: "b@example.com".into(),
        };
        let n = payment_success(&contact, &b, &[], None);
        assert_eq!(n.template, PAYMENT_SUCCESS);
        assert_eq!(n.context["amount_paid"], 100);
        assert_eq!(n.context["transaction_ref"], "T1");
    }
}
