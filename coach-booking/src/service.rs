use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use coach_core::booking::{Booking, BookingSnapshot, BookingStatus, PaymentStatus, Ticket};
use coach_core::clock::Clock;
use coach_core::hold::{HoldOutcome, SeatConflict, SeatHold};
use coach_core::outbox::Outgoing;
use coach_core::repository::{BookingLedger, SeatLockStore};
use coach_core::voucher::Voucher;
use coach_core::{BookingError, CoreResult, StoreError};
use coach_shared::models::events::{topics, BookingCreatedEvent, BookingReleasedEvent};
use coach_store::app_config::BookingRules;
use uuid::Uuid;

use crate::codes;
use crate::models::{
    BookingReceipt, BookingStatusView, CancelBookingRequest, CancelReceipt, CreateBookingRequest,
    ValidBooking, VoucherApplied,
};

/// Booking creation, cancellation, status checks and voucher application.
pub struct BookingService {
    ledger: Arc<dyn BookingLedger>,
    locks: Arc<dyn SeatLockStore>,
    clock: Arc<dyn Clock>,
    rules: BookingRules,
}

/// Why a hold could not be written after the ledger commit.
enum HoldFailure {
    Taken(Vec<SeatConflict>),
    Store(StoreError),
}

impl BookingService {
    pub fn new(
        ledger: Arc<dyn BookingLedger>,
        locks: Arc<dyn SeatLockStore>,
        clock: Arc<dyn Clock>,
        rules: BookingRules,
    ) -> Self {
        Self {
            ledger,
            locks,
            clock,
            rules,
        }
    }

    fn hold_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.rules.seat_hold_seconds)
    }

    /// Creates a pending booking and holds its seats.
    ///
    /// Order of work: idempotency check, seat-hold check, ledger transaction
    /// (seat claim, booking, tickets, outbox), then the seat holds. A failure
    /// after the commit voids the booking again.
    pub async fn create_booking(
        &self,
        req: CreateBookingRequest,
        customer_id: Option<i64>,
    ) -> CoreResult<BookingReceipt> {
        let valid = req.validate(customer_id)?;
        let now = self.clock.now();

        if let Some(existing) = self
            .ledger
            .booking_by_session(&valid.booking_session)
            .await
            .map_err(BookingError::store("look up booking session"))?
        {
            return replay(existing, now);
        }

        self.ensure_unheld(&valid, now).await?;

        let snapshot = self.write_booking(&valid, now).await?;
        let booking = &snapshot.booking;

        let holder = booking.customer.holder_name();
        if let Err(failure) = self.hold_seats(&valid, booking.booking_id, &holder, now).await {
            self.void_booking(&booking.booking_code, "seat_hold_failed").await;
            return Err(match failure {
                HoldFailure::Taken(seats) => BookingError::SeatsUnavailable { seats },
                HoldFailure::Store(e) => BookingError::store("write seat holds")(e),
            });
        }

        tracing::info!(
            booking = %booking.booking_code,
            trip_id = booking.trip_id,
            seats = ?snapshot.seat_ids(),
            total = booking.total_payment,
            "Booking created"
        );
        Ok(BookingReceipt::from_snapshot(&snapshot, false))
    }

    /// Rejects the request if any seat carries a live hold, naming every such seat.
    async fn ensure_unheld(&self, valid: &ValidBooking, now: DateTime<Utc>) -> CoreResult<()> {
        let mut conflicts = Vec::new();
        for seat in &valid.seats {
            let hold = self
                .locks
                .peek(valid.trip_id, seat.seat_id)
                .await
                .map_err(BookingError::store("check seat holds"))?;
            if let Some(hold) = hold.filter(|h| h.is_live(now)) {
                conflicts.push(SeatConflict {
                    seat_id: seat.seat_id,
                    seat_name: seat.seat_name.clone(),
                    held_by: hold.holder_name,
                    expires_at: Some(hold.expires_at),
                });
            }
        }
        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(BookingError::SeatsUnavailable { seats: conflicts })
        }
    }

    /// Ledger transaction for a new booking, retried with fresh codes when a
    /// ticket code collides.
    async fn write_booking(
        &self,
        valid: &ValidBooking,
        now: DateTime<Utc>,
    ) -> CoreResult<BookingSnapshot> {
        let attempts = self.rules.ticket_code_attempts.max(1);
        let seat_ids = valid.seat_ids();
        let hold_until = now + Duration::seconds(self.rules.seat_hold_seconds as i64);

        for attempt in 1..=attempts {
            let (booking, tickets) = self.draft(valid, now);

            let mut tx = self
                .ledger
                .begin()
                .await
                .map_err(BookingError::store("begin booking"))?;

            let taken = tx
                .claim_seats(valid.trip_id, &seat_ids, booking.booking_id, hold_until, now)
                .await
                .map_err(BookingError::store("claim seats"))?;
            if !taken.is_empty() {
                // Dropping the transaction rolls the partial claim back
                drop(tx);
                let seats: Vec<SeatConflict> = taken
                    .into_iter()
                    .map(|claim| SeatConflict {
                        seat_id: claim.seat_id,
                        seat_name: valid.seat_name(claim.seat_id),
                        held_by: claim.holder_name,
                        expires_at: claim.hold_expires_at,
                    })
                    .collect();
                tracing::info!(
                    trip_id = valid.trip_id,
                    seats = ?seats.iter().map(|c| c.seat_id).collect::<Vec<_>>(),
                    "Seat claim lost"
                );
                return Err(BookingError::SeatsUnavailable { seats });
            }

            match tx.insert_booking(&booking, &tickets).await {
                Ok(()) => {}
                Err(StoreError::Duplicate(key)) if key.contains("ticket_code") => {
                    tracing::warn!(attempt, attempts, "Ticket code collision, retrying");
                    continue;
                }
                Err(StoreError::Duplicate(key)) => {
                    tracing::warn!(%key, "Booking session raced another request");
                    return Err(session_used(&valid.booking_session));
                }
                Err(e) => return Err(BookingError::store("insert booking")(e)),
            }

            let event = BookingCreatedEvent {
                booking_id: booking.booking_id,
                booking_code: booking.booking_code.clone(),
                trip_id: booking.trip_id,
                seat_ids: seat_ids.clone(),
                total_payment: booking.total_payment,
                expires_at: booking.expiration_time,
                timestamp: now.timestamp(),
            };
            tx.enqueue(
                Outgoing::event(topics::BOOKING_CREATED, booking.booking_code.clone(), &event),
                now,
            )
            .await
            .map_err(BookingError::store("queue booking event"))?;
            tx.commit()
                .await
                .map_err(BookingError::store("commit booking"))?;

            return Ok(BookingSnapshot {
                booking,
                tickets,
                trip: None,
            });
        }

        tracing::error!(attempts, "Gave up generating unique ticket codes");
        Err(BookingError::store("insert booking")(StoreError::Duplicate(
            "tickets_ticket_code_key".into(),
        )))
    }

    fn draft(&self, valid: &ValidBooking, now: DateTime<Utc>) -> (Booking, Vec<Ticket>) {
        let total = valid.total_price();
        let booking = Booking {
            booking_id: Uuid::new_v4(),
            booking_code: codes::booking_code(now),
            booking_session: valid.booking_session.clone(),
            trip_id: valid.trip_id,
            booking_status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            customer: valid.customer.clone(),
            pickup: valid.pickup.clone(),
            dropoff: valid.dropoff.clone(),
            number_of_tickets: valid.seats.len() as i32,
            total_price: total,
            total_payment: total,
            discount_amount: 0,
            voucher_id: None,
            payment_amount: None,
            payment_method: None,
            payment_transaction_id: None,
            payment_time: None,
            expiration_time: now + Duration::seconds(self.rules.expiration_seconds as i64),
            created_at: now,
            updated_at: now,
        };
        let tickets = valid
            .seats
            .iter()
            .map(|seat| Ticket {
                ticket_id: Uuid::new_v4(),
                ticket_code: codes::ticket_code(),
                trip_id: valid.trip_id,
                seat_id: seat.seat_id,
                seat_name: seat.seat_name.clone(),
                ticket_amount: seat.price,
                is_export_ticket: false,
                created_at: now,
            })
            .collect();
        (booking, tickets)
    }

    /// Writes one hold per seat. On any failure the holds already written are
    /// released before returning.
    async fn hold_seats(
        &self,
        valid: &ValidBooking,
        booking_id: Uuid,
        holder: &str,
        now: DateTime<Utc>,
    ) -> Result<(), HoldFailure> {
        let hold = SeatHold {
            booking_id,
            holder_name: holder.to_string(),
            expires_at: now + Duration::seconds(self.rules.seat_hold_seconds as i64),
        };

        let mut acquired = Vec::new();
        let mut failure = None;
        for seat in &valid.seats {
            match self
                .locks
                .try_hold(valid.trip_id, seat.seat_id, &hold, self.hold_ttl())
                .await
            {
                Ok(HoldOutcome::Held) => acquired.push(seat.seat_id),
                Ok(HoldOutcome::Conflict(existing)) => {
                    failure = Some(HoldFailure::Taken(vec![SeatConflict {
                        seat_id: seat.seat_id,
                        seat_name: seat.seat_name.clone(),
                        held_by: existing.holder_name,
                        expires_at: Some(existing.expires_at),
                    }]));
                    break;
                }
                Err(e) => {
                    failure = Some(HoldFailure::Store(e));
                    break;
                }
            }
        }

        match failure {
            None => Ok(()),
            Some(failure) => {
                release_holds(self.locks.as_ref(), valid.trip_id, &acquired).await;
                Err(failure)
            }
        }
    }

    /// Compensation: cancels a booking whose holds could not be written.
    async fn void_booking(&self, booking_code: &str, reason: &str) {
        if let Err(e) = self.release_pending(booking_code, reason).await {
            tracing::error!(
                booking = %booking_code,
                error = %e,
                "Could not void booking; its seat claim lapses at hold expiry"
            );
        } else {
            tracing::warn!(booking = %booking_code, reason, "Booking voided");
        }
    }

    /// Cancels a pending booking and frees its ledger seats in one transaction.
    /// Returns the seats that were freed.
    async fn release_pending(&self, booking_code: &str, reason: &str) -> CoreResult<Vec<i64>> {
        let now = self.clock.now();
        let mut tx = self
            .ledger
            .begin()
            .await
            .map_err(BookingError::store("begin cancellation"))?;
        let mut booking = tx
            .booking_for_update(booking_code)
            .await
            .map_err(BookingError::store("load booking"))?
            .ok_or_else(|| booking_not_found(booking_code))?;
        let seat_ids: Vec<i64> = tx
            .tickets_of(booking.booking_id)
            .await
            .map_err(BookingError::store("load tickets"))?
            .iter()
            .map(|t| t.seat_id)
            .collect();

        booking
            .cancel(now)
            .map_err(|_| booking_not_found(booking_code))?;
        tx.update_booking(&booking)
            .await
            .map_err(BookingError::store("cancel booking"))?;
        tx.release_seats(booking.booking_id)
            .await
            .map_err(BookingError::store("release seats"))?;

        let event = BookingReleasedEvent {
            booking_id: booking.booking_id,
            booking_code: booking.booking_code.clone(),
            trip_id: booking.trip_id,
            seat_ids: seat_ids.clone(),
            reason: reason.to_string(),
            timestamp: now.timestamp(),
        };
        tx.enqueue(
            Outgoing::event(topics::BOOKING_CANCELLED, booking.booking_code.clone(), &event),
            now,
        )
        .await
        .map_err(BookingError::store("queue cancellation event"))?;
        tx.commit()
            .await
            .map_err(BookingError::store("commit cancellation"))?;
        Ok(seat_ids)
    }

    pub async fn cancel_booking(&self, req: CancelBookingRequest) -> CoreResult<CancelReceipt> {
        let booking_code = req
            .booking_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        let (Some(booking_code), Some(trip_id), false) =
            (booking_code, req.trip_id, req.seats.is_empty())
        else {
            return Err(BookingError::validation(
                "MISSING_BOOKING_INFO",
                "Booking code, trip id and seats are required",
            ));
        };

        let now = self.clock.now();
        let snapshot = self
            .ledger
            .booking_by_code(booking_code)
            .await
            .map_err(BookingError::store("load booking"))?
            .filter(|s| s.booking.is_awaiting_payment(now))
            .ok_or_else(|| booking_not_found(booking_code))?;

        let owned: HashSet<i64> = snapshot.seat_ids().into_iter().collect();
        if snapshot.booking.trip_id != trip_id || !req.seats.iter().all(|s| owned.contains(s)) {
            return Err(BookingError::validation(
                "SEAT_MISMATCH",
                "Trip or seats do not belong to this booking",
            ));
        }

        let released = self.release_pending(booking_code, "cancelled").await?;
        release_holds(self.locks.as_ref(), trip_id, &released).await;

        tracing::info!(booking = %booking_code, seats = ?released, "Booking cancelled");
        Ok(CancelReceipt {
            booking_code: booking_code.to_string(),
            booking_status: BookingStatus::Cancelled,
            payment_status: PaymentStatus::Failed,
            released_seats: released,
        })
    }

    pub async fn check_booking_status(&self, session: &str) -> CoreResult<BookingStatusView> {
        let session = session.trim();
        let snapshot = if session.is_empty() {
            None
        } else {
            self.ledger
                .booking_by_session(session)
                .await
                .map_err(BookingError::store("look up booking session"))?
        };
        let snapshot = snapshot.ok_or_else(|| {
            BookingError::not_found(
                "BOOKING_SESSION_NOT_FOUND",
                "No booking exists for this session",
            )
        })?;
        Ok(BookingStatusView::new(&snapshot, self.clock.now()))
    }

    /// Attaches a voucher discount to a pending booking. The voucher's usage
    /// limit is consumed only when the payment is confirmed.
    pub async fn apply_voucher(
        &self,
        booking_code: &str,
        voucher_code: &str,
    ) -> CoreResult<VoucherApplied> {
        let voucher_code = voucher_code.trim();
        if voucher_code.is_empty() {
            return Err(BookingError::validation(
                "MISSING_VOUCHER_CODE",
                "Voucher code is required",
            ));
        }

        let now = self.clock.now();
        let mut tx = self
            .ledger
            .begin()
            .await
            .map_err(BookingError::store("begin voucher"))?;
        let mut booking = tx
            .booking_for_update(booking_code)
            .await
            .map_err(BookingError::store("load booking"))?
            .filter(|b| b.is_awaiting_payment(now))
            .ok_or_else(|| booking_not_found(booking_code))?;
        let voucher = tx
            .voucher_by_code(voucher_code)
            .await
            .map_err(BookingError::store("load voucher"))?
            .ok_or_else(|| {
                BookingError::not_found(
                    "VOUCHER_NOT_FOUND",
                    format!("Voucher {} does not exist", voucher_code),
                )
            })?;

        ensure_redeemable(&voucher, now)?;
        if booking.total_payment < voucher.min_order_amount {
            return Err(BookingError::validation(
                "VOUCHER_MIN_AMOUNT",
                format!(
                    "Order must be at least {} VND to use this voucher",
                    voucher.min_order_amount
                ),
            ));
        }
        let grantees = tx
            .voucher_grantees(voucher.voucher_id)
            .await
            .map_err(BookingError::store("load voucher grantees"))?;
        if !grantees.is_empty()
            && !booking
                .customer_id()
                .is_some_and(|id| grantees.contains(&id))
        {
            return Err(BookingError::validation(
                "VOUCHER_NOT_ELIGIBLE",
                "Voucher belongs to another customer",
            ));
        }

        booking.apply_discount(
            voucher.voucher_id,
            voucher.discount_for(booking.total_payment),
            now,
        );
        tx.update_booking(&booking)
            .await
            .map_err(BookingError::store("apply voucher"))?;
        tx.commit()
            .await
            .map_err(BookingError::store("commit voucher"))?;

        tracing::info!(
            booking = %booking.booking_code,
            voucher = %voucher.voucher_code,
            discount = booking.discount_amount,
            "Voucher applied"
        );
        Ok(VoucherApplied {
            booking_code: booking.booking_code.clone(),
            voucher_code: voucher.voucher_code,
            discount_percentage: voucher.discount_percentage,
            discount_amount: booking.discount_amount,
            payable_amount: booking.payable_amount(),
        })
    }
}

fn replay(existing: BookingSnapshot, now: DateTime<Utc>) -> CoreResult<BookingReceipt> {
    if existing.booking.is_awaiting_payment(now) {
        tracing::info!(booking = %existing.booking.booking_code, "Replaying booking for session");
        Ok(BookingReceipt::from_snapshot(&existing, true))
    } else {
        Err(session_used(&existing.booking.booking_session))
    }
}

fn session_used(session: &str) -> BookingError {
    BookingError::conflict(
        "BOOKING_SESSION_USED",
        format!("Booking session {} was already used", session),
    )
}

/// Uses left and inside the validity window.
pub(crate) fn ensure_redeemable(voucher: &Voucher, now: DateTime<Utc>) -> CoreResult<()> {
    if !voucher.has_uses_left() {
        return Err(voucher_exhausted());
    }
    if voucher.not_yet_valid(now) {
        return Err(BookingError::validation(
            "VOUCHER_NOT_YET_VALID",
            "Voucher is not valid yet",
        ));
    }
    if voucher.is_expired(now) {
        return Err(BookingError::validation("VOUCHER_EXPIRED", "Voucher has expired"));
    }
    Ok(())
}

pub(crate) fn voucher_exhausted() -> BookingError {
    BookingError::validation("VOUCHER_EXHAUSTED", "Voucher has no uses left")
}

pub(crate) fn booking_not_found(booking_code: &str) -> BookingError {
    BookingError::not_found(
        "BOOKING_NOT_FOUND",
        format!("No payable booking with code {}", booking_code),
    )
}

/// Best-effort hold removal. Holds expire on their own if this fails.
pub(crate) async fn release_holds(locks: &dyn SeatLockStore, trip_id: i64, seat_ids: &[i64]) {
    for seat_id in seat_ids {
        if let Err(e) = locks.release(trip_id, *seat_id).await {
            tracing::warn!(trip_id, seat_id, error = %e, "Failed to release seat hold");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_core::clock::ManualClock;
    use coach_store::memory::{InMemoryBookingLedger, InMemorySeatLockStore};

    use crate::models::{CustomerInfo, SeatSelection};
    use coach_core::booking::StopPoint;
    use coach_shared::Masked;

    struct Fixture {
        ledger: Arc<InMemoryBookingLedger>,
        locks: Arc<InMemorySeatLockStore>,
        clock: Arc<ManualClock>,
        service: BookingService,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(InMemoryBookingLedger::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let locks = Arc::new(InMemorySeatLockStore::new(clock.clone()));
        let service = BookingService::new(
            ledger.clone(),
            locks.clone(),
            clock.clone(),
            BookingRules::default(),
        );
        Fixture {
            ledger,
            locks,
            clock,
            service,
        }
    }

    fn request(session: &str, seats: &[i64]) -> CreateBookingRequest {
        CreateBookingRequest {
            customer_info: CustomerInfo {
                name: Some(Masked::new("Pham Thi D".into())),
                email: Some(Masked::new("d@example.com".into())),
                phone: Some(Masked::new("0912345678".into())),
            },
            seats: seats
                .iter()
                .map(|id| SeatSelection {
                    seat_id: *id,
                    seat_name: format!("B{:02}", id),
                    price: 200_000,
                })
                .collect(),
            trip_id: Some(5),
            booking_session: Some(session.into()),
            pickup_info: Some(StopPoint::Office { office_id: 1 }),
            dropoff_info: Some(StopPoint::Office { office_id: 2 }),
        }
    }

    #[tokio::test]
    async fn test_session_replay_returns_same_booking() {
        let f = fixture();
        let first = f.service.create_booking(request("s1", &[1]), None).await.unwrap();
        let again = f.service.create_booking(request("s1", &[1]), None).await.unwrap();
        assert!(again.replayed);
        assert_eq!(again.booking_code, first.booking_code);
        assert_eq!(f.ledger.booking_count().await, 1);
    }

    #[tokio::test]
    async fn test_expired_session_is_used() {
        let f = fixture();
        f.service.create_booking(request("s1", &[1]), None).await.unwrap();
        f.clock.advance(Duration::minutes(16));
        let err = f
            .service
            .create_booking(request("s1", &[1]), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BOOKING_SESSION_USED");
    }

    #[tokio::test]
    async fn test_ticket_code_collision_retries() {
        let f = fixture();
        f.ledger.collide_ticket_codes(2);
        let receipt = f.service.create_booking(request("s1", &[1, 2]), None).await.unwrap();
        assert_eq!(receipt.seats.len(), 2);
        assert_eq!(f.ledger.booking_count().await, 1);
    }

    #[tokio::test]
    async fn test_collisions_exhaust_attempts() {
        let f = fixture();
        f.ledger.collide_ticket_codes(10);
        let err = f
            .service
            .create_booking(request("s1", &[1]), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
        assert_eq!(f.ledger.booking_count().await, 0);
        assert!(f.ledger.trip_seat(5, 1).await.is_none());
    }

    #[tokio::test]
    async fn test_hold_failure_voids_booking() {
        let f = fixture();
        f.locks.fail_holds_after(1);
        let err = f
            .service
            .create_booking(request("s1", &[1, 2]), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STORE_UNAVAILABLE");

        // Acquired hold released, ledger row voided, seats free again
        f.locks.fail_holds_after(usize::MAX);
        assert!(f.locks.key_expiry(5, 1).is_none());
        let seat = f.ledger.trip_seat(5, 1).await.unwrap();
        assert!(seat.booking_id.is_none());
        assert_eq!(f.ledger.booking_count().await, 1);
        let outbox = f.ledger.outbox().await;
        assert!(outbox.iter().any(|m| matches!(
            &m.body,
            Outgoing::Event { topic, .. } if topic == topics::BOOKING_CANCELLED
        )));
    }

    #[tokio::test]
    async fn test_ledger_claim_names_holder_and_expiry() {
        let f = fixture();
        f.service.create_booking(request("s1", &[1]), None).await.unwrap();
        // Only the ledger claim is left to stop the second buyer
        f.locks.release(5, 1).await.unwrap();

        let mut second = request("s2", &[1, 2]);
        second.customer_info.name = Some(Masked::new("Dang Van E".into()));
        let err = f.service.create_booking(second, None).await.unwrap_err();
        assert_eq!(err.code(), "UNAVAILABLE_SEATS");
        let conflicts = err.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].seat_id, 1);
        assert_eq!(conflicts[0].seat_name, "B01");
        assert_eq!(conflicts[0].held_by, "Pham Thi D");
        assert_eq!(
            conflicts[0].expires_at,
            Some(f.clock.now() + Duration::seconds(1200))
        );
        assert_eq!(f.ledger.booking_count().await, 1);
        assert!(f.ledger.trip_seat(5, 2).await.is_none());
    }

    #[tokio::test]
    async fn test_lock_store_down_fails_closed() {
        let f = fixture();
        f.locks.set_unavailable(true);
        let err = f
            .service
            .create_booking(request("s1", &[1]), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
        assert_eq!(f.ledger.booking_count().await, 0);
    }

    #[tokio::test]
    async fn test_status_view_counts_down() {
        let f = fixture();
        f.service.create_booking(request("s1", &[1]), None).await.unwrap();
        f.clock.advance(Duration::minutes(5));
        let view = f.service.check_booking_status("s1").await.unwrap();
        assert_eq!(view.seconds_remaining, 600);
        assert_eq!(view.booking_status, BookingStatus::Pending);

        let err = f.service.check_booking_status("nope").await.unwrap_err();
        assert_eq!(err.code(), "BOOKING_SESSION_NOT_FOUND");
    }
}
