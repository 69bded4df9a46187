use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::booking::{
    Booking, BookingSnapshot, ClaimConflict, CustomerAccount, Ticket, TicketRecord,
};
use crate::error::StoreError;
use crate::hold::{HoldOutcome, SeatHold};
use crate::outbox::{OutboxMessage, Outgoing};
use crate::refund::{Refund, RefundFilter, RefundRecord};
use crate::voucher::Voucher;

pub type StoreResult<T> = Result<T, StoreError>;

/// Short-lived (trip, seat) mutual exclusion with per-key expiry.
#[async_trait]
pub trait SeatLockStore: Send + Sync {
    /// Writes the hold only if no unexpired hold exists for the seat.
    async fn try_hold(
        &self,
        trip_id: i64,
        seat_id: i64,
        hold: &SeatHold,
        ttl: Duration,
    ) -> StoreResult<HoldOutcome>;

    async fn release(&self, trip_id: i64, seat_id: i64) -> StoreResult<()>;

    async fn peek(&self, trip_id: i64, seat_id: i64) -> StoreResult<Option<SeatHold>>;
}

/// Durable record of bookings, tickets, seats, refunds, vouchers and the outbox.
#[async_trait]
pub trait BookingLedger: Send + Sync {
    /// Opens a unit of work. Dropping it without `commit` rolls everything back.
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>>;

    async fn booking_by_code(&self, booking_code: &str) -> StoreResult<Option<BookingSnapshot>>;

    async fn booking_by_session(&self, session: &str) -> StoreResult<Option<BookingSnapshot>>;

    async fn ticket_by_code(&self, ticket_code: &str) -> StoreResult<Option<TicketRecord>>;

    async fn voucher_by_id(&self, voucher_id: Uuid) -> StoreResult<Option<Voucher>>;

    async fn tickets_for_customer(&self, customer_id: i64) -> StoreResult<Vec<TicketRecord>>;

    async fn refunds_for_customer(&self, customer_id: i64) -> StoreResult<Vec<RefundRecord>>;

    /// Newest first.
    async fn list_refunds(
        &self,
        filter: RefundFilter,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<RefundRecord>>;

    async fn pending_outbox(&self, limit: usize) -> StoreResult<Vec<OutboxMessage>>;

    async fn mark_outbox_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    async fn mark_outbox_failed(&self, id: Uuid, error: &str) -> StoreResult<()>;
}

/// One ledger transaction. Reads taken through it lock the rows they return.
#[async_trait]
pub trait LedgerTx: Send {
    async fn booking_for_update(&mut self, booking_code: &str) -> StoreResult<Option<Booking>>;

    async fn tickets_of(&mut self, booking_id: Uuid) -> StoreResult<Vec<Ticket>>;

    /// Claims every seat for `booking_id` until `hold_until`. Returns the seats
    /// that are allocated or claimed by another unexpired booking, with that
    /// booking's holder; on a non-empty result the transaction must be abandoned.
    async fn claim_seats(
        &mut self,
        trip_id: i64,
        seat_ids: &[i64],
        booking_id: Uuid,
        hold_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ClaimConflict>>;

    /// Inserts the booking with its tickets and detail rows.
    async fn insert_booking(&mut self, booking: &Booking, tickets: &[Ticket]) -> StoreResult<()>;

    /// Persists status, payment and discount fields.
    async fn update_booking(&mut self, booking: &Booking) -> StoreResult<()>;

    /// Marks the booking's seats sold and clears their hold expiry. Returns how
    /// many seat rows still belonged to the booking.
    async fn allocate_seats(&mut self, booking_id: Uuid) -> StoreResult<u64>;

    /// Frees every seat claimed by the booking.
    async fn release_seats(&mut self, booking_id: Uuid) -> StoreResult<()>;

    async fn release_seat(&mut self, trip_id: i64, seat_id: i64) -> StoreResult<()>;

    async fn voucher_by_code(&mut self, code: &str) -> StoreResult<Option<Voucher>>;

    async fn voucher_for_update(&mut self, voucher_id: Uuid) -> StoreResult<Option<Voucher>>;

    /// Customers a voucher is scoped to; empty means public.
    async fn voucher_grantees(&mut self, voucher_id: Uuid) -> StoreResult<Vec<i64>>;

    async fn update_voucher_usage(&mut self, voucher_id: Uuid, usage_limit: i32)
        -> StoreResult<()>;

    async fn insert_voucher(&mut self, voucher: &Voucher, grantee: Option<i64>)
        -> StoreResult<()>;

    async fn customer_for_update(&mut self, customer_id: i64)
        -> StoreResult<Option<CustomerAccount>>;

    /// Adds points and returns the new balance.
    async fn credit_points(&mut self, customer_id: i64, points: i64) -> StoreResult<i64>;

    async fn reset_points(&mut self, customer_id: i64) -> StoreResult<()>;

    async fn ticket_for_update(&mut self, ticket_code: &str) -> StoreResult<Option<TicketRecord>>;

    async fn insert_refund(&mut self, refund: &Refund) -> StoreResult<()>;

    async fn refund_for_update(&mut self, refund_id: Uuid) -> StoreResult<Option<RefundRecord>>;

    async fn update_refund(&mut self, refund: &Refund) -> StoreResult<()>;

    async fn enqueue(&mut self, message: Outgoing, now: DateTime<Utc>) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
