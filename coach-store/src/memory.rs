//! In-process ledger and seat lock store. Used by the test suites and by
//! `store.backend = "memory"` for local runs without Postgres or Redis.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coach_core::booking::{
    Booking, BookingDetail, BookingSnapshot, ClaimConflict, CustomerAccount, Ticket,
    TicketRecord, TripSchedule, TripSeat,
};
use coach_core::clock::Clock;
use coach_core::hold::{HoldOutcome, SeatHold};
use coach_core::outbox::{OutboxMessage, Outgoing};
use coach_core::refund::{Refund, RefundFilter, RefundRecord};
use coach_core::repository::{BookingLedger, LedgerTx, SeatLockStore, StoreResult};
use coach_core::voucher::Voucher;
use coach_core::StoreError;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct LedgerState {
    bookings: HashMap<Uuid, Booking>,
    tickets: HashMap<Uuid, Ticket>,
    details: Vec<BookingDetail>,
    trip_seats: HashMap<(i64, i64), TripSeat>,
    trips: HashMap<i64, TripSchedule>,
    customers: HashMap<i64, CustomerAccount>,
    vouchers: HashMap<Uuid, Voucher>,
    voucher_customers: Vec<(Uuid, i64)>,
    refunds: HashMap<Uuid, Refund>,
    outbox: Vec<OutboxMessage>,
}

impl LedgerState {
    fn booking_where(&self, pred: impl Fn(&Booking) -> bool) -> Option<&Booking> {
        self.bookings.values().find(|b| pred(b))
    }

    fn tickets_of(&self, booking_id: Uuid) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self
            .details
            .iter()
            .filter(|d| d.booking_id == booking_id)
            .filter_map(|d| self.tickets.get(&d.ticket_id).cloned())
            .collect();
        tickets.sort_by_key(|t| t.seat_id);
        tickets
    }

    fn booking_of_ticket(&self, ticket_id: Uuid) -> StoreResult<&Booking> {
        self.details
            .iter()
            .find(|d| d.ticket_id == ticket_id)
            .and_then(|d| self.bookings.get(&d.booking_id))
            .ok_or_else(|| StoreError::Corrupt(format!("ticket {} has no booking", ticket_id)))
    }

    fn snapshot(&self, booking: &Booking) -> BookingSnapshot {
        BookingSnapshot {
            booking: booking.clone(),
            tickets: self.tickets_of(booking.booking_id),
            trip: self.trips.get(&booking.trip_id).cloned(),
        }
    }

    fn ticket_record(&self, ticket: &Ticket) -> StoreResult<TicketRecord> {
        let booking = self.booking_of_ticket(ticket.ticket_id)?.clone();
        let customer = booking
            .customer_id()
            .and_then(|id| self.customers.get(&id).cloned());
        Ok(TicketRecord {
            ticket: ticket.clone(),
            trip: self.trips.get(&ticket.trip_id).cloned(),
            refund: self
                .refunds
                .values()
                .find(|r| r.ticket_id == ticket.ticket_id)
                .cloned(),
            customer,
            booking,
        })
    }

    fn refund_record(&self, refund: &Refund) -> StoreResult<RefundRecord> {
        let ticket = self
            .tickets
            .get(&refund.ticket_id)
            .ok_or_else(|| StoreError::Corrupt(format!("refund {} has no ticket", refund.refund_id)))?;
        Ok(RefundRecord {
            refund: refund.clone(),
            ticket: ticket.clone(),
            booking: self.booking_of_ticket(ticket.ticket_id)?.clone(),
        })
    }

    fn refund_records(&self, mut refunds: Vec<&Refund>) -> StoreResult<Vec<RefundRecord>> {
        refunds.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        refunds.into_iter().map(|r| self.refund_record(r)).collect()
    }
}

// ============================================================================
// Ledger
// ============================================================================

/// Ledger kept in memory. A transaction works on a private copy of the state
/// and holds the lock until commit or drop, so transactions are serialised.
#[derive(Clone, Default)]
pub struct InMemoryBookingLedger {
    state: Arc<Mutex<LedgerState>>,
    unavailable: Arc<AtomicBool>,
    duplicate_ticket_inserts: Arc<AtomicU32>,
}

impl InMemoryBookingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `begin` and `commit` fail as if the database were down.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// The next `n` booking inserts fail with a ticket code collision.
    pub fn collide_ticket_codes(&self, n: u32) {
        self.duplicate_ticket_inserts.store(n, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("ledger offline".into()));
        }
        Ok(())
    }

    pub async fn seed_trip(&self, trip: TripSchedule) {
        self.state.lock().await.trips.insert(trip.trip_id, trip);
    }

    pub async fn seed_customer(&self, customer: CustomerAccount) {
        self.state
            .lock()
            .await
            .customers
            .insert(customer.customer_id, customer);
    }

    pub async fn seed_voucher(&self, voucher: Voucher, grantees: &[i64]) {
        let mut state = self.state.lock().await;
        for customer_id in grantees {
            state.voucher_customers.push((voucher.voucher_id, *customer_id));
        }
        state.vouchers.insert(voucher.voucher_id, voucher);
    }

    pub async fn booking(&self, booking_code: &str) -> Option<Booking> {
        let state = self.state.lock().await;
        state
            .booking_where(|b| b.booking_code == booking_code)
            .cloned()
    }

    pub async fn booking_count(&self) -> usize {
        self.state.lock().await.bookings.len()
    }

    pub async fn trip_seat(&self, trip_id: i64, seat_id: i64) -> Option<TripSeat> {
        self.state
            .lock()
            .await
            .trip_seats
            .get(&(trip_id, seat_id))
            .cloned()
    }

    pub async fn customer(&self, customer_id: i64) -> Option<CustomerAccount> {
        self.state.lock().await.customers.get(&customer_id).cloned()
    }

    pub async fn voucher(&self, code: &str) -> Option<Voucher> {
        let state = self.state.lock().await;
        state
            .vouchers
            .values()
            .find(|v| v.voucher_code == code)
            .cloned()
    }

    /// Vouchers scoped to the customer, oldest first.
    pub async fn vouchers_for(&self, customer_id: i64) -> Vec<Voucher> {
        let state = self.state.lock().await;
        let mut vouchers: Vec<Voucher> = state
            .voucher_customers
            .iter()
            .filter(|(_, c)| *c == customer_id)
            .filter_map(|(v, _)| state.vouchers.get(v).cloned())
            .collect();
        vouchers.sort_by_key(|v| v.created_at);
        vouchers
    }

    pub async fn refunds(&self) -> Vec<Refund> {
        self.state.lock().await.refunds.values().cloned().collect()
    }

    pub async fn outbox(&self) -> Vec<OutboxMessage> {
        self.state.lock().await.outbox.clone()
    }
}

pub struct InMemoryLedgerTx {
    guard: OwnedMutexGuard<LedgerState>,
    work: LedgerState,
    unavailable: Arc<AtomicBool>,
    duplicate_ticket_inserts: Arc<AtomicU32>,
}

#[async_trait]
impl BookingLedger for InMemoryBookingLedger {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>> {
        self.check_available()?;
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(InMemoryLedgerTx {
            guard,
            work,
            unavailable: self.unavailable.clone(),
            duplicate_ticket_inserts: self.duplicate_ticket_inserts.clone(),
        }))
    }

    async fn booking_by_code(&self, booking_code: &str) -> StoreResult<Option<BookingSnapshot>> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .booking_where(|b| b.booking_code == booking_code)
            .map(|b| state.snapshot(b)))
    }

    async fn booking_by_session(&self, session: &str) -> StoreResult<Option<BookingSnapshot>> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .booking_where(|b| b.booking_session == session)
            .map(|b| state.snapshot(b)))
    }

    async fn voucher_by_id(&self, voucher_id: Uuid) -> StoreResult<Option<Voucher>> {
        self.check_available()?;
        Ok(self.state.lock().await.vouchers.get(&voucher_id).cloned())
    }

    async fn ticket_by_code(&self, ticket_code: &str) -> StoreResult<Option<TicketRecord>> {
        self.check_available()?;
        let state = self.state.lock().await;
        state
            .tickets
            .values()
            .find(|t| t.ticket_code == ticket_code)
            .map(|t| state.ticket_record(t))
            .transpose()
    }

    async fn tickets_for_customer(&self, customer_id: i64) -> StoreResult<Vec<TicketRecord>> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut bookings: Vec<&Booking> = state
            .bookings
            .values()
            .filter(|b| b.customer_id() == Some(customer_id))
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut records = Vec::new();
        for booking in bookings {
            for ticket in state.tickets_of(booking.booking_id) {
                records.push(state.ticket_record(&ticket)?);
            }
        }
        Ok(records)
    }

    async fn refunds_for_customer(&self, customer_id: i64) -> StoreResult<Vec<RefundRecord>> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut owned = Vec::new();
        for refund in state.refunds.values() {
            if state.booking_of_ticket(refund.ticket_id)?.customer_id() == Some(customer_id) {
                owned.push(refund);
            }
        }
        state.refund_records(owned)
    }

    async fn list_refunds(
        &self,
        filter: RefundFilter,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<RefundRecord>> {
        self.check_available()?;
        let state = self.state.lock().await;
        let matching = state
            .refunds
            .values()
            .filter(|r| filter.matches(r, now))
            .collect();
        state.refund_records(matching)
    }

    async fn pending_outbox(&self, limit: usize) -> StoreResult<Vec<OutboxMessage>> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .outbox
            .iter()
            .filter(|m| m.dispatched_at.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_outbox_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if let Some(m) = state.outbox.iter_mut().find(|m| m.id == id) {
            m.attempts += 1;
            m.dispatched_at = Some(at);
        }
        Ok(())
    }

    async fn mark_outbox_failed(&self, id: Uuid, error: &str) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if let Some(m) = state.outbox.iter_mut().find(|m| m.id == id) {
            m.attempts += 1;
            m.last_error = Some(error.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for InMemoryLedgerTx {
    async fn booking_for_update(&mut self, booking_code: &str) -> StoreResult<Option<Booking>> {
        Ok(self
            .work
            .booking_where(|b| b.booking_code == booking_code)
            .cloned())
    }

    async fn tickets_of(&mut self, booking_id: Uuid) -> StoreResult<Vec<Ticket>> {
        Ok(self.work.tickets_of(booking_id))
    }

    async fn claim_seats(
        &mut self,
        trip_id: i64,
        seat_ids: &[i64],
        booking_id: Uuid,
        hold_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ClaimConflict>> {
        let conflicts: Vec<ClaimConflict> = seat_ids
            .iter()
            .filter_map(|seat_id| self.work.trip_seats.get(&(trip_id, *seat_id)))
            .filter(|s| !s.is_claimable(now))
            .map(|s| ClaimConflict {
                seat_id: s.seat_id,
                holder_name: s
                    .booking_id
                    .and_then(|id| self.work.bookings.get(&id))
                    .map(|b| b.customer.holder_name())
                    .unwrap_or_default(),
                hold_expires_at: s.hold_expires_at,
            })
            .collect();
        if !conflicts.is_empty() {
            return Ok(conflicts);
        }

        for seat_id in seat_ids {
            self.work.trip_seats.insert(
                (trip_id, *seat_id),
                TripSeat {
                    trip_id,
                    seat_id: *seat_id,
                    allocated: false,
                    booking_id: Some(booking_id),
                    hold_expires_at: Some(hold_until),
                },
            );
        }
        Ok(Vec::new())
    }

    async fn insert_booking(&mut self, booking: &Booking, tickets: &[Ticket]) -> StoreResult<()> {
        let pending = self.duplicate_ticket_inserts.load(Ordering::SeqCst);
        if pending > 0 {
            self.duplicate_ticket_inserts
                .store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Duplicate("tickets_ticket_code_key".into()));
        }
        if self.work.bookings.values().any(|b| {
            b.booking_code == booking.booking_code || b.booking_session == booking.booking_session
        }) {
            return Err(StoreError::Duplicate("bookings_booking_code_key".into()));
        }
        for ticket in tickets {
            if self
                .work
                .tickets
                .values()
                .any(|t| t.ticket_code == ticket.ticket_code)
            {
                return Err(StoreError::Duplicate("tickets_ticket_code_key".into()));
            }
        }

        self.work
            .bookings
            .insert(booking.booking_id, booking.clone());
        for ticket in tickets {
            self.work.tickets.insert(ticket.ticket_id, ticket.clone());
            self.work.details.push(BookingDetail {
                booking_id: booking.booking_id,
                ticket_id: ticket.ticket_id,
                price: ticket.ticket_amount,
            });
        }
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        match self.work.bookings.get_mut(&booking.booking_id) {
            Some(row) => {
                *row = booking.clone();
                Ok(())
            }
            None => Err(StoreError::Corrupt(format!(
                "booking {} vanished",
                booking.booking_code
            ))),
        }
    }

    async fn allocate_seats(&mut self, booking_id: Uuid) -> StoreResult<u64> {
        let mut allocated = 0;
        for seat in self.work.trip_seats.values_mut() {
            if seat.booking_id == Some(booking_id) {
                seat.allocated = true;
                seat.hold_expires_at = None;
                allocated += 1;
            }
        }
        Ok(allocated)
    }

    async fn release_seats(&mut self, booking_id: Uuid) -> StoreResult<()> {
        for seat in self.work.trip_seats.values_mut() {
            if seat.booking_id == Some(booking_id) {
                seat.allocated = false;
                seat.booking_id = None;
                seat.hold_expires_at = None;
            }
        }
        Ok(())
    }

    async fn release_seat(&mut self, trip_id: i64, seat_id: i64) -> StoreResult<()> {
        if let Some(seat) = self.work.trip_seats.get_mut(&(trip_id, seat_id)) {
            seat.allocated = false;
            seat.booking_id = None;
            seat.hold_expires_at = None;
        }
        Ok(())
    }

    async fn voucher_by_code(&mut self, code: &str) -> StoreResult<Option<Voucher>> {
        Ok(self
            .work
            .vouchers
            .values()
            .find(|v| v.voucher_code == code)
            .cloned())
    }

    async fn voucher_for_update(&mut self, voucher_id: Uuid) -> StoreResult<Option<Voucher>> {
        Ok(self.work.vouchers.get(&voucher_id).cloned())
    }

    async fn voucher_grantees(&mut self, voucher_id: Uuid) -> StoreResult<Vec<i64>> {
        Ok(self
            .work
            .voucher_customers
            .iter()
            .filter(|(v, _)| *v == voucher_id)
            .map(|(_, c)| *c)
            .collect())
    }

    async fn update_voucher_usage(
        &mut self,
        voucher_id: Uuid,
        usage_limit: i32,
    ) -> StoreResult<()> {
        if let Some(v) = self.work.vouchers.get_mut(&voucher_id) {
            v.usage_limit = usage_limit.max(0);
        }
        Ok(())
    }

    async fn insert_voucher(&mut self, voucher: &Voucher, grantee: Option<i64>) -> StoreResult<()> {
        if self
            .work
            .vouchers
            .values()
            .any(|v| v.voucher_code == voucher.voucher_code)
        {
            return Err(StoreError::Duplicate("vouchers_voucher_code_key".into()));
        }
        self.work
            .vouchers
            .insert(voucher.voucher_id, voucher.clone());
        if let Some(customer_id) = grantee {
            self.work
                .voucher_customers
                .push((voucher.voucher_id, customer_id));
        }
        Ok(())
    }

    async fn customer_for_update(
        &mut self,
        customer_id: i64,
    ) -> StoreResult<Option<CustomerAccount>> {
        Ok(self.work.customers.get(&customer_id).cloned())
    }

    async fn credit_points(&mut self, customer_id: i64, points: i64) -> StoreResult<i64> {
        let customer = self
            .work
            .customers
            .get_mut(&customer_id)
            .ok_or_else(|| StoreError::Corrupt(format!("customer {} missing", customer_id)))?;
        customer.bonus_points += points;
        Ok(customer.bonus_points)
    }

    async fn reset_points(&mut self, customer_id: i64) -> StoreResult<()> {
        if let Some(customer) = self.work.customers.get_mut(&customer_id) {
            customer.bonus_points = 0;
        }
        Ok(())
    }

    async fn ticket_for_update(&mut self, ticket_code: &str) -> StoreResult<Option<TicketRecord>> {
        self.work
            .tickets
            .values()
            .find(|t| t.ticket_code == ticket_code)
            .map(|t| self.work.ticket_record(t))
            .transpose()
    }

    async fn insert_refund(&mut self, refund: &Refund) -> StoreResult<()> {
        if self
            .work
            .refunds
            .values()
            .any(|r| r.ticket_id == refund.ticket_id)
        {
            return Err(StoreError::Duplicate("refunds_ticket_id_key".into()));
        }
        if self
            .work
            .refunds
            .values()
            .any(|r| r.refund_code == refund.refund_code)
        {
            return Err(StoreError::Duplicate("refunds_refund_code_key".into()));
        }
        self.work.refunds.insert(refund.refund_id, refund.clone());
        Ok(())
    }

    async fn refund_for_update(&mut self, refund_id: Uuid) -> StoreResult<Option<RefundRecord>> {
        self.work
            .refunds
            .get(&refund_id)
            .map(|r| self.work.refund_record(r))
            .transpose()
    }

    async fn update_refund(&mut self, refund: &Refund) -> StoreResult<()> {
        self.work.refunds.insert(refund.refund_id, refund.clone());
        Ok(())
    }

    async fn enqueue(&mut self, message: Outgoing, now: DateTime<Utc>) -> StoreResult<()> {
        self.work.outbox.push(OutboxMessage {
            id: Uuid::new_v4(),
            body: message,
            attempts: 0,
            last_error: None,
            created_at: now,
            dispatched_at: None,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("ledger offline at commit".into()));
        }
        let InMemoryLedgerTx {
            mut guard, work, ..
        } = *self;
        *guard = work;
        Ok(())
    }
}

// ============================================================================
// Seat lock store
// ============================================================================

/// Seat holds in a map, expired against the injected clock.
pub struct InMemorySeatLockStore {
    holds: StdMutex<HashMap<(i64, i64), (SeatHold, DateTime<Utc>)>>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
    /// `usize::MAX` means never.
    fail_after: AtomicUsize,
    granted: AtomicUsize,
}

impl InMemorySeatLockStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            holds: StdMutex::new(HashMap::new()),
            clock,
            unavailable: AtomicBool::new(false),
            fail_after: AtomicUsize::new(usize::MAX),
            granted: AtomicUsize::new(0),
        }
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// After `n` more successful holds, `try_hold` reports the store as down.
    pub fn fail_holds_after(&self, n: usize) {
        self.granted.store(0, Ordering::SeqCst);
        self.fail_after.store(n, Ordering::SeqCst);
    }

    /// Writes a hold directly, bypassing the NX check.
    pub fn force_hold(&self, trip_id: i64, seat_id: i64, hold: SeatHold, ttl: Duration) {
        let expires = self.clock.now() + ttl_delta(ttl);
        let mut holds = self.holds.lock().unwrap_or_else(|e| e.into_inner());
        holds.insert((trip_id, seat_id), (hold, expires));
    }

    /// Expiry of the stored key, which is what Redis TTL would report.
    pub fn key_expiry(&self, trip_id: i64, seat_id: i64) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        let holds = self.holds.lock().unwrap_or_else(|e| e.into_inner());
        holds
            .get(&(trip_id, seat_id))
            .filter(|(_, until)| *until > now)
            .map(|(_, until)| *until)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("seat lock store offline".into()));
        }
        Ok(())
    }
}

fn ttl_delta(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(1))
}

#[async_trait]
impl SeatLockStore for InMemorySeatLockStore {
    async fn try_hold(
        &self,
        trip_id: i64,
        seat_id: i64,
        hold: &SeatHold,
        ttl: Duration,
    ) -> StoreResult<HoldOutcome> {
        self.check_available()?;
        if self.granted.load(Ordering::SeqCst) >= self.fail_after.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("seat lock store offline".into()));
        }

        let now = self.clock.now();
        let mut holds = self.holds.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((existing, until)) = holds.get(&(trip_id, seat_id)) {
            if *until > now {
                return Ok(HoldOutcome::Conflict(existing.clone()));
            }
        }
        holds.insert((trip_id, seat_id), (hold.clone(), now + ttl_delta(ttl)));
        self.granted.fetch_add(1, Ordering::SeqCst);
        Ok(HoldOutcome::Held)
    }

    async fn release(&self, trip_id: i64, seat_id: i64) -> StoreResult<()> {
        self.check_available()?;
        let mut holds = self.holds.lock().unwrap_or_else(|e| e.into_inner());
        holds.remove(&(trip_id, seat_id));
        Ok(())
    }

    async fn peek(&self, trip_id: i64, seat_id: i64) -> StoreResult<Option<SeatHold>> {
        self.check_available()?;
        let now = self.clock.now();
        let holds = self.holds.lock().unwrap_or_else(|e| e.into_inner());
        Ok(holds
            .get(&(trip_id, seat_id))
            .filter(|(_, until)| *until > now)
            .map(|(hold, _)| hold.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_core::clock::ManualClock;

    fn hold(name: &str, now: DateTime<Utc>) -> SeatHold {
        SeatHold {
            booking_id: Uuid::new_v4(),
            holder_name: name.into(),
            expires_at: now + chrono::Duration::minutes(20),
        }
    }

    #[tokio::test]
    async fn test_try_hold_never_overwrites_live_hold() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = InMemorySeatLockStore::new(clock.clone());
        let ttl = Duration::from_secs(1200);

        let first = hold("A", clock.now());
        assert_eq!(store.try_hold(1, 5, &first, ttl).await.unwrap(), HoldOutcome::Held);
        match store.try_hold(1, 5, &hold("B", clock.now()), ttl).await.unwrap() {
            HoldOutcome::Conflict(existing) => assert_eq!(existing, first),
            other => panic!("expected conflict, got {:?}", other),
        }

        clock.advance(chrono::Duration::seconds(1200));
        assert!(store.peek(1, 5).await.unwrap().is_none());
        assert_eq!(
            store.try_hold(1, 5, &hold("B", clock.now()), ttl).await.unwrap(),
            HoldOutcome::Held
        );
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_closed() {
        let store = InMemorySeatLockStore::new(Arc::new(ManualClock::new(Utc::now())));
        store.set_unavailable(true);
        assert!(matches!(
            store.peek(1, 1).await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let ledger = InMemoryBookingLedger::new();
        let now = Utc::now();
        {
            let mut tx = ledger.begin().await.unwrap();
            let conflicts = tx
                .claim_seats(7, &[1, 2], Uuid::new_v4(), now, now)
                .await
                .unwrap();
            assert!(conflicts.is_empty());
        }
        assert!(ledger.trip_seat(7, 1).await.is_none());

        let mut tx = ledger.begin().await.unwrap();
        tx.claim_seats(7, &[1], Uuid::new_v4(), now + chrono::Duration::minutes(5), now)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert!(ledger.trip_seat(7, 1).await.is_some());
    }

    #[tokio::test]
    async fn test_claim_reports_every_taken_seat() {
        let ledger = InMemoryBookingLedger::new();
        let now = Utc::now();
        let mut tx = ledger.begin().await.unwrap();
        tx.claim_seats(7, &[1, 2], Uuid::new_v4(), now + chrono::Duration::minutes(5), now)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = ledger.begin().await.unwrap();
        let conflicts = tx
            .claim_seats(7, &[1, 2, 3], Uuid::new_v4(), now, now)
            .await
            .unwrap();
        let seats: Vec<i64> = conflicts.iter().map(|c| c.seat_id).collect();
        assert_eq!(seats, vec![1, 2]);
        assert_eq!(
            conflicts[0].hold_expires_at,
            Some(now + chrono::Duration::minutes(5))
        );
    }
}
