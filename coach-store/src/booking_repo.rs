use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use coach_core::booking::{
    registered_holder, Booking, BookingSnapshot, BookingStatus, ClaimConflict, CustomerAccount,
    CustomerRef, GuestContact, PaymentStatus, StopPoint, Ticket, TicketRecord, TripSchedule,
};
use coach_core::outbox::{OutboxMessage, Outgoing};
use coach_core::refund::{Refund, RefundFilter, RefundRecord};
use coach_core::repository::{BookingLedger, LedgerTx, StoreResult};
use coach_core::voucher::Voucher;
use coach_core::StoreError;
use coach_shared::Masked;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Postgres implementation of the booking ledger.
#[derive(Clone)]
pub struct PgBookingLedger {
    pool: PgPool,
}

impl PgBookingLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> StoreResult<sqlx::pool::PoolConnection<Postgres>> {
        self.pool.acquire().await.map_err(db_err)
    }
}

pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

fn db_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Duplicate(db.constraint().unwrap_or("unique").to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(e.to_string())
        }
        _ => StoreError::Unavailable(e.to_string()),
    }
}

fn json_err(e: serde_json::Error) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

// ============================================================================
// Rows
// ============================================================================

const BOOKING_COLUMNS: &str = "booking_id, booking_code, booking_session, trip_id, \
    booking_status, payment_status, customer_id, guest_name, guest_email, guest_phone, \
    pickup, dropoff, number_of_tickets, total_price, total_payment, discount_amount, \
    voucher_id, payment_amount, payment_method, payment_transaction_id, payment_time, \
    expiration_time, created_at, updated_at";

const TICKET_COLUMNS: &str = "t.ticket_id, t.ticket_code, t.trip_id, t.seat_id, t.seat_name, \
    t.ticket_amount, t.is_export_ticket, t.created_at";

const VOUCHER_COLUMNS: &str = "voucher_id, voucher_code, discount_percentage, min_order_amount, \
    usage_limit, valid_from, valid_to, created_at";

const REFUND_COLUMNS: &str = "refund_id, refund_code, ticket_id, refund_amount, \
    refund_percentage, description, method, is_approved, is_refunded, employee_id, \
    created_at, approved_at";

#[derive(sqlx::FromRow)]
struct BookingRow {
    booking_id: Uuid,
    booking_code: String,
    booking_session: String,
    trip_id: i64,
    booking_status: String,
    payment_status: String,
    customer_id: Option<i64>,
    guest_name: Option<String>,
    guest_email: Option<String>,
    guest_phone: Option<String>,
    pickup: serde_json::Value,
    dropoff: serde_json::Value,
    number_of_tickets: i32,
    total_price: i64,
    total_payment: i64,
    discount_amount: i64,
    voucher_id: Option<Uuid>,
    payment_amount: Option<i64>,
    payment_method: Option<String>,
    payment_transaction_id: Option<String>,
    payment_time: Option<DateTime<Utc>>,
    expiration_time: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let booking_status = BookingStatus::parse(&row.booking_status).ok_or_else(|| {
            StoreError::Corrupt(format!("booking_status '{}'", row.booking_status))
        })?;
        let payment_status = PaymentStatus::parse(&row.payment_status).ok_or_else(|| {
            StoreError::Corrupt(format!("payment_status '{}'", row.payment_status))
        })?;
        let customer = match (row.customer_id, row.guest_name) {
            (Some(customer_id), _) => CustomerRef::Registered { customer_id },
            (None, Some(name)) => CustomerRef::Guest(GuestContact {
                name: Masked(name),
                email: Masked(row.guest_email.unwrap_or_default()),
                phone: Masked(row.guest_phone.unwrap_or_default()),
            }),
            (None, None) => {
                return Err(StoreError::Corrupt(format!(
                    "booking {} has no customer",
                    row.booking_code
                )))
            }
        };
        let pickup: StopPoint = serde_json::from_value(row.pickup).map_err(json_err)?;
        let dropoff: StopPoint = serde_json::from_value(row.dropoff).map_err(json_err)?;

        Ok(Booking {
            booking_id: row.booking_id,
            booking_code: row.booking_code,
            booking_session: row.booking_session,
            trip_id: row.trip_id,
            booking_status,
            payment_status,
            customer,
            pickup,
            dropoff,
            number_of_tickets: row.number_of_tickets,
            total_price: row.total_price,
            total_payment: row.total_payment,
            discount_amount: row.discount_amount,
            voucher_id: row.voucher_id,
            payment_amount: row.payment_amount,
            payment_method: row.payment_method,
            payment_transaction_id: row.payment_transaction_id,
            payment_time: row.payment_time,
            expiration_time: row.expiration_time,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    ticket_id: Uuid,
    ticket_code: String,
    trip_id: i64,
    seat_id: i64,
    seat_name: String,
    ticket_amount: i64,
    is_export_ticket: bool,
    created_at: DateTime<Utc>,
}

impl From<TicketRow> for Ticket {
    fn from(row: TicketRow) -> Self {
        Ticket {
            ticket_id: row.ticket_id,
            ticket_code: row.ticket_code,
            trip_id: row.trip_id,
            seat_id: row.seat_id,
            seat_name: row.seat_name,
            ticket_amount: row.ticket_amount,
            is_export_ticket: row.is_export_ticket,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct VoucherRow {
    voucher_id: Uuid,
    voucher_code: String,
    discount_percentage: i32,
    min_order_amount: i64,
    usage_limit: i32,
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<VoucherRow> for Voucher {
    fn from(row: VoucherRow) -> Self {
        Voucher {
            voucher_id: row.voucher_id,
            voucher_code: row.voucher_code,
            discount_percentage: row.discount_percentage,
            min_order_amount: row.min_order_amount,
            usage_limit: row.usage_limit,
            valid_from: row.valid_from,
            valid_to: row.valid_to,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RefundRow {
    refund_id: Uuid,
    refund_code: String,
    ticket_id: Uuid,
    refund_amount: i64,
    refund_percentage: i32,
    description: String,
    method: String,
    is_approved: bool,
    is_refunded: bool,
    employee_id: Option<i64>,
    created_at: DateTime<Utc>,
    approved_at: Option<DateTime<Utc>>,
}

impl From<RefundRow> for Refund {
    fn from(row: RefundRow) -> Self {
        Refund {
            refund_id: row.refund_id,
            refund_code: row.refund_code,
            ticket_id: row.ticket_id,
            refund_amount: row.refund_amount,
            refund_percentage: row.refund_percentage,
            description: row.description,
            method: row.method,
            is_approved: row.is_approved,
            is_refunded: row.is_refunded,
            employee_id: row.employee_id,
            created_at: row.created_at,
            approved_at: row.approved_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CustomerRow {
    customer_id: i64,
    full_name: String,
    email: String,
    phone: String,
    bonus_points: i64,
}

impl From<CustomerRow> for CustomerAccount {
    fn from(row: CustomerRow) -> Self {
        CustomerAccount {
            customer_id: row.customer_id,
            full_name: row.full_name,
            email: row.email,
            phone: row.phone,
            bonus_points: row.bonus_points,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TripRow {
    trip_id: i64,
    departure_time: DateTime<Utc>,
    arrival_time: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct ClaimConflictRow {
    seat_id: i64,
    hold_expires_at: Option<DateTime<Utc>>,
    customer_id: Option<i64>,
    guest_name: Option<String>,
}

impl From<ClaimConflictRow> for ClaimConflict {
    fn from(row: ClaimConflictRow) -> Self {
        let holder_name = match (row.customer_id, row.guest_name) {
            (Some(customer_id), _) => registered_holder(customer_id),
            (None, Some(name)) => name,
            (None, None) => String::new(),
        };
        ClaimConflict {
            seat_id: row.seat_id,
            holder_name,
            hold_expires_at: row.hold_expires_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    body: serde_json::Value,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    dispatched_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Shared queries (pool connection or transaction)
// ============================================================================

async fn fetch_booking(
    conn: &mut PgConnection,
    filter: &str,
    value: &str,
    for_update: bool,
) -> StoreResult<Option<Booking>> {
    let sql = format!(
        "SELECT {} FROM bookings WHERE {} = $1{}",
        BOOKING_COLUMNS,
        filter,
        if for_update { " FOR UPDATE" } else { "" }
    );
    let row = sqlx::query_as::<_, BookingRow>(&sql)
        .bind(value)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
    row.map(Booking::try_from).transpose()
}

async fn fetch_booking_by_id(conn: &mut PgConnection, booking_id: Uuid) -> StoreResult<Booking> {
    let sql = format!("SELECT {} FROM bookings WHERE booking_id = $1", BOOKING_COLUMNS);
    let row = sqlx::query_as::<_, BookingRow>(&sql)
        .bind(booking_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_err)?;
    Booking::try_from(row)
}

async fn fetch_tickets(conn: &mut PgConnection, booking_id: Uuid) -> StoreResult<Vec<Ticket>> {
    let sql = format!(
        "SELECT {} FROM tickets t \
         JOIN booking_details d ON d.ticket_id = t.ticket_id \
         WHERE d.booking_id = $1 ORDER BY t.seat_id",
        TICKET_COLUMNS
    );
    let rows = sqlx::query_as::<_, TicketRow>(&sql)
        .bind(booking_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(rows.into_iter().map(Ticket::from).collect())
}

async fn fetch_trip(conn: &mut PgConnection, trip_id: i64) -> StoreResult<Option<TripSchedule>> {
    let row = sqlx::query_as::<_, TripRow>(
        "SELECT trip_id, departure_time, arrival_time FROM trips WHERE trip_id = $1",
    )
    .bind(trip_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(row.map(|r| TripSchedule {
        trip_id: r.trip_id,
        departure_time: r.departure_time,
        arrival_time: r.arrival_time,
    }))
}

async fn fetch_customer(
    conn: &mut PgConnection,
    customer_id: i64,
    for_update: bool,
) -> StoreResult<Option<CustomerAccount>> {
    let sql = format!(
        "SELECT customer_id, full_name, email, phone, bonus_points FROM customers \
         WHERE customer_id = $1{}",
        if for_update { " FOR UPDATE" } else { "" }
    );
    let row = sqlx::query_as::<_, CustomerRow>(&sql)
        .bind(customer_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(row.map(CustomerAccount::from))
}

async fn fetch_refund_for_ticket(
    conn: &mut PgConnection,
    ticket_id: Uuid,
) -> StoreResult<Option<Refund>> {
    let sql = format!("SELECT {} FROM refunds WHERE ticket_id = $1", REFUND_COLUMNS);
    let row = sqlx::query_as::<_, RefundRow>(&sql)
        .bind(ticket_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(row.map(Refund::from))
}

async fn fetch_snapshot(
    conn: &mut PgConnection,
    booking: Option<Booking>,
) -> StoreResult<Option<BookingSnapshot>> {
    let Some(booking) = booking else {
        return Ok(None);
    };
    let tickets = fetch_tickets(conn, booking.booking_id).await?;
    let trip = fetch_trip(conn, booking.trip_id).await?;
    Ok(Some(BookingSnapshot {
        booking,
        tickets,
        trip,
    }))
}

async fn ticket_owner(conn: &mut PgConnection, ticket_id: Uuid) -> StoreResult<Uuid> {
    sqlx::query_scalar::<_, Uuid>("SELECT booking_id FROM booking_details WHERE ticket_id = $1")
        .bind(ticket_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_err)
}

async fn build_ticket_record(conn: &mut PgConnection, ticket: Ticket) -> StoreResult<TicketRecord> {
    let booking_id = ticket_owner(conn, ticket.ticket_id).await?;
    let booking = fetch_booking_by_id(conn, booking_id).await?;
    let trip = fetch_trip(conn, ticket.trip_id).await?;
    let customer = match booking.customer_id() {
        Some(id) => fetch_customer(conn, id, false).await?,
        None => None,
    };
    let refund = fetch_refund_for_ticket(conn, ticket.ticket_id).await?;
    Ok(TicketRecord {
        ticket,
        booking,
        trip,
        customer,
        refund,
    })
}

async fn fetch_ticket_record(
    conn: &mut PgConnection,
    ticket_code: &str,
    for_update: bool,
) -> StoreResult<Option<TicketRecord>> {
    let sql = format!(
        "SELECT {} FROM tickets t WHERE t.ticket_code = $1{}",
        TICKET_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    let row = sqlx::query_as::<_, TicketRow>(&sql)
        .bind(ticket_code)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
    match row {
        Some(row) => Ok(Some(build_ticket_record(conn, Ticket::from(row)).await?)),
        None => Ok(None),
    }
}

async fn build_refund_records(
    conn: &mut PgConnection,
    rows: Vec<RefundRow>,
) -> StoreResult<Vec<RefundRecord>> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let refund = Refund::from(row);
        let sql = format!("SELECT {} FROM tickets t WHERE t.ticket_id = $1", TICKET_COLUMNS);
        let ticket: Ticket = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(refund.ticket_id)
            .fetch_one(&mut *conn)
            .await
            .map_err(db_err)?
            .into();
        let booking_id = ticket_owner(conn, ticket.ticket_id).await?;
        let booking = fetch_booking_by_id(conn, booking_id).await?;
        records.push(RefundRecord {
            refund,
            ticket,
            booking,
        });
    }
    Ok(records)
}

// ============================================================================
// Ledger
// ============================================================================

#[async_trait]
impl BookingLedger for PgBookingLedger {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn booking_by_code(&self, booking_code: &str) -> StoreResult<Option<BookingSnapshot>> {
        let mut conn = self.conn().await?;
        let booking = fetch_booking(&mut conn, "booking_code", booking_code, false).await?;
        fetch_snapshot(&mut conn, booking).await
    }

    async fn booking_by_session(&self, session: &str) -> StoreResult<Option<BookingSnapshot>> {
        let mut conn = self.conn().await?;
        let booking = fetch_booking(&mut conn, "booking_session", session, false).await?;
        fetch_snapshot(&mut conn, booking).await
    }

    async fn ticket_by_code(&self, ticket_code: &str) -> StoreResult<Option<TicketRecord>> {
        let mut conn = self.conn().await?;
        fetch_ticket_record(&mut conn, ticket_code, false).await
    }

    async fn voucher_by_id(&self, voucher_id: Uuid) -> StoreResult<Option<Voucher>> {
        let sql = format!("SELECT {} FROM vouchers WHERE voucher_id = $1", VOUCHER_COLUMNS);
        let row = sqlx::query_as::<_, VoucherRow>(&sql)
            .bind(voucher_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(Voucher::from))
    }

    async fn tickets_for_customer(&self, customer_id: i64) -> StoreResult<Vec<TicketRecord>> {
        let mut conn = self.conn().await?;
        let sql = format!(
            "SELECT {} FROM tickets t \
             JOIN booking_details d ON d.ticket_id = t.ticket_id \
             JOIN bookings b ON b.booking_id = d.booking_id \
             WHERE b.customer_id = $1 ORDER BY b.created_at DESC, t.seat_id",
            TICKET_COLUMNS
        );
        let rows = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(customer_id)
            .fetch_all(&mut *conn)
            .await
            .map_err(db_err)?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(build_ticket_record(&mut conn, Ticket::from(row)).await?);
        }
        Ok(records)
    }

    async fn refunds_for_customer(&self, customer_id: i64) -> StoreResult<Vec<RefundRecord>> {
        let mut conn = self.conn().await?;
        let sql = format!(
            "SELECT {} FROM refunds r \
             WHERE r.ticket_id IN ( \
                SELECT d.ticket_id FROM booking_details d \
                JOIN bookings b ON b.booking_id = d.booking_id \
                WHERE b.customer_id = $1) \
             ORDER BY r.created_at DESC",
            REFUND_COLUMNS
        );
        let rows = sqlx::query_as::<_, RefundRow>(&sql)
            .bind(customer_id)
            .fetch_all(&mut *conn)
            .await
            .map_err(db_err)?;
        build_refund_records(&mut conn, rows).await
    }

    async fn list_refunds(
        &self,
        filter: RefundFilter,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<RefundRecord>> {
        let mut conn = self.conn().await?;
        let pending_only = filter == RefundFilter::Pending;
        let day: Option<NaiveDate> = (filter == RefundFilter::Today).then(|| now.date_naive());
        let sql = format!(
            "SELECT {} FROM refunds \
             WHERE ($1 = FALSE OR is_approved = FALSE) \
               AND ($2::date IS NULL OR (created_at AT TIME ZONE 'UTC')::date = $2) \
             ORDER BY created_at DESC",
            REFUND_COLUMNS
        );
        let rows = sqlx::query_as::<_, RefundRow>(&sql)
            .bind(pending_only)
            .bind(day)
            .fetch_all(&mut *conn)
            .await
            .map_err(db_err)?;
        build_refund_records(&mut conn, rows).await
    }

    async fn pending_outbox(&self, limit: usize) -> StoreResult<Vec<OutboxMessage>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            "SELECT id, body, attempts, last_error, created_at, dispatched_at FROM outbox \
             WHERE dispatched_at IS NULL ORDER BY created_at LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                Ok(OutboxMessage {
                    id: row.id,
                    body: serde_json::from_value(row.body).map_err(json_err)?,
                    attempts: row.attempts,
                    last_error: row.last_error,
                    created_at: row.created_at,
                    dispatched_at: row.dispatched_at,
                })
            })
            .collect()
    }

    async fn mark_outbox_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE outbox SET dispatched_at = $2, attempts = attempts + 1 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn mark_outbox_failed(&self, id: Uuid, error: &str) -> StoreResult<()> {
        sqlx::query("UPDATE outbox SET attempts = attempts + 1, last_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// ============================================================================
// Transaction
// ============================================================================

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn booking_for_update(&mut self, booking_code: &str) -> StoreResult<Option<Booking>> {
        fetch_booking(&mut self.tx, "booking_code", booking_code, true).await
    }

    async fn tickets_of(&mut self, booking_id: Uuid) -> StoreResult<Vec<Ticket>> {
        fetch_tickets(&mut self.tx, booking_id).await
    }

    async fn claim_seats(
        &mut self,
        trip_id: i64,
        seat_ids: &[i64],
        booking_id: Uuid,
        hold_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ClaimConflict>> {
        let mut ordered = seat_ids.to_vec();
        ordered.sort_unstable();

        let mut conflicts = Vec::new();
        for seat_id in ordered {
            // The row lock taken by the upsert serialises concurrent claimants
            let claimed: Option<i64> = sqlx::query_scalar(
                r#"
                INSERT INTO trip_seats (trip_id, seat_id, status, booking_id, hold_expires_at)
                VALUES ($1, $2, 0, $3, $4)
                ON CONFLICT (trip_id, seat_id) DO UPDATE
                SET booking_id = EXCLUDED.booking_id, hold_expires_at = EXCLUDED.hold_expires_at
                WHERE trip_seats.status = 0
                  AND (trip_seats.booking_id IS NULL OR trip_seats.hold_expires_at <= $5)
                RETURNING seat_id
                "#,
            )
            .bind(trip_id)
            .bind(seat_id)
            .bind(booking_id)
            .bind(hold_until)
            .bind(now)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;

            if claimed.is_none() {
                conflicts.push(seat_id);
            }
        }
        if conflicts.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, ClaimConflictRow>(
            r#"
            SELECT s.seat_id, s.hold_expires_at, b.customer_id, b.guest_name
            FROM trip_seats s
            LEFT JOIN bookings b ON b.booking_id = s.booking_id
            WHERE s.trip_id = $1 AND s.seat_id = ANY($2)
            ORDER BY s.seat_id
            "#,
        )
        .bind(trip_id)
        .bind(&conflicts)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(ClaimConflict::from).collect())
    }

    async fn insert_booking(&mut self, booking: &Booking, tickets: &[Ticket]) -> StoreResult<()> {
        let (guest_name, guest_email, guest_phone) = match booking.guest() {
            Some(g) => (
                Some(g.name.as_inner().clone()),
                Some(g.email.as_inner().clone()),
                Some(g.phone.as_inner().clone()),
            ),
            None => (None, None, None),
        };
        let pickup = serde_json::to_value(&booking.pickup).map_err(json_err)?;
        let dropoff = serde_json::to_value(&booking.dropoff).map_err(json_err)?;

        sqlx::query(
            r#"
            INSERT INTO bookings (booking_id, booking_code, booking_session, trip_id,
                booking_status, payment_status, customer_id, guest_name, guest_email, guest_phone,
                pickup, dropoff, number_of_tickets, total_price, total_payment, discount_amount,
                voucher_id, expiration_time, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(booking.booking_id)
        .bind(&booking.booking_code)
        .bind(&booking.booking_session)
        .bind(booking.trip_id)
        .bind(booking.booking_status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(booking.customer_id())
        .bind(guest_name)
        .bind(guest_email)
        .bind(guest_phone)
        .bind(pickup)
        .bind(dropoff)
        .bind(booking.number_of_tickets)
        .bind(booking.total_price)
        .bind(booking.total_payment)
        .bind(booking.discount_amount)
        .bind(booking.voucher_id)
        .bind(booking.expiration_time)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        for ticket in tickets {
            sqlx::query(
                r#"
                INSERT INTO tickets (ticket_id, ticket_code, trip_id, seat_id, seat_name,
                    ticket_amount, is_export_ticket, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(ticket.ticket_id)
            .bind(&ticket.ticket_code)
            .bind(ticket.trip_id)
            .bind(ticket.seat_id)
            .bind(&ticket.seat_name)
            .bind(ticket.ticket_amount)
            .bind(ticket.is_export_ticket)
            .bind(ticket.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;

            sqlx::query(
                "INSERT INTO booking_details (booking_id, ticket_id, price) VALUES ($1, $2, $3)",
            )
            .bind(booking.booking_id)
            .bind(ticket.ticket_id)
            .bind(ticket.ticket_amount)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE bookings
            SET booking_status = $2, payment_status = $3, discount_amount = $4, voucher_id = $5,
                payment_amount = $6, payment_method = $7, payment_transaction_id = $8,
                payment_time = $9, updated_at = $10
            WHERE booking_id = $1
            "#,
        )
        .bind(booking.booking_id)
        .bind(booking.booking_status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(booking.discount_amount)
        .bind(booking.voucher_id)
        .bind(booking.payment_amount)
        .bind(&booking.payment_method)
        .bind(&booking.payment_transaction_id)
        .bind(booking.payment_time)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn allocate_seats(&mut self, booking_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE trip_seats SET status = 1, hold_expires_at = NULL WHERE booking_id = $1",
        )
        .bind(booking_id)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn release_seats(&mut self, booking_id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE trip_seats SET status = 0, booking_id = NULL, hold_expires_at = NULL \
             WHERE booking_id = $1",
        )
        .bind(booking_id)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn release_seat(&mut self, trip_id: i64, seat_id: i64) -> StoreResult<()> {
        sqlx::query(
            "UPDATE trip_seats SET status = 0, booking_id = NULL, hold_expires_at = NULL \
             WHERE trip_id = $1 AND seat_id = $2",
        )
        .bind(trip_id)
        .bind(seat_id)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn voucher_by_code(&mut self, code: &str) -> StoreResult<Option<Voucher>> {
        let sql = format!("SELECT {} FROM vouchers WHERE voucher_code = $1", VOUCHER_COLUMNS);
        let row = sqlx::query_as::<_, VoucherRow>(&sql)
            .bind(code)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(row.map(Voucher::from))
    }

    async fn voucher_for_update(&mut self, voucher_id: Uuid) -> StoreResult<Option<Voucher>> {
        let sql = format!(
            "SELECT {} FROM vouchers WHERE voucher_id = $1 FOR UPDATE",
            VOUCHER_COLUMNS
        );
        let row = sqlx::query_as::<_, VoucherRow>(&sql)
            .bind(voucher_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(row.map(Voucher::from))
    }

    async fn voucher_grantees(&mut self, voucher_id: Uuid) -> StoreResult<Vec<i64>> {
        sqlx::query_scalar("SELECT customer_id FROM voucher_customers WHERE voucher_id = $1")
            .bind(voucher_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_err)
    }

    async fn update_voucher_usage(
        &mut self,
        voucher_id: Uuid,
        usage_limit: i32,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE vouchers SET usage_limit = GREATEST($2, 0) WHERE voucher_id = $1")
            .bind(voucher_id)
            .bind(usage_limit)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn insert_voucher(&mut self, voucher: &Voucher, grantee: Option<i64>) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO vouchers (voucher_id, voucher_code, discount_percentage, min_order_amount,
                usage_limit, valid_from, valid_to, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(voucher.voucher_id)
        .bind(&voucher.voucher_code)
        .bind(voucher.discount_percentage)
        .bind(voucher.min_order_amount)
        .bind(voucher.usage_limit)
        .bind(voucher.valid_from)
        .bind(voucher.valid_to)
        .bind(voucher.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        if let Some(customer_id) = grantee {
            sqlx::query("INSERT INTO voucher_customers (voucher_id, customer_id) VALUES ($1, $2)")
                .bind(voucher.voucher_id)
                .bind(customer_id)
                .execute(&mut *self.tx)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    async fn customer_for_update(
        &mut self,
        customer_id: i64,
    ) -> StoreResult<Option<CustomerAccount>> {
        fetch_customer(&mut self.tx, customer_id, true).await
    }

    async fn credit_points(&mut self, customer_id: i64, points: i64) -> StoreResult<i64> {
        sqlx::query_scalar(
            "UPDATE customers SET bonus_points = bonus_points + $2 WHERE customer_id = $1 \
             RETURNING bonus_points",
        )
        .bind(customer_id)
        .bind(points)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_err)
    }

    async fn reset_points(&mut self, customer_id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE customers SET bonus_points = 0 WHERE customer_id = $1")
            .bind(customer_id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn ticket_for_update(&mut self, ticket_code: &str) -> StoreResult<Option<TicketRecord>> {
        fetch_ticket_record(&mut self.tx, ticket_code, true).await
    }

    async fn insert_refund(&mut self, refund: &Refund) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refunds (refund_id, refund_code, ticket_id, refund_amount, refund_percentage,
                description, method, is_approved, is_refunded, employee_id, created_at, approved_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(refund.refund_id)
        .bind(&refund.refund_code)
        .bind(refund.ticket_id)
        .bind(refund.refund_amount)
        .bind(refund.refund_percentage)
        .bind(&refund.description)
        .bind(&refund.method)
        .bind(refund.is_approved)
        .bind(refund.is_refunded)
        .bind(refund.employee_id)
        .bind(refund.created_at)
        .bind(refund.approved_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn refund_for_update(&mut self, refund_id: Uuid) -> StoreResult<Option<RefundRecord>> {
        let sql = format!(
            "SELECT {} FROM refunds WHERE refund_id = $1 FOR UPDATE",
            REFUND_COLUMNS
        );
        let row = sqlx::query_as::<_, RefundRow>(&sql)
            .bind(refund_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => Ok(build_refund_records(&mut self.tx, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn update_refund(&mut self, refund: &Refund) -> StoreResult<()> {
        sqlx::query(
            "UPDATE refunds SET is_approved = $2, is_refunded = $3, employee_id = $4, \
             approved_at = $5 WHERE refund_id = $1",
        )
        .bind(refund.refund_id)
        .bind(refund.is_approved)
        .bind(refund.is_refunded)
        .bind(refund.employee_id)
        .bind(refund.approved_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn enqueue(&mut self, message: Outgoing, now: DateTime<Utc>) -> StoreResult<()> {
        let body = serde_json::to_value(&message).map_err(json_err)?;
        sqlx::query("INSERT INTO outbox (id, body, created_at) VALUES ($1, $2, $3)")
            .bind(Uuid::new_v4())
            .bind(body)
            .bind(now)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(db_err)
    }
}
