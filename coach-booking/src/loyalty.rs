use chrono::{DateTime, Duration, Months, Utc};
use coach_core::booking::CustomerAccount;
use coach_core::clock::Clock;
use coach_core::outbox::Outgoing;
use coach_core::repository::{BookingLedger, LedgerTx, StoreResult};
use coach_core::voucher::Voucher;
use coach_core::{BookingError, CoreResult};
use coach_shared::models::events::{topics, VoucherIssuedEvent};
use uuid::Uuid;

use crate::codes;
use crate::emails::{self, Contact};

/// Amount breakpoints in VND and the points they earn, highest first.
const POINT_BREAKPOINTS: &[(i64, i64)] = &[
    (3_000_000, 300),
    (2_000_000, 200),
    (1_000_000, 100),
    (800_000, 80),
    (600_000, 60),
    (400_000, 40),
    (300_000, 30),
    (200_000, 20),
];

const BASE_POINTS: i64 = 10;
const LOYALTY_VOUCHER_DAYS: i64 = 30;
const SIGNUP_DISCOUNT: i32 = 15;

pub fn bonus_points(amount: i64) -> i64 {
    POINT_BREAKPOINTS
        .iter()
        .find(|(threshold, _)| amount >= *threshold)
        .map(|(_, points)| *points)
        .unwrap_or(BASE_POINTS)
}

/// Voucher tier unlocked by a points balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoyaltyTier {
    pub min_points: i64,
    pub discount_percentage: i32,
}

const TIERS: &[LoyaltyTier] = &[
    LoyaltyTier { min_points: 130, discount_percentage: 30 },
    LoyaltyTier { min_points: 60, discount_percentage: 25 },
    LoyaltyTier { min_points: 10, discount_percentage: 10 },
];

/// Highest tier the balance reaches, if any.
pub fn tier_for(balance: i64) -> Option<LoyaltyTier> {
    TIERS.iter().copied().find(|t| balance >= t.min_points)
}

#[derive(Debug, Clone)]
pub struct LoyaltyAward {
    pub points_awarded: i64,
    /// Balance after the award and any tier reset.
    pub balance: i64,
    pub voucher: Option<Voucher>,
}

/// Points, tier vouchers and the signup voucher.
#[derive(Debug, Clone, Copy)]
pub struct LoyaltyEngine {
    utc_offset_hours: i32,
}

impl LoyaltyEngine {
    pub fn new(utc_offset_hours: i32) -> Self {
        Self { utc_offset_hours }
    }

    /// Credits points for a paid amount and converts the balance into a
    /// voucher when it reaches a tier. Runs inside the caller's transaction.
    pub async fn award(
        &self,
        tx: &mut dyn LedgerTx,
        account: &CustomerAccount,
        amount: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<LoyaltyAward> {
        let points = bonus_points(amount);
        let balance = tx.credit_points(account.customer_id, points).await?;

        let Some(tier) = tier_for(balance) else {
            tracing::info!(customer_id = account.customer_id, points, balance, "Bonus points credited");
            return Ok(LoyaltyAward {
                points_awarded: points,
                balance,
                voucher: None,
            });
        };

        let voucher = Voucher {
            voucher_id: Uuid::new_v4(),
            voucher_code: codes::loyalty_voucher_code(
                tier.discount_percentage,
                now,
                self.utc_offset_hours,
            ),
            discount_percentage: tier.discount_percentage,
            min_order_amount: 0,
            usage_limit: 1,
            valid_from: now,
            valid_to: now + Duration::days(LOYALTY_VOUCHER_DAYS),
            created_at: now,
        };
        tx.insert_voucher(&voucher, Some(account.customer_id)).await?;
        tx.reset_points(account.customer_id).await?;
        announce_voucher(tx, account, &voucher, now).await?;

        tracing::info!(
            customer_id = account.customer_id,
            points,
            balance,
            voucher = %voucher.voucher_code,
            "Loyalty tier reached, points converted to voucher"
        );
        Ok(LoyaltyAward {
            points_awarded: points,
            balance: 0,
            voucher: Some(voucher),
        })
    }

    /// Unconditional 15% welcome voucher valid for one calendar month.
    pub async fn issue_signup_voucher(
        &self,
        ledger: &dyn BookingLedger,
        clock: &dyn Clock,
        customer_id: i64,
    ) -> CoreResult<Voucher> {
        let now = clock.now();
        let mut tx = ledger
            .begin()
            .await
            .map_err(BookingError::store("begin signup voucher"))?;
        let account = tx
            .customer_for_update(customer_id)
            .await
            .map_err(BookingError::store("load customer"))?
            .ok_or_else(|| {
                BookingError::not_found(
                    "CUSTOMER_NOT_FOUND",
                    format!("Customer {} does not exist", customer_id),
                )
            })?;

        let valid_to = now
            .checked_add_months(Months::new(1))
            .unwrap_or(now + Duration::days(LOYALTY_VOUCHER_DAYS));
        let voucher = Voucher {
            voucher_id: Uuid::new_v4(),
            voucher_code: codes::signup_voucher_code(&account.full_name, now, self.utc_offset_hours),
            discount_percentage: SIGNUP_DISCOUNT,
            min_order_amount: 0,
            usage_limit: 1,
            valid_from: now,
            valid_to,
            created_at: now,
        };
        tx.insert_voucher(&voucher, Some(customer_id))
            .await
            .map_err(|e| {
                if e.is_duplicate() {
                    BookingError::conflict("VOUCHER_CODE_TAKEN", "Voucher code already exists")
                } else {
                    BookingError::store("insert signup voucher")(e)
                }
            })?;
        announce_voucher(&mut *tx, &account, &voucher, now)
            .await
            .map_err(BookingError::store("queue voucher notice"))?;
        tx.commit()
            .await
            .map_err(BookingError::store("commit signup voucher"))?;

        tracing::info!(customer_id, voucher = %voucher.voucher_code, "Signup voucher issued");
        Ok(voucher)
    }
}

async fn announce_voucher(
    tx: &mut dyn LedgerTx,
    account: &CustomerAccount,
    voucher: &Voucher,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    let event = VoucherIssuedEvent {
        voucher_id: voucher.voucher_id,
        voucher_code: voucher.voucher_code.clone(),
        customer_id: account.customer_id,
        discount_percentage: voucher.discount_percentage,
        valid_to: voucher.valid_to,
        timestamp: now.timestamp(),
    };
    tx.enqueue(
        Outgoing::event(topics::VOUCHER_ISSUED, voucher.voucher_code.clone(), &event),
        now,
    )
    .await?;

    let contact = Contact::from(account);
    if contact.email.is_empty() {
        tracing::warn!(customer_id = account.customer_id, "No e-mail on file, voucher notice skipped");
        return Ok(());
    }
    tx.enqueue(
        Outgoing::Email(emails::voucher_issued(&contact, voucher)),
        now,
    )
    .await
}
