use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Voucher {
    pub voucher_id: Uuid,
    pub voucher_code: String,
    pub discount_percentage: i32,
    pub min_order_amount: i64,
    pub usage_limit: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Voucher {
    pub fn has_uses_left(&self) -> bool {
        self.usage_limit > 0
    }

    pub fn not_yet_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.valid_from
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_to
    }

    /// Discount in VND for an order of `amount`, truncated to the dong.
    pub fn discount_for(&self, amount: i64) -> i64 {
        amount * i64::from(self.discount_percentage) / 100
    }

    /// Decrements the usage limit, never below zero. Returns false if already exhausted.
    pub fn consume(&mut self) -> bool {
        if self.usage_limit <= 0 {
            self.usage_limit = 0;
            return false;
        }
        self.usage_limit -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_consume_floors_at_zero() {
        let now = Utc::now();
        let mut v = Voucher {
            voucher_id: Uuid::new_v4(),
            voucher_code: "LOYAL10_20260301101010123_0042".into(),
            discount_percentage: 10,
            min_order_amount: 0,
            usage_limit: 1,
            valid_from: now,
            valid_to: now + Duration::days(30),
            created_at: now,
        };
        assert!(v.consume());
        assert!(!v.consume());
        assert_eq!(v.usage_limit, 0);
        assert_eq!(v.discount_for(350_000), 35_000);
    }
}
