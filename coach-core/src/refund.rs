use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::booking::{Booking, Ticket};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Refund {
    pub refund_id: Uuid,
    pub refund_code: String,
    pub ticket_id: Uuid,
    pub refund_amount: i64,
    pub refund_percentage: i32,
    pub description: String,
    pub method: String,
    pub is_approved: bool,
    pub is_refunded: bool,
    pub employee_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl Refund {
    /// One-way: an approved refund cannot be approved again.
    pub fn approve(&mut self, employee_id: i64, now: DateTime<Utc>) -> bool {
        if self.is_approved {
            return false;
        }
        self.is_approved = true;
        self.is_refunded = true;
        self.employee_id = Some(employee_id);
        self.approved_at = Some(now);
        true
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RefundFilter {
    #[default]
    All,
    Today,
    Pending,
}

impl RefundFilter {
    pub fn matches(&self, refund: &Refund, now: DateTime<Utc>) -> bool {
        match self {
            RefundFilter::All => true,
            RefundFilter::Today => refund.created_at.date_naive() == now.date_naive(),
            RefundFilter::Pending => !refund.is_approved,
        }
    }
}

/// A refund joined with its ticket and booking for staff listings.
#[derive(Debug, Clone, Serialize)]
pub struct RefundRecord {
    pub refund: Refund,
    pub ticket: Ticket,
    pub booking: Booking,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn refund(created_at: DateTime<Utc>) -> Refund {
        Refund {
            refund_id: Uuid::new_v4(),
            refund_code: "REFUND_ABCDEFGHIJKLMNOPQRSTUVWXYZ".into(),
            ticket_id: Uuid::new_v4(),
            refund_amount: 60_000,
            refund_percentage: 30,
            description: "change of plans".into(),
            method: "online".into(),
            is_approved: false,
            is_refunded: false,
            employee_id: None,
            created_at,
            approved_at: None,
        }
    }

    #[test]
    fn test_approval_is_one_way() {
        let now = Utc::now();
        let mut r = refund(now);
        assert!(r.approve(3, now));
        assert!(r.is_refunded);
        assert!(!r.approve(4, now));
        assert_eq!(r.employee_id, Some(3));
    }

    #[test]
    fn test_filters() {
        let now = Utc::now();
        let old = refund(now - Duration::days(3));
        assert!(RefundFilter::All.matches(&old, now));
        assert!(!RefundFilter::Today.matches(&old, now));
        assert!(RefundFilter::Pending.matches(&old, now));
    }
}
