use crate::hold::SeatConflict;
use crate::payment::GatewayError;

/// Failures raised by the ledger and seat lock store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("duplicate key: {0}")]
    Duplicate(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate(_))
    }
}

/// Coarse classification used by transports to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Unauthorized,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("{message}")]
    Validation {
        code: &'static str,
        message: String,
        suggestion: Option<&'static str>,
    },
    #[error("{message}")]
    NotFound { code: &'static str, message: String },
    #[error("{message}")]
    Conflict { code: &'static str, message: String },
    #[error("{}", describe_conflicts(.seats))]
    SeatsUnavailable { seats: Vec<SeatConflict> },
    #[error("payment signature mismatch for {reference}")]
    InvalidSignature { reference: String },
    #[error("refund window closed: departure in {hours_until_departure}h, at least 12h required")]
    RefundWindowClosed { hours_until_departure: i64 },
    #[error("payment for {booking_code} declined by gateway (response code {response_code})")]
    PaymentDeclined {
        booking_code: String,
        response_code: String,
    },
    #[error("payment gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("{context}: {source}")]
    Store {
        code: &'static str,
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

fn describe_conflicts(seats: &[SeatConflict]) -> String {
    let parts: Vec<String> = seats
        .iter()
        .map(|c| match c.expires_at {
            Some(at) => format!(
                "seat {} is held by {} until {}",
                c.seat_name,
                c.held_by,
                at.format("%H:%M:%S")
            ),
            None => format!("seat {} is already taken", c.seat_name),
        })
        .collect();
    format!("Seats unavailable: {}", parts.join("; "))
}

impl BookingError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        BookingError::Validation {
            code,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        BookingError::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        BookingError::Conflict {
            code,
            message: message.into(),
        }
    }

    /// Attaches a client-facing hint. Only validation errors carry a custom one.
    pub fn with_suggestion(self, hint: &'static str) -> Self {
        match self {
            BookingError::Validation { code, message, .. } => BookingError::Validation {
                code,
                message,
                suggestion: Some(hint),
            },
            other => other,
        }
    }

    /// Maps a store failure to `STORE_UNAVAILABLE`, keeping the context for logs.
    pub fn store(context: &'static str) -> impl FnOnce(StoreError) -> BookingError {
        Self::store_with_code("STORE_UNAVAILABLE", context)
    }

    pub fn store_with_code(
        code: &'static str,
        context: &'static str,
    ) -> impl FnOnce(StoreError) -> BookingError {
        move |source| BookingError::Store {
            code,
            context,
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::Validation { .. }
            | BookingError::RefundWindowClosed { .. }
            | BookingError::PaymentDeclined { .. } => ErrorKind::Validation,
            BookingError::NotFound { .. } => ErrorKind::NotFound,
            BookingError::Conflict { .. } | BookingError::SeatsUnavailable { .. } => {
                ErrorKind::Conflict
            }
            BookingError::InvalidSignature { .. } => ErrorKind::Unauthorized,
            BookingError::Gateway(_) | BookingError::Store { .. } => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BookingError::Validation { code, .. }
            | BookingError::NotFound { code, .. }
            | BookingError::Conflict { code, .. }
            | BookingError::Store { code, .. } => code,
            BookingError::SeatsUnavailable { .. } => "UNAVAILABLE_SEATS",
            BookingError::InvalidSignature { .. } => "INVALID_SIGNATURE",
            BookingError::RefundWindowClosed { .. } => "REFUND_TIME_EXPIRED",
            BookingError::PaymentDeclined { .. } => "PAYMENT_FAILED",
            BookingError::Gateway(_) => "PAYMENT_GATEWAY_ERROR",
        }
    }

    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            BookingError::Validation { suggestion, .. } => *suggestion,
            BookingError::SeatsUnavailable { .. } => {
                Some("Please choose other seats or try again later")
            }
            BookingError::RefundWindowClosed { .. } => {
                Some("Refunds are only accepted at least 12 hours before departure")
            }
            BookingError::PaymentDeclined { .. } => Some("Please retry the payment"),
            BookingError::Store { .. } => Some("Please try again in a few moments"),
            _ => None,
        }
    }

    pub fn conflicts(&self) -> &[SeatConflict] {
        match self {
            BookingError::SeatsUnavailable { seats } => seats,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_seat_conflict_message_lists_every_seat() {
        let err = BookingError::SeatsUnavailable {
            seats: vec![
                SeatConflict {
                    seat_id: 1,
                    seat_name: "A01".into(),
                    held_by: "Tran Thi B".into(),
                    expires_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 8, 20, 0).unwrap()),
                },
                SeatConflict {
                    seat_id: 2,
                    seat_name: "A02".into(),
                    held_by: String::new(),
                    expires_at: None,
                },
            ],
        };

        let msg = err.to_string();
        assert!(msg.contains("seat A01 is held by Tran Thi B until 08:20:00"));
        assert!(msg.contains("seat A02 is already taken"));
        assert_eq!(err.code(), "UNAVAILABLE_SEATS");
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.conflicts().len(), 2);
    }

    #[test]
    fn test_store_errors_are_internal() {
        let err = BookingError::store_with_code("PAYMENT_UPDATE_ERROR", "confirm payment")(
            StoreError::Unavailable("connection reset".into()),
        );
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.code(), "PAYMENT_UPDATE_ERROR");
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_suggestion_only_sticks_to_validation() {
        let err = BookingError::validation("INVALID_SEAT_LIST", "no seats")
            .with_suggestion("Pick at least one seat");
        assert_eq!(err.suggestion(), Some("Pick at least one seat"));

        let err = BookingError::not_found("BOOKING_NOT_FOUND", "gone").with_suggestion("x");
        assert_eq!(err.suggestion(), None);
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
