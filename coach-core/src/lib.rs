pub mod booking;
pub mod clock;
pub mod error;
pub mod hold;
pub mod notify;
pub mod outbox;
pub mod payment;
pub mod refund;
pub mod repository;
pub mod voucher;

pub use error::{BookingError, ErrorKind, StoreError};

pub type CoreResult<T> = Result<T, BookingError>;
