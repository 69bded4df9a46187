use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use coach_core::booking::{Booking, Settlement};
use coach_core::clock::Clock;
use coach_core::outbox::Outgoing;
use coach_core::payment::{
    CallbackParams, CheckoutRequest, GatewayError, PaymentGateway, PaymentUrl, SECURE_HASH,
};
use coach_core::repository::{BookingLedger, LedgerTx, SeatLockStore, StoreResult};
use coach_core::voucher::Voucher;
use coach_core::{BookingError, CoreResult, StoreError};
use coach_shared::models::events::{topics, BookingConfirmedEvent, BookingReleasedEvent};

use crate::emails::{self, Contact};
use crate::loyalty::{LoyaltyAward, LoyaltyEngine};
use crate::models::{PaymentCallback, PaymentConfirmation};
use crate::service::{booking_not_found, ensure_redeemable, release_holds, voucher_exhausted};

const UPDATE_ERROR: &str = "PAYMENT_UPDATE_ERROR";

/// Turns gateway callbacks into booking state.
pub struct PaymentReconciler {
    ledger: Arc<dyn BookingLedger>,
    locks: Arc<dyn SeatLockStore>,
    gateway: Arc<dyn PaymentGateway>,
    loyalty: LoyaltyEngine,
    clock: Arc<dyn Clock>,
}

impl PaymentReconciler {
    pub fn new(
        ledger: Arc<dyn BookingLedger>,
        locks: Arc<dyn SeatLockStore>,
        gateway: Arc<dyn PaymentGateway>,
        loyalty: LoyaltyEngine,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            locks,
            gateway,
            loyalty,
            clock,
        }
    }

    /// Signed checkout redirect for a booking that can still be paid.
    pub async fn build_payment_url(&self, booking_code: &str, client_ip: &str) -> CoreResult<PaymentUrl> {
        let booking_code = booking_code.trim();
        if booking_code.is_empty() {
            return Err(BookingError::validation(
                "MISSING_BOOKING_CODE",
                "Booking code is required",
            ));
        }
        let now = self.clock.now();
        let snapshot = self
            .ledger
            .booking_by_code(booking_code)
            .await
            .map_err(BookingError::store("load booking"))?
            .filter(|s| s.booking.is_awaiting_payment(now))
            .ok_or_else(|| booking_not_found(booking_code))?;
        let booking = &snapshot.booking;

        // Another booking may have spent the voucher since it was applied
        if let Some(voucher_id) = booking.voucher_id {
            let voucher = self
                .ledger
                .voucher_by_id(voucher_id)
                .await
                .map_err(BookingError::store("load voucher"))?
                .ok_or_else(voucher_exhausted)?;
            ensure_redeemable(&voucher, now)?;
        }

        let url = self.gateway.checkout_url(&CheckoutRequest {
            booking_code,
            amount: booking.payable_amount(),
            client_ip,
            created_at: now,
            expires_at: booking.expiration_time,
        })?;
        tracing::info!(
            booking = %booking_code,
            gateway = self.gateway.name(),
            amount = url.amount,
            "Payment URL issued"
        );
        Ok(url)
    }

    /// Verifies a gateway callback and settles the booking it names.
    ///
    /// Rejections happen in order: bad signature, booking not payable, amount
    /// mismatch. A success response confirms the booking; anything else
    /// cancels it and reports `PAYMENT_FAILED`.
    pub async fn handle_callback(&self, callback: PaymentCallback) -> CoreResult<PaymentConfirmation> {
        let params = callback.vnp_params.filter(|p| !p.is_empty());
        let method = callback
            .payment_method
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        let (Some(params), Some(method)) = (params, method) else {
            return Err(BookingError::validation(
                "INVALID_PAYMENT_INFO",
                "Callback parameters and payment method are required",
            ));
        };

        let verified = self.verify(&params)?;
        let now = self.clock.now();

        let mut tx = self
            .ledger
            .begin()
            .await
            .map_err(BookingError::store_with_code(UPDATE_ERROR, "begin reconciliation"))?;
        // Row lock; a replayed callback finds the booking no longer pending
        let booking = tx
            .booking_for_update(&verified.reference)
            .await
            .map_err(BookingError::store_with_code(UPDATE_ERROR, "load booking"))?
            .filter(|b| b.is_awaiting_payment(now))
            .ok_or_else(|| booking_not_found(&verified.reference))?;

        if verified.amount != booking.payable_amount() {
            tracing::warn!(
                booking = %booking.booking_code,
                expected = booking.payable_amount(),
                received = verified.amount,
                "Callback amount does not match booking"
            );
            return Err(BookingError::validation(
                "INVALID_AMOUNT",
                "Paid amount does not match the booking",
            ));
        }

        let seat_ids: Vec<i64> = tx
            .tickets_of(booking.booking_id)
            .await
            .map_err(BookingError::store_with_code(UPDATE_ERROR, "load tickets"))?
            .iter()
            .map(|t| t.seat_id)
            .collect();

        if verified.is_success() {
            let voucher = match booking.voucher_id {
                Some(voucher_id) => {
                    let voucher = tx
                        .voucher_for_update(voucher_id)
                        .await
                        .map_err(BookingError::store_with_code(UPDATE_ERROR, "load voucher"))?
                        .filter(Voucher::has_uses_left);
                    if voucher.is_none() {
                        tracing::error!(
                            booking = %booking.booking_code,
                            amount = verified.amount,
                            "Paid with a voucher that is used up, payment needs manual review"
                        );
                        return Err(voucher_exhausted());
                    }
                    voucher
                }
                None => None,
            };

            let allocated = tx
                .allocate_seats(booking.booking_id)
                .await
                .map_err(BookingError::store_with_code(UPDATE_ERROR, "allocate seats"))?;
            if allocated != seat_ids.len() as u64 {
                tracing::error!(
                    booking = %booking.booking_code,
                    amount = verified.amount,
                    allocated,
                    seats = ?seat_ids,
                    "Paid booking lost its seats, payment needs manual review"
                );
                return Err(BookingError::conflict(
                    "SEATS_RELEASED",
                    "The seats of this booking were released before payment arrived",
                ));
            }

            let (booking, award) = self
                .confirm(&mut *tx, booking, voucher, &verified, &method, now)
                .await
                .map_err(BookingError::store_with_code(UPDATE_ERROR, "confirm payment"))?;
            tx.commit()
                .await
                .map_err(BookingError::store_with_code(UPDATE_ERROR, "commit confirmation"))?;
            release_holds(self.locks.as_ref(), booking.trip_id, &seat_ids).await;

            tracing::info!(
                booking = %booking.booking_code,
                amount = verified.amount,
                seats = ?seat_ids,
                "Payment confirmed"
            );
            Ok(PaymentConfirmation {
                booking_code: booking.booking_code,
                booking_status: booking.booking_status,
                payment_status: booking.payment_status,
                amount_paid: verified.amount,
                transaction_ref: booking.payment_transaction_id.unwrap_or_default(),
                bonus_points: award.as_ref().map(|a| a.balance),
                voucher_issued: award.and_then(|a| a.voucher).map(|v| v.voucher_code),
            })
        } else {
            let booking = self
                .decline(&mut *tx, booking, &verified, &method, &seat_ids, now)
                .await
                .map_err(BookingError::store_with_code(UPDATE_ERROR, "record failed payment"))?;
            tx.commit()
                .await
                .map_err(BookingError::store_with_code(UPDATE_ERROR, "commit failed payment"))?;
            release_holds(self.locks.as_ref(), booking.trip_id, &seat_ids).await;

            tracing::info!(
                booking = %booking.booking_code,
                response_code = %verified.response_code,
                "Payment declined, seats released"
            );
            Err(BookingError::PaymentDeclined {
                booking_code: booking.booking_code,
                response_code: verified.response_code,
            })
        }
    }

    fn verify(&self, params: &BTreeMap<String, String>) -> CoreResult<CallbackParams> {
        let reference = || params.get("vnp_TxnRef").cloned().unwrap_or_default();
        match self.gateway.verify_callback(params) {
            Ok(verified) => Ok(verified),
            Err(GatewayError::SignatureMismatch) | Err(GatewayError::MissingField(SECURE_HASH)) => {
                tracing::warn!(
                    reference = %reference(),
                    gateway = self.gateway.name(),
                    "Callback signature rejected, possible tampering"
                );
                Err(BookingError::InvalidSignature {
                    reference: reference(),
                })
            }
            Err(e @ GatewayError::InvalidKey) => Err(e.into()),
            Err(e) => Err(BookingError::validation("INVALID_PAYMENT_INFO", e.to_string())),
        }
    }

    async fn confirm(
        &self,
        tx: &mut dyn LedgerTx,
        mut booking: Booking,
        voucher: Option<Voucher>,
        verified: &CallbackParams,
        method: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<(Booking, Option<LoyaltyAward>)> {
        let transaction_ref = verified
            .transaction_no
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| verified.reference.clone());
        // Pending was checked under the row lock, so this cannot fail
        if let Err(e) = booking.confirm(Settlement {
            amount: verified.amount,
            method: method.to_string(),
            transaction_ref: transaction_ref.clone(),
            paid_at: now,
        }) {
            return Err(StoreError::Corrupt(e.to_string()));
        }
        tx.update_booking(&booking).await?;

        if let Some(mut voucher) = voucher {
            if !voucher.consume() {
                return Err(StoreError::Corrupt(format!(
                    "voucher {} has no uses left",
                    voucher.voucher_code
                )));
            }
            tx.update_voucher_usage(voucher.voucher_id, voucher.usage_limit)
                .await?;
        }

        let account = match booking.customer_id() {
            Some(id) => tx.customer_for_update(id).await?,
            None => None,
        };
        let award = match &account {
            Some(account) => {
                let base = booking.payable_amount() + booking.discount_amount;
                Some(self.loyalty.award(&mut *tx, account, base, now).await?)
            }
            None => None,
        };

        let tickets = tx.tickets_of(booking.booking_id).await?;
        let event = BookingConfirmedEvent {
            booking_id: booking.booking_id,
            booking_code: booking.booking_code.clone(),
            trip_id: booking.trip_id,
            seat_ids: tickets.iter().map(|t| t.seat_id).collect(),
            customer_id: booking.customer_id(),
            amount_paid: verified.amount,
            transaction_ref,
            timestamp: now.timestamp(),
        };
        tx.enqueue(
            Outgoing::event(topics::BOOKING_CONFIRMED, booking.booking_code.clone(), &event),
            now,
        )
        .await?;
        match Contact::for_booking(&booking, account.as_ref()) {
            Some(contact) => {
                tx.enqueue(
                    Outgoing::Email(emails::payment_success(&contact, &booking, &tickets, None)),
                    now,
                )
                .await?
            }
            None => tracing::warn!(booking = %booking.booking_code, "No contact for payment notice"),
        }
        Ok((booking, award))
    }

    async fn decline(
        &self,
        tx: &mut dyn LedgerTx,
        mut booking: Booking,
        verified: &CallbackParams,
        method: &str,
        seat_ids: &[i64],
        now: DateTime<Utc>,
    ) -> StoreResult<Booking> {
        if let Err(e) = booking.fail_payment(method, now) {
            return Err(StoreError::Corrupt(e.to_string()));
        }
        tx.update_booking(&booking).await?;
        tx.release_seats(booking.booking_id).await?;

        let event = BookingReleasedEvent {
            booking_id: booking.booking_id,
            booking_code: booking.booking_code.clone(),
            trip_id: booking.trip_id,
            seat_ids: seat_ids.to_vec(),
            reason: format!("payment_failed:{}", verified.response_code),
            timestamp: now.timestamp(),
        };
        tx.enqueue(
            Outgoing::event(
                topics::BOOKING_PAYMENT_FAILED,
                booking.booking_code.clone(),
                &event,
            ),
            now,
        )
        .await?;
        Ok(booking)
    }
}
