use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use coach_booking::models::{
    ApplyVoucherRequest, BookingReceipt, BookingStatusView, BookingView, CancelBookingRequest,
    CancelReceipt, CreateBookingRequest, VoucherApplied,
};
use tracing::info;

use crate::error::ApiResult;
use crate::middleware::MaybeCustomer;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking))
        .route("/v1/bookings/cancel", post(cancel_booking))
        .route("/v1/bookings/session/{session}", get(booking_status))
        .route("/v1/bookings/{code}", get(get_booking))
        .route("/v1/bookings/{code}/voucher", post(apply_voucher))
}

async fn create_booking(
    State(state): State<AppState>,
    MaybeCustomer(customer_id): MaybeCustomer,
    payload: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<BookingReceipt>)> {
    let Json(req) = payload?;

    match state.bookings.create_booking(req, customer_id).await {
        Ok(receipt) if receipt.replayed => {
            state.metrics.record_booking("replayed");
            Ok((StatusCode::OK, Json(receipt)))
        }
        Ok(receipt) => {
            state.metrics.record_booking("created");
            info!(booking = %receipt.booking_code, "Booking accepted");
            Ok((StatusCode::CREATED, Json(receipt)))
        }
        Err(e) => {
            state.metrics.record_booking(e.code());
            Err(e.into())
        }
    }
}

async fn cancel_booking(
    State(state): State<AppState>,
    payload: Result<Json<CancelBookingRequest>, JsonRejection>,
) -> ApiResult<Json<CancelReceipt>> {
    let Json(req) = payload?;
    Ok(Json(state.bookings.cancel_booking(req).await?))
}

async fn booking_status(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> ApiResult<Json<BookingStatusView>> {
    Ok(Json(state.bookings.check_booking_status(&session).await?))
}

async fn get_booking(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<BookingView>> {
    Ok(Json(state.lookups.get_booking_by_code(&code).await?))
}

async fn apply_voucher(
    State(state): State<AppState>,
    Path(code): Path<String>,
    payload: Result<Json<ApplyVoucherRequest>, JsonRejection>,
) -> ApiResult<Json<VoucherApplied>> {
    let Json(req) = payload?;
    Ok(Json(state.bookings.apply_voucher(&code, &req.voucher_code).await?))
}
