use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use coach_booking::models::{RefundReceipt, RefundRequest};

use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/refunds", post(request_refund))
}

async fn request_refund(
    State(state): State<AppState>,
    payload: Result<Json<RefundRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<RefundReceipt>)> {
    let Json(req) = payload?;

    match state.refunds.request_refund(req).await {
        Ok(receipt) => {
            state.metrics.record_refund("requested");
            Ok((StatusCode::CREATED, Json(receipt)))
        }
        Err(e) => {
            state.metrics.record_refund(e.code());
            Err(e.into())
        }
    }
}
