use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use coach_booking::models::RefundView;
use coach_core::refund::RefundFilter;
use coach_core::voucher::Voucher;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::middleware::{staff_auth_middleware, Claims};
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/admin/refunds", get(list_refunds))
        .route("/v1/admin/refunds/{id}/approve", post(approve_refund))
        .route(
            "/v1/admin/customers/{id}/signup-voucher",
            post(issue_signup_voucher),
        )
        .route_layer(middleware::from_fn_with_state(state, staff_auth_middleware))
}

#[derive(Debug, Default, Deserialize)]
struct RefundListQuery {
    #[serde(default)]
    filter: RefundFilter,
}

async fn list_refunds(
    State(state): State<AppState>,
    query: Result<Query<RefundListQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<RefundView>>> {
    let Query(query) = query?;
    Ok(Json(state.refunds.list_refunds(query.filter).await?))
}

async fn approve_refund(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    refund_id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<RefundView>> {
    let Path(refund_id) = refund_id?;
    let employee_id = claims.subject_id()?;

    let view = state.refunds.approve_refund(refund_id, employee_id).await?;
    state.metrics.record_refund("approved");
    info!(refund = %view.refund.refund_code, employee = employee_id, "Refund approved by staff");
    Ok(Json(view))
}

async fn issue_signup_voucher(
    State(state): State<AppState>,
    customer_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<(StatusCode, Json<Voucher>)> {
    let Path(customer_id) = customer_id?;
    let voucher = state
        .loyalty
        .issue_signup_voucher(state.ledger.as_ref(), state.clock.as_ref(), customer_id)
        .await?;
    Ok((StatusCode::CREATED, Json(voucher)))
}
