use std::net::SocketAddr;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, FromRequestParts, Query, State,
    },
    http::request::Parts,
    routing::{get, post},
    Json, Router,
};
use coach_booking::models::{PaymentCallback, PaymentConfirmation};
use coach_core::payment::PaymentUrl;
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/payments/vnpay/url", get(payment_url))
        .route("/v1/payments/vnpay/callback", post(payment_callback))
}

/// Caller address for the gateway: first `X-Forwarded-For` hop, then the
/// socket peer.
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let ip = forwarded
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| "127.0.0.1".to_string());
        Ok(ClientIp(ip))
    }
}

#[derive(Debug, Default, Deserialize)]
struct PaymentUrlQuery {
    #[serde(default)]
    booking_code: String,
}

async fn payment_url(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    query: Result<Query<PaymentUrlQuery>, QueryRejection>,
) -> ApiResult<Json<PaymentUrl>> {
    let Query(query) = query?;
    Ok(Json(state.payments.build_payment_url(&query.booking_code, &ip).await?))
}

async fn payment_callback(
    State(state): State<AppState>,
    payload: Result<Json<PaymentCallback>, JsonRejection>,
) -> ApiResult<Json<PaymentConfirmation>> {
    let Json(callback) = payload?;

    match state.payments.handle_callback(callback).await {
        Ok(confirmation) => {
            state.metrics.record_callback("confirmed");
            Ok(Json(confirmation))
        }
        Err(e) => {
            state.metrics.record_callback(e.code());
            Err(e.into())
        }
    }
}
