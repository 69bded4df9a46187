use axum::{
    extract::{rejection::QueryRejection, Query, State},
    middleware,
    routing::get,
    Extension, Json, Router,
};
use coach_booking::models::{RefundView, TicketDetails};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::middleware::{customer_auth_middleware, Claims};
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    let me = Router::new()
        .route("/v1/customers/me/tickets", get(my_tickets))
        .route("/v1/customers/me/refunds", get(my_refunds))
        .route_layer(middleware::from_fn_with_state(state, customer_auth_middleware));

    Router::new()
        .route("/v1/tickets/search", get(search_ticket))
        .merge(me)
}

#[derive(Debug, Default, Deserialize)]
struct TicketSearch {
    #[serde(default)]
    ticket_code: String,
    #[serde(default)]
    phone: String,
}

async fn search_ticket(
    State(state): State<AppState>,
    query: Result<Query<TicketSearch>, QueryRejection>,
) -> ApiResult<Json<TicketDetails>> {
    let Query(search) = query?;
    Ok(Json(
        state
            .lookups
            .search_ticket(&search.ticket_code, &search.phone)
            .await?,
    ))
}

async fn my_tickets(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<TicketDetails>>> {
    let customer_id = claims.subject_id()?;
    Ok(Json(state.lookups.list_customer_tickets(customer_id).await?))
}

async fn my_refunds(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<RefundView>>> {
    let customer_id = claims.subject_id()?;
    Ok(Json(state.lookups.list_customer_refunds(customer_id).await?))
}
