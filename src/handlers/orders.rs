use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    errors::ServiceError,
    handlers::common::success_response,
    AppState, PaginatedResponse,
};

pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
}

#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    10
}

/// The signed-in customer's order history, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    responses(
        (status = 200, description = "Order history page"),
        (status = 401, description = "Missing or invalid bearer token", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<OrdersQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let limit = query.limit.clamp(1, 100);
    let (orders, total) = state
        .services
        .orders
        .list_for_user(user.id, query.page, limit)
        .await?;

    let total_pages = total.div_ceil(limit);
    Ok(success_response(PaginatedResponse {
        items: orders,
        total,
        page: query.page,
        limit,
        total_pages,
    }))
}

/// One order with its line items. Owner-only.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order detail", body = crate::services::orders::OrderDetailResponse),
        (status = 404, description = "Not found or owned by another user", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let detail = state.services.orders.get_for_user(id, user.id).await?;
    Ok(success_response(detail))
}
