//! Checkout initiation plus the browser-return reconciliation entry point.
//!
//! The browser return and the payment webhook both funnel into
//! `FulfillmentService::fulfill`; neither path carries any fulfillment
//! logic of its own.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use sea_orm::EntityTrait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    carts::CartSnapshot,
    entities::{
        order::PaymentMethod,
        user::Entity as UserEntity,
    },
    errors::ServiceError,
    handlers::common::{created_response, success_response},
    services::fulfillment::Disposition,
    services::gateway::{CreateSessionRequest, DisplayLineItem},
    AppState,
};

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/session", post(create_checkout_session))
        .route("/return", get(checkout_return))
        .route("/cancel", get(checkout_cancel))
}

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Serialize)]
pub struct CheckoutSessionResponse {
    pub order_id: Uuid,
    /// Present only for hosted checkout: where to send the browser.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ReturnQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutReturnResponse {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    pub message: String,
}

/// Start checkout: freeze the cart into a snapshot, create the pending
/// order, and either fulfill directly (cash on delivery) or hand off to the
/// hosted payment page.
async fn create_checkout_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateCheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    // Checkout requires a user record; tokens alone are not enough to ship.
    let customer = UserEntity::find_by_id(user.id)
        .one(&*state.db)
        .await?
        .ok_or_else(|| ServiceError::Unauthorized("unknown customer account".into()))?;

    let cart = state.services.cart_store.get(&user.cart_key()).await?;
    let snapshot = CartSnapshot::capture(&cart)?;

    let order = state
        .services
        .orders
        .create_pending(customer.id, payload.payment_method, snapshot.clone())
        .await?;

    match payload.payment_method {
        PaymentMethod::CashOnDelivery => {
            // No gateway involved: fulfill immediately, same routine as the
            // reconciliation paths.
            let outcome = state.services.fulfillment.fulfill(order.id, None).await?;
            if outcome.success() {
                state.services.cart_store.clear(&user.cart_key()).await?;
            }

            Ok(created_response(CheckoutSessionResponse {
                order_id: order.id,
                redirect_url: None,
                status: if outcome.success() {
                    "completed".to_string()
                } else {
                    "failed".to_string()
                },
            }))
        }
        PaymentMethod::HostedCheckout => {
            let line_items = snapshot
                .items
                .values()
                .map(|line| DisplayLineItem {
                    name: line.name.clone(),
                    unit_amount: line.unit_price,
                    quantity: line.quantity,
                })
                .collect();

            let session = state
                .services
                .gateway
                .create_session(CreateSessionRequest {
                    order_id: order.id,
                    customer_email: customer.email.clone(),
                    line_items,
                })
                .await?;

            state
                .services
                .orders
                .attach_payment_session(order.id, &session.id)
                .await?;

            Ok(created_response(CheckoutSessionResponse {
                order_id: order.id,
                redirect_url: Some(session.url),
                status: "pending".to_string(),
            }))
        }
    }
}

/// Browser-return reconciliation entry point. The customer lands here after
/// the hosted payment page; the webhook may already have fulfilled the
/// order, or may never arrive at all.
async fn checkout_return(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ReturnQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let session_id = query.session_id.filter(|s| !s.is_empty()).ok_or_else(|| {
        warn!("checkout return without a session id");
        ServiceError::BadRequest("payment session reference missing".to_string())
    })?;

    // A reference that resolves to no order is an integrity signal (forged
    // or stale), not something to ignore.
    let order = state
        .services
        .orders
        .find_by_session_ref(&session_id)
        .await?
        .ok_or_else(|| ServiceError::MissingOrderReference(session_id.clone()))?;

    let outcome = state
        .services
        .fulfillment
        .fulfill(order.id, Some(&session_id))
        .await?;

    let response = match outcome.disposition {
        Disposition::Fulfilled | Disposition::AlreadyFulfilled => {
            state.services.cart_store.clear(&user.cart_key()).await?;
            CheckoutReturnResponse {
                state: "success".to_string(),
                order_id: Some(order.id),
                message: "your order has been placed".to_string(),
            }
        }
        Disposition::PaymentIncomplete => CheckoutReturnResponse {
            state: "pending".to_string(),
            order_id: Some(order.id),
            message: "payment has not been completed yet".to_string(),
        },
        Disposition::Failed => CheckoutReturnResponse {
            state: "error".to_string(),
            order_id: Some(order.id),
            message: "we could not finalize your order".to_string(),
        },
    };

    Ok(success_response(response))
}

/// The provider redirects here when the customer abandons payment. Nothing
/// to reconcile; the order stays pending.
async fn checkout_cancel() -> impl IntoResponse {
    success_response(CheckoutReturnResponse {
        state: "cancelled".to_string(),
        order_id: None,
        message: "payment was cancelled".to_string(),
    })
}
