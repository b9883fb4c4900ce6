use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use sea_orm::EntityTrait;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    carts::SessionCart,
    entities::product::Entity as ProductEntity,
    errors::ServiceError,
    handlers::common::success_response,
    AppState,
};

pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(view_cart))
        .route("/items/:product_id", post(add_item).delete(remove_item))
        .route("/items/:product_id/increment", post(increment_item))
        .route("/items/:product_id/decrement", post(decrement_item))
}

#[derive(Debug, Serialize)]
pub struct CartLineView {
    pub product_id: Uuid,
    pub name: String,
    pub code: String,
    pub image_url: Option<String>,
    pub unit_price: i64,
    pub quantity: i32,
    pub line_total: i64,
}

#[derive(Debug, Serialize)]
pub struct CartView {
    pub items: Vec<CartLineView>,
    pub total_price: i64,
}

impl From<&SessionCart> for CartView {
    fn from(cart: &SessionCart) -> Self {
        let items = cart
            .items
            .iter()
            .map(|(product_id, line)| CartLineView {
                product_id: *product_id,
                name: line.name.clone(),
                code: line.code.clone(),
                image_url: line.image_url.clone(),
                unit_price: line.unit_price,
                quantity: line.quantity,
                line_total: line.unit_price * i64::from(line.quantity),
            })
            .collect();

        Self {
            items,
            total_price: cart.total_price(),
        }
    }
}

async fn view_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart_store.get(&user.cart_key()).await?;
    Ok(success_response(CartView::from(&cart)))
}

/// Add one unit of a product, caching its display data at add time.
async fn add_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = ProductEntity::find_by_id(product_id)
        .one(&*state.db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

    if !product.is_active {
        return Err(ServiceError::BadRequest(
            "this product is not currently available".to_string(),
        ));
    }

    let store = &state.services.cart_store;
    let mut cart = store.get(&user.cart_key()).await?;
    cart.add(&product);
    store.put(&user.cart_key(), &cart).await?;

    Ok(success_response(CartView::from(&cart)))
}

async fn increment_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let store = &state.services.cart_store;
    let mut cart = store.get(&user.cart_key()).await?;

    if !cart.increment(product_id) {
        return Err(ServiceError::NotFound("product is not in the cart".into()));
    }
    store.put(&user.cart_key(), &cart).await?;

    Ok(success_response(CartView::from(&cart)))
}

/// Quantity never drops below one; use remove to drop the line.
async fn decrement_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let store = &state.services.cart_store;
    let mut cart = store.get(&user.cart_key()).await?;

    if !cart.decrement(product_id) {
        return Err(ServiceError::NotFound("product is not in the cart".into()));
    }
    store.put(&user.cart_key(), &cart).await?;

    Ok(success_response(CartView::from(&cart)))
}

async fn remove_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let store = &state.services.cart_store;
    let mut cart = store.get(&user.cart_key()).await?;

    if !cart.remove(product_id) {
        return Err(ServiceError::NotFound("product is not in the cart".into()));
    }
    store.put(&user.cart_key(), &cart).await?;

    Ok(success_response(CartView::from(&cart)))
}
