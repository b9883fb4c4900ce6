//! End-to-end storefront flow over HTTP: cart CRUD, checkout with both
//! payment methods, browser-return reconciliation, and order history.

mod common;

use axum::http::{Method, StatusCode};
use common::{expect_status, TestApp};
use serde_json::json;

use stationery_api::services::gateway::PaymentSessionStatus;

#[tokio::test]
async fn cart_crud_round_trip() {
    let app = TestApp::new().await;
    let user = app.seed_user("Mei", "mei@example.com").await;
    let token = app.token_for(&user);
    let pen = app.seed_product("Fountain Pen", "PEN-1", 1500).await;
    let ink = app.seed_product("Ink Bottle", "INK-1", 800).await;

    // Add two pens and one ink bottle.
    for _ in 0..2 {
        let response = app
            .request(
                Method::POST,
                &format!("/api/v1/cart/items/{}", pen.id),
                None,
                Some(&token),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/cart/items/{}", ink.id),
            None,
            Some(&token),
        )
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["total_price"], 3800);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);

    // Decrement below one is a floor, not a removal.
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/cart/items/{}/decrement", ink.id),
            None,
            Some(&token),
        )
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["total_price"], 3800);

    // Remove the ink line entirely.
    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/cart/items/{}", ink.id),
            None,
            Some(&token),
        )
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["total_price"], 3000);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    // Unknown product cannot be incremented.
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/cart/items/{}/increment", uuid::Uuid::new_v4()),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn inactive_products_cannot_be_added() {
    let app = TestApp::new().await;
    let user = app.seed_user("Mei", "mei@example.com").await;
    let token = app.token_for(&user);
    let retired = app
        .seed_product_with_active("Discontinued Notebook", "NB-X", 900, false)
        .await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/cart/items/{}", retired.id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cart_requires_authentication() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/api/v1/cart", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn checkout_with_empty_cart_is_rejected() {
    let app = TestApp::new().await;
    let user = app.seed_user("Mei", "mei@example.com").await;
    let token = app.token_for(&user);

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/session",
            Some(json!({"payment_method": "hosted_checkout"})),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cash_on_delivery_checkout_completes_and_clears_the_cart() {
    let app = TestApp::new().await;
    let user = app.seed_user("Mei", "mei@example.com").await;
    let token = app.token_for(&user);
    let pen = app.seed_product("Brush Pen", "PEN-2", 400).await;

    app.request(
        Method::POST,
        &format!("/api/v1/cart/items/{}", pen.id),
        None,
        Some(&token),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/session",
            Some(json!({"payment_method": "cash_on_delivery"})),
            Some(&token),
        )
        .await;
    let body = expect_status(response, StatusCode::CREATED).await;
    assert_eq!(body["status"], "completed");
    assert!(body.get("redirect_url").is_none());

    // Cart is cleared after the successful acknowledgment.
    let response = app.request(Method::GET, "/api/v1/cart", None, Some(&token)).await;
    let body = expect_status(response, StatusCode::OK).await;
    assert!(body["items"].as_array().unwrap().is_empty());

    // Cash on delivery never touches the gateway.
    assert_eq!(app.gateway.created_requests(), 0);
}

#[tokio::test]
async fn hosted_checkout_round_trip_through_browser_return() {
    let app = TestApp::new().await;
    let user = app.seed_user("Mei", "mei@example.com").await;
    let token = app.token_for(&user);
    let notebook = app.seed_product("Grid Notebook", "NB-1", 650).await;

    app.request(
        Method::POST,
        &format!("/api/v1/cart/items/{}", notebook.id),
        None,
        Some(&token),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/session",
            Some(json!({"payment_method": "hosted_checkout"})),
            Some(&token),
        )
        .await;
    let body = expect_status(response, StatusCode::CREATED).await;
    assert_eq!(body["status"], "pending");
    let redirect_url = body["redirect_url"].as_str().unwrap();
    let session_id = redirect_url.rsplit('/').next().unwrap().to_string();
    let order_id = body["order_id"].as_str().unwrap().to_string();

    // Customer returns before paying: order stays pending.
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/checkout/return?session_id={}", session_id),
            None,
            Some(&token),
        )
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["state"], "pending");

    // Provider marks the session paid; the redirect lands again.
    app.gateway.set_status(&session_id, PaymentSessionStatus::Paid);
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/checkout/return?session_id={}", session_id),
            None,
            Some(&token),
        )
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["state"], "success");
    assert_eq!(body["order_id"].as_str().unwrap(), order_id);

    // Cart cleared, order visible in history with its line item.
    let response = app.request(Method::GET, "/api/v1/cart", None, Some(&token)).await;
    let body = expect_status(response, StatusCode::OK).await;
    assert!(body["items"].as_array().unwrap().is_empty());

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
            Some(&token),
        )
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["payment_status"], "completed");
    assert_eq!(body["total_price"], 650);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn browser_return_with_unknown_session_is_an_error() {
    let app = TestApp::new().await;
    let user = app.seed_user("Mei", "mei@example.com").await;
    let token = app.token_for(&user);

    let response = app
        .request(
            Method::GET,
            "/api/v1/checkout/return?session_id=cs_forged",
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .request(Method::GET, "/api/v1/checkout/return", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn gateway_outage_during_checkout_is_surfaced_as_retryable() {
    let app = TestApp::new().await;
    let user = app.seed_user("Mei", "mei@example.com").await;
    let token = app.token_for(&user);
    let pen = app.seed_product("Gel Pen", "PEN-3", 150).await;

    app.request(
        Method::POST,
        &format!("/api/v1/cart/items/{}", pen.id),
        None,
        Some(&token),
    )
    .await;

    app.gateway.set_unavailable(true);
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/session",
            Some(json!({"payment_method": "hosted_checkout"})),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    // The cart is untouched so the customer can retry.
    let response = app.request(Method::GET, "/api/v1/cart", None, Some(&token)).await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn order_history_is_scoped_to_the_owner() {
    let app = TestApp::new().await;
    let mei = app.seed_user("Mei", "mei@example.com").await;
    let rin = app.seed_user("Rin", "rin@example.com").await;
    let mei_token = app.token_for(&mei);
    let rin_token = app.token_for(&rin);
    let pen = app.seed_product("Marker", "MRK-1", 220).await;

    app.request(
        Method::POST,
        &format!("/api/v1/cart/items/{}", pen.id),
        None,
        Some(&mei_token),
    )
    .await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/session",
            Some(json!({"payment_method": "cash_on_delivery"})),
            Some(&mei_token),
        )
        .await;
    let body = expect_status(response, StatusCode::CREATED).await;
    let order_id = body["order_id"].as_str().unwrap().to_string();

    // The owner sees it.
    let response = app
        .request(Method::GET, "/api/v1/orders", None, Some(&mei_token))
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["total"], 1);

    // Another customer sees an empty history and cannot read the order.
    let response = app
        .request(Method::GET, "/api/v1/orders", None, Some(&rin_token))
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["total"], 0);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
            Some(&rin_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn product_listing_filters_and_sorts() {
    let app = TestApp::new().await;
    app.seed_product("Kraft Envelope", "ENV-1", 120).await;
    app.seed_product("Linen Envelope", "ENV-2", 340).await;
    app.seed_product_with_active("Hidden Envelope", "ENV-3", 200, false)
        .await;

    let response = app
        .request(Method::GET, "/api/v1/products", None, None)
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    // Inactive products never appear.
    assert_eq!(body["total"], 2);

    let response = app
        .request(
            Method::GET,
            "/api/v1/products?search=Linen&min_price=300",
            None,
            None,
        )
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["code"], "ENV-2");

    let response = app
        .request(
            Method::GET,
            "/api/v1/products?sort=price&direction=asc",
            None,
            None,
        )
        .await;
    let body = expect_status(response, StatusCode::OK).await;
    assert_eq!(body["items"][0]["code"], "ENV-1");

    // Inverted price range is a validation error.
    let response = app
        .request(
            Method::GET,
            "/api/v1/products?min_price=500&max_price=100",
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
