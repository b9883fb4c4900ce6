use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Stationery Storefront API",
        version = "0.1.0",
        description = "Catalog browsing, session carts, and checkout with \
hosted card payment or cash on delivery. Payment completion is reconciled \
idempotently from both the browser return redirect and provider webhooks."
    ),
    paths(
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::services::orders::OrderResponse,
        crate::services::orders::OrderItemResponse,
        crate::services::orders::OrderDetailResponse,
    )),
    tags(
        (name = "Orders", description = "Customer order history"),
        (name = "Payments", description = "Payment provider integration")
    )
)]
pub struct ApiDoc;

/// Swagger UI mount for local development.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
