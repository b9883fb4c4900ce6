use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{http::HeaderValue, Router};
use tokio::{signal, sync::mpsc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use stationery_api as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // In-process domain events
    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // Redis is only dialed when a backend actually asks for it
    let redis_client = Arc::new(redis::Client::open(cfg.redis_url.clone())?);

    let cart_store: Arc<dyn api::carts::SessionCartStore> =
        match cfg.cart_store_backend.to_ascii_lowercase().as_str() {
            "redis" => Arc::new(api::carts::RedisCartStore::new(
                redis_client.clone(),
                cfg.cart_store_namespace.clone(),
                Duration::from_secs(cfg.cart_ttl_secs),
            )),
            _ => Arc::new(api::carts::InMemoryCartStore::new()),
        };

    let queue: Arc<dyn api::message_queue::MessageQueue> =
        match cfg.message_queue_backend.to_ascii_lowercase().as_str() {
            "redis" => Arc::new(api::message_queue::RedisMessageQueue::new(
                redis_client.clone(),
                cfg.message_queue_namespace.clone(),
            )),
            _ => Arc::new(api::message_queue::InMemoryMessageQueue::new()),
        };

    let gateway: Arc<dyn api::services::gateway::PaymentGateway> =
        Arc::new(api::services::gateway::HostedCheckoutClient::new(&cfg)?);

    let mailer: Arc<dyn api::services::notifications::NotificationSender> =
        Arc::new(api::services::notifications::TracingMailer::new());

    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        Arc::new(event_sender.clone()),
        gateway,
        cart_store,
        queue.clone(),
        mailer,
        cfg.operator_email.clone(),
    );

    // Background reconciliation worker for queued webhook events
    api::workers::spawn_webhook_worker(queue, services.fulfillment.clone());

    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        event_sender,
        services,
    };

    // CORS from config; permissive only in development
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    let cors_layer = if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.is_development() {
        CorsLayer::permissive()
    } else {
        error!("missing CORS configuration; set APP__CORS_ALLOWED_ORIGINS");
        return Err("missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS".into());
    };

    let app = Router::new()
        .route("/", axum::routing::get(|| async { "stationery-api up" }))
        .nest("/api/v1", api::api_v1_routes())
        .merge(api::openapi::swagger_ui())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    info!("stationery-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
