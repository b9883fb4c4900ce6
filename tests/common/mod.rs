#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use stationery_api::{
    auth,
    carts::{InMemoryCartStore, SessionCartStore},
    config::AppConfig,
    db,
    entities::{product, user},
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    message_queue::{InMemoryMessageQueue, MessageQueue},
    services::gateway::{
        CheckoutSessionData, CreateSessionRequest, PaymentGateway, PaymentSessionStatus,
        SessionVerification,
    },
    services::notifications::RecordingMailer,
    AppState,
};

pub const TEST_JWT_SECRET: &str = "integration_test_jwt_secret_0123456789abcdef";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_integration_test_secret";

/// Programmable in-memory payment provider.
#[derive(Default)]
pub struct StubGateway {
    sessions: Mutex<HashMap<String, SessionVerification>>,
    created: Mutex<Vec<CreateSessionRequest>>,
    fail_calls: Mutex<bool>,
}

impl StubGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every gateway call fail as if the provider were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.fail_calls.lock().unwrap() = unavailable;
    }

    pub fn set_status(&self, session_id: &str, status: PaymentSessionStatus) {
        let confirmation_ref = match status {
            PaymentSessionStatus::Paid => Some(format!("pi_{}", &session_id[3..])),
            _ => None,
        };
        self.sessions.lock().unwrap().insert(
            session_id.to_string(),
            SessionVerification {
                status,
                confirmation_ref,
            },
        );
    }

    pub fn created_requests(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSessionData, ServiceError> {
        if *self.fail_calls.lock().unwrap() {
            return Err(ServiceError::GatewayUnavailable(
                "stub provider down".to_string(),
            ));
        }

        let id = format!("cs_{}", Uuid::new_v4().simple());
        self.sessions.lock().unwrap().insert(
            id.clone(),
            SessionVerification {
                status: PaymentSessionStatus::Unpaid,
                confirmation_ref: None,
            },
        );
        self.created.lock().unwrap().push(request);

        Ok(CheckoutSessionData {
            url: format!("https://pay.example.com/c/{}", id),
            id,
        })
    }

    async fn retrieve_session(
        &self,
        session_id: &str,
    ) -> Result<SessionVerification, ServiceError> {
        if *self.fail_calls.lock().unwrap() {
            return Err(ServiceError::GatewayUnavailable(
                "stub provider down".to_string(),
            ));
        }

        Ok(self
            .sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or(SessionVerification {
                status: PaymentSessionStatus::Unpaid,
                confirmation_ref: None,
            }))
    }
}

/// Harness spinning up the application over an in-memory SQLite database.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub gateway: Arc<StubGateway>,
    pub mailer: Arc<RecordingMailer>,
    pub queue: Arc<InMemoryMessageQueue>,
    pub cart_store: Arc<InMemoryCartStore>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.checkout_webhook_secret = Some(TEST_WEBHOOK_SECRET.to_string());
        cfg.operator_email = Some("orders@stationery.example.com".to_string());

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(StubGateway::new());
        let mailer = Arc::new(RecordingMailer::new());
        let queue = Arc::new(InMemoryMessageQueue::new());
        let cart_store = Arc::new(InMemoryCartStore::new());

        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            gateway.clone() as Arc<dyn PaymentGateway>,
            cart_store.clone() as Arc<dyn SessionCartStore>,
            queue.clone() as Arc<dyn MessageQueue>,
            mailer.clone(),
            cfg.operator_email.clone(),
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", stationery_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            gateway,
            mailer,
            queue,
            cart_store,
            _event_task: event_task,
        }
    }

    /// Bearer token for a seeded user.
    pub fn token_for(&self, user: &user::Model) -> String {
        auth::issue_token(
            TEST_JWT_SECRET,
            user.id,
            &user.email,
            &user.name,
            Duration::hours(1),
        )
        .expect("token encoding")
    }

    pub async fn seed_user(&self, name: &str, email: &str) -> user::Model {
        let now = Utc::now();
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            email: Set(email.to_string()),
            shipping_address: Set(Some("1-2-3 Paper St, Inktown".to_string())),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user")
    }

    pub async fn seed_product(&self, name: &str, code: &str, price: i64) -> product::Model {
        self.seed_product_with_active(name, code, price, true).await
    }

    pub async fn seed_product_with_active(
        &self,
        name: &str,
        code: &str,
        price: i64,
        is_active: bool,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            code: Set(code.to_string()),
            description: Set(None),
            price: Set(price),
            image_url: Set(None),
            category: Set(Some("stationery".to_string())),
            is_active: Set(is_active),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Raw request with arbitrary headers, used by the webhook tests.
    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = builder.body(Body::from(body)).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

/// Decode a response body as JSON.
pub async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}

/// Assert helper: response status with a readable failure message.
pub async fn expect_status(response: axum::response::Response, expected: StatusCode) -> Value {
    let status = response.status();
    let body = json_body(response).await;
    assert_eq!(status, expected, "unexpected status, body: {}", body);
    body
}
