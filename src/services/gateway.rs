//! Thin adapter to the hosted checkout provider.
//!
//! The gateway is authoritative for exactly one fact: whether a payment
//! session has been paid. The goods being paid for always come from the
//! order's embedded cart snapshot, never from anything in a gateway
//! response.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::{config::AppConfig, errors::ServiceError};

/// Payment state reported by the provider for a checkout session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSessionStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

impl PaymentSessionStatus {
    /// Whether fulfillment may proceed on this status.
    pub fn is_paid(self) -> bool {
        matches!(
            self,
            PaymentSessionStatus::Paid | PaymentSessionStatus::NoPaymentRequired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentSessionStatus::Paid => "paid",
            PaymentSessionStatus::Unpaid => "unpaid",
            PaymentSessionStatus::NoPaymentRequired => "no_payment_required",
        }
    }
}

/// A freshly created checkout session: the provider's id plus the URL the
/// customer's browser is redirected to.
#[derive(Debug, Clone)]
pub struct CheckoutSessionData {
    pub id: String,
    pub url: String,
}

/// Result of a session status lookup.
#[derive(Debug, Clone)]
pub struct SessionVerification {
    pub status: PaymentSessionStatus,
    /// Provider-side payment confirmation reference, present once paid.
    pub confirmation_ref: Option<String>,
}

/// Display-only line item sent to the provider's hosted page.
#[derive(Debug, Clone, Serialize)]
pub struct DisplayLineItem {
    pub name: String,
    pub unit_amount: i64,
    pub quantity: i32,
}

/// Inputs for creating a checkout session.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub order_id: Uuid,
    pub customer_email: String,
    pub line_items: Vec<DisplayLineItem>,
}

/// Adapter trait so the fulfillment pipeline can be exercised against a
/// stub provider in tests.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a hosted checkout session. Purely an external call, no local
    /// state is touched.
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSessionData, ServiceError>;

    /// Retrieve the payment status of an existing session. Used only to
    /// verify payment before fulfilling, never to drive state directly.
    async fn retrieve_session(
        &self,
        session_id: &str,
    ) -> Result<SessionVerification, ServiceError>;
}

#[derive(Serialize)]
struct CreateSessionBody<'a> {
    mode: &'static str,
    success_url: &'a str,
    cancel_url: &'a str,
    customer_email: &'a str,
    metadata: SessionMetadata,
    line_items: &'a [DisplayLineItem],
}

#[derive(Serialize)]
struct SessionMetadata {
    order_id: Uuid,
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    payment_status: Option<PaymentSessionStatus>,
    #[serde(default)]
    payment_intent: Option<String>,
}

/// HTTP client for the hosted checkout provider's session API.
pub struct HostedCheckoutClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
    success_url: String,
    cancel_url: String,
}

impl HostedCheckoutClient {
    pub fn new(cfg: &AppConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.checkout_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client setup: {}", e)))?;

        Ok(Self {
            http,
            api_base: cfg.checkout_api_base.trim_end_matches('/').to_string(),
            secret_key: cfg.checkout_secret_key.clone(),
            success_url: cfg.checkout_success_url.clone(),
            cancel_url: cfg.checkout_cancel_url.clone(),
        })
    }

    fn unavailable(context: &str, err: reqwest::Error) -> ServiceError {
        error!(error = %err, "checkout provider call failed: {}", context);
        ServiceError::GatewayUnavailable(format!("{}: {}", context, err))
    }
}

#[async_trait]
impl PaymentGateway for HostedCheckoutClient {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSessionData, ServiceError> {
        let body = CreateSessionBody {
            mode: "payment",
            success_url: &self.success_url,
            cancel_url: &self.cancel_url,
            customer_email: &request.customer_email,
            metadata: SessionMetadata {
                order_id: request.order_id,
            },
            line_items: &request.line_items,
        };

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::unavailable("session create", e))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ServiceError::GatewayUnavailable(format!(
                "session create returned {}",
                status
            )));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| Self::unavailable("session create decode", e))?;

        let url = session.url.ok_or_else(|| {
            ServiceError::GatewayUnavailable("session create response had no redirect url".into())
        })?;

        Ok(CheckoutSessionData {
            id: session.id,
            url,
        })
    }

    #[instrument(skip(self))]
    async fn retrieve_session(
        &self,
        session_id: &str,
    ) -> Result<SessionVerification, ServiceError> {
        let response = self
            .http
            .get(format!(
                "{}/v1/checkout/sessions/{}",
                self.api_base, session_id
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| Self::unavailable("session retrieve", e))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ServiceError::GatewayUnavailable(format!(
                "session retrieve returned {}",
                status
            )));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| Self::unavailable("session retrieve decode", e))?;

        Ok(SessionVerification {
            status: session.payment_status.unwrap_or(PaymentSessionStatus::Unpaid),
            confirmation_ref: session.payment_intent,
        })
    }
}
