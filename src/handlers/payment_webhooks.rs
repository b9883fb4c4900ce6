//! Asynchronous reconciliation entry point: the checkout provider delivers
//! signed events out of band, independent of whether the customer's browser
//! ever returns.
//!
//! The handler verifies authenticity, decodes the payload into a closed set
//! of event variants, extracts the order reference, and hands the heavy
//! work to the background queue so the acknowledgment returns quickly.

use axum::{extract::State, http::HeaderMap, response::IntoResponse};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    events::Event,
    message_queue::Message,
    workers::PAYMENT_WEBHOOK_TOPIC,
    AppState,
};

type HmacSha256 = Hmac<Sha256>;

/// Signature header carried by every provider event:
/// `t=<unix-ts>,v1=<hex hmac-sha256 of "{t}.{body}">`.
pub const SIGNATURE_HEADER: &str = "x-checkout-signature";

/// The closed set of provider events this system understands.
#[derive(Debug)]
enum WebhookEvent {
    CheckoutSessionCompleted(CheckoutSessionPayload),
    /// Recognized envelope, unhandled type. Acknowledged and dropped.
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionPayload {
    id: String,
    #[serde(default)]
    metadata: Option<SessionMetadata>,
}

#[derive(Debug, Deserialize)]
struct SessionMetadata {
    #[serde(default)]
    order_id: Option<String>,
}

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Event accepted or acknowledged as unprocessable"),
        (status = 400, description = "Malformed payload", body = crate::errors::ErrorResponse),
        (status = 403, description = "Signature verification failed", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    // Authenticity comes first; nothing below runs on an unverified payload.
    let secret = state
        .config
        .checkout_webhook_secret
        .as_deref()
        .ok_or_else(|| {
            warn!("webhook received but no webhook secret is configured");
            ServiceError::InvalidSignature("webhook secret not configured".to_string())
        })?;

    if !verify_signature(
        &headers,
        &body,
        secret,
        state.config.checkout_webhook_tolerance_secs,
    ) {
        warn!("webhook signature verification failed");
        return Err(ServiceError::InvalidSignature(
            "signature mismatch".to_string(),
        ));
    }

    let envelope: WebhookEnvelope = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid webhook payload: {}", e)))?;

    let event = decode_event(envelope)?;

    let session = match event {
        WebhookEvent::CheckoutSessionCompleted(session) => session,
        WebhookEvent::Unknown(event_type) => {
            info!(event_type, "ignoring unhandled webhook event type");
            return Ok((axum::http::StatusCode::OK, "ignored"));
        }
    };

    // Without an order reference there is nothing to reconcile; acknowledge
    // so the provider does not redeliver a payload we can never process.
    let order_id = match session
        .metadata
        .as_ref()
        .and_then(|m| m.order_id.as_deref())
        .and_then(|raw| Uuid::parse_str(raw).ok())
    {
        Some(order_id) => order_id,
        None => {
            warn!(
                session_id = %session.id,
                "webhook event has no usable order_id metadata"
            );
            return Ok((axum::http::StatusCode::OK, "ignored"));
        }
    };

    let message = Message::new(
        PAYMENT_WEBHOOK_TOPIC,
        json!({
            "order_id": order_id,
            "session_id": session.id,
        }),
    );

    state
        .services
        .queue
        .publish(message)
        .await
        .map_err(|e| ServiceError::QueueError(e.to_string()))?;

    state
        .event_sender
        .send_or_log(Event::WebhookAccepted {
            order_id,
            session_ref: session.id,
        })
        .await;

    Ok((axum::http::StatusCode::OK, "ok"))
}

fn decode_event(envelope: WebhookEnvelope) -> Result<WebhookEvent, ServiceError> {
    if let Some(id) = &envelope.id {
        info!(event_id = %id, event_type = %envelope.event_type, "webhook event received");
    }

    match envelope.event_type.as_str() {
        "checkout.session.completed" => {
            let payload: CheckoutSessionPayload = serde_json::from_value(envelope.data.object)
                .map_err(|e| {
                    ServiceError::BadRequest(format!("invalid checkout session object: {}", e))
                })?;
            Ok(WebhookEvent::CheckoutSessionCompleted(payload))
        }
        other => Ok(WebhookEvent::Unknown(other.to_string())),
    }
}

/// Verify `t=...,v1=...` over `"{t}.{body}"` with a bounded timestamp age.
fn verify_signature(headers: &HeaderMap, payload: &Bytes, secret: &str, tolerance_secs: u64) -> bool {
    let header = match headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok()) {
        Some(value) => value,
        None => return false,
    };

    let (mut ts, mut v1) = ("", "");
    for part in header.split(',') {
        let mut it = part.trim().splitn(2, '=');
        match (it.next(), it.next()) {
            (Some("t"), Some(val)) => ts = val,
            (Some("v1"), Some(val)) => v1 = val,
            _ => {}
        }
    }

    if ts.is_empty() || v1.is_empty() {
        return false;
    }

    // Reject replays of old signatures.
    match ts.parse::<i64>() {
        Ok(ts_i) => {
            let now = chrono::Utc::now().timestamp();
            if (now - ts_i).unsigned_abs() > tolerance_secs {
                return false;
            }
        }
        Err(_) => return false,
    }

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    constant_time_eq(&expected, v1)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Compute the signature header value for a payload. Shared with tests and
/// local tooling that replays provider events.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "whsec_test_secret";

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn valid_signature_passes() {
        let payload = Bytes::from_static(b"{\"type\":\"checkout.session.completed\"}");
        let now = chrono::Utc::now().timestamp();
        let header = sign_payload(SECRET, now, &payload);

        assert!(verify_signature(&headers_with(&header), &payload, SECRET, 300));
    }

    #[test]
    fn tampered_payload_fails() {
        let payload = Bytes::from_static(b"{\"total\":100}");
        let now = chrono::Utc::now().timestamp();
        let header = sign_payload(SECRET, now, &payload);

        let forged = Bytes::from_static(b"{\"total\":1}");
        assert!(!verify_signature(&headers_with(&header), &forged, SECRET, 300));
    }

    #[test]
    fn stale_timestamp_fails() {
        let payload = Bytes::from_static(b"{}");
        let old = chrono::Utc::now().timestamp() - 4000;
        let header = sign_payload(SECRET, old, &payload);

        assert!(!verify_signature(&headers_with(&header), &payload, SECRET, 300));
    }

    #[test]
    fn missing_header_fails() {
        let payload = Bytes::from_static(b"{}");
        assert!(!verify_signature(&HeaderMap::new(), &payload, SECRET, 300));
    }

    #[test]
    fn decode_known_and_unknown_events() {
        let envelope: WebhookEnvelope = serde_json::from_value(serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {"object": {"id": "cs_1", "metadata": {"order_id": Uuid::new_v4()}}}
        }))
        .unwrap();
        assert!(matches!(
            decode_event(envelope).unwrap(),
            WebhookEvent::CheckoutSessionCompleted(_)
        ));

        let envelope: WebhookEnvelope = serde_json::from_value(serde_json::json!({
            "type": "charge.refunded",
            "data": {"object": {}}
        }))
        .unwrap();
        assert!(matches!(
            decode_event(envelope).unwrap(),
            WebhookEvent::Unknown(_)
        ));
    }
}
