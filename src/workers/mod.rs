//! Background worker that drains queued webhook events and runs
//! fulfillment. Delivery is at-least-once; `fulfill` is idempotent, so a
//! redelivered job is a harmless no-op.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    message_queue::{Message, MessageQueue},
    services::fulfillment::FulfillmentService,
};

pub const PAYMENT_WEBHOOK_TOPIC: &str = "payments.webhook";

/// Idle poll interval when the queue is empty.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Payload queued by the webhook handler.
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookJob {
    pub order_id: Uuid,
    pub session_id: String,
}

/// Spawn the worker loop. Runs until the process shuts down.
pub fn spawn_webhook_worker(
    queue: Arc<dyn MessageQueue>,
    fulfillment: Arc<FulfillmentService>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("payment webhook worker started");
        loop {
            match queue.subscribe(PAYMENT_WEBHOOK_TOPIC).await {
                Ok(Some(message)) => {
                    let message_id = message.id;
                    process_message(message, &fulfillment).await;
                    if let Err(e) = queue.ack(&message_id).await {
                        warn!(error = %e, "failed to ack webhook job");
                    }
                }
                Ok(None) => tokio::time::sleep(IDLE_POLL).await,
                Err(e) => {
                    warn!(error = %e, "queue poll failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    })
}

/// Handle one queued webhook event. Errors are logged, never retried here:
/// the browser-return path and provider redelivery are the system's retry
/// mechanism, and each entry is idempotent.
pub async fn process_message(message: Message, fulfillment: &FulfillmentService) {
    let job: WebhookJob = match serde_json::from_value(message.payload) {
        Ok(job) => job,
        Err(e) => {
            error!(message_id = %message.id, error = %e, "dropping malformed webhook job");
            return;
        }
    };

    match fulfillment
        .fulfill(job.order_id, Some(&job.session_id))
        .await
    {
        Ok(outcome) if outcome.already_processed() => {
            info!(order_id = %job.order_id, "webhook job: order was already processed");
        }
        Ok(outcome) if outcome.success() => {
            info!(order_id = %job.order_id, "webhook job: order fulfilled");
        }
        Ok(outcome) => {
            warn!(
                order_id = %job.order_id,
                message = %outcome.message,
                "webhook job: fulfillment did not complete"
            );
        }
        Err(e) => {
            error!(order_id = %job.order_id, error = %e, "webhook job: fulfillment error");
        }
    }
}
