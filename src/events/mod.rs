use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the checkout pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// A pending order was created from a cart snapshot.
    OrderCreated(Uuid),
    /// A hosted checkout session was created and attached to an order.
    PaymentSessionCreated {
        order_id: Uuid,
        session_ref: String,
    },
    /// An order reached the terminal `completed` state with line items.
    OrderCompleted(Uuid),
    /// An order was driven to the terminal `failed` state.
    OrderFailed {
        order_id: Uuid,
        reason: String,
    },
    /// A webhook event was accepted and queued for background processing.
    WebhookAccepted {
        order_id: Uuid,
        session_ref: String,
    },
}

/// Cloneable handle for publishing events to the in-process consumer.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, surfacing channel failures to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("failed to send event: {}", e))
    }

    /// Sends an event; a closed or full channel is logged and swallowed.
    /// Event delivery is never allowed to fail business operations.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "dropping domain event");
        }
    }
}

/// Consumer loop for domain events. Runs until every sender handle is gone.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "event: order created");
            }
            Event::PaymentSessionCreated {
                order_id,
                session_ref,
            } => {
                info!(order_id = %order_id, session_ref = %session_ref, "event: payment session created");
            }
            Event::OrderCompleted(order_id) => {
                info!(order_id = %order_id, "event: order completed");
            }
            Event::OrderFailed { order_id, reason } => {
                warn!(order_id = %order_id, reason = %reason, "event: order failed");
            }
            Event::WebhookAccepted {
                order_id,
                session_ref,
            } => {
                info!(order_id = %order_id, session_ref = %session_ref, "event: webhook accepted");
            }
        }
    }
}
