use async_trait::async_trait;
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::{carts::CartSnapshot, entities::user};

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// One rendered line of an order email.
#[derive(Debug, Clone)]
pub struct EmailLine {
    pub name: String,
    pub quantity: i32,
    pub unit_price: i64,
}

/// Everything the order mail templates need.
#[derive(Debug, Clone)]
pub struct OrderEmailContext {
    pub order_id: Uuid,
    pub customer_name: String,
    pub lines: Vec<EmailLine>,
    pub total_price: i64,
}

impl OrderEmailContext {
    pub fn new(order_id: Uuid, customer: &user::Model, snapshot: &CartSnapshot) -> Self {
        let lines = snapshot
            .items
            .values()
            .map(|line| EmailLine {
                name: line.name.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
            })
            .collect();

        Self {
            order_id,
            customer_name: customer.name.clone(),
            lines,
            total_price: snapshot.total_price(),
        }
    }
}

/// Outbound order notifications. Fire-and-forget from the pipeline's point
/// of view: callers log failures and never propagate them.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Confirmation mail to the customer who placed the order.
    async fn send_order_confirmation(
        &self,
        recipient: &str,
        context: &OrderEmailContext,
    ) -> Result<(), NotificationError>;

    /// Alert mail to the store operator.
    async fn send_operator_alert(
        &self,
        recipient: &str,
        context: &OrderEmailContext,
    ) -> Result<(), NotificationError>;
}

/// Development sender that renders notifications into the log stream
/// instead of talking to a mail provider.
#[derive(Debug, Default)]
pub struct TracingMailer;

impl TracingMailer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationSender for TracingMailer {
    async fn send_order_confirmation(
        &self,
        recipient: &str,
        context: &OrderEmailContext,
    ) -> Result<(), NotificationError> {
        info!(
            order_id = %context.order_id,
            recipient,
            total_price = context.total_price,
            lines = context.lines.len(),
            "order confirmation mail"
        );
        Ok(())
    }

    async fn send_operator_alert(
        &self,
        recipient: &str,
        context: &OrderEmailContext,
    ) -> Result<(), NotificationError> {
        info!(
            order_id = %context.order_id,
            recipient,
            customer = %context.customer_name,
            total_price = context.total_price,
            "operator order alert"
        );
        Ok(())
    }
}

/// Test double that records every send and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    pub confirmations: Mutex<Vec<(String, Uuid)>>,
    pub operator_alerts: Mutex<Vec<(String, Uuid)>>,
    pub fail_sends: Mutex<bool>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.fail_sends.lock().unwrap() = failing;
    }

    pub fn confirmation_count(&self) -> usize {
        self.confirmations.lock().unwrap().len()
    }

    pub fn operator_alert_count(&self) -> usize {
        self.operator_alerts.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationSender for RecordingMailer {
    async fn send_order_confirmation(
        &self,
        recipient: &str,
        context: &OrderEmailContext,
    ) -> Result<(), NotificationError> {
        if *self.fail_sends.lock().unwrap() {
            return Err(NotificationError::Delivery("smtp unreachable".into()));
        }
        self.confirmations
            .lock()
            .unwrap()
            .push((recipient.to_string(), context.order_id));
        Ok(())
    }

    async fn send_operator_alert(
        &self,
        recipient: &str,
        context: &OrderEmailContext,
    ) -> Result<(), NotificationError> {
        if *self.fail_sends.lock().unwrap() {
            return Err(NotificationError::Delivery("smtp unreachable".into()));
        }
        self.operator_alerts
            .lock()
            .unwrap()
            .push((recipient.to_string(), context.order_id));
        Ok(())
    }
}
