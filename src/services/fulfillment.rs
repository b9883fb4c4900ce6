//! The single authoritative routine that converts a pending order into a
//! completed order with line items.
//!
//! Both reconciliation triggers (the browser-return redirect and the
//! webhook worker) call `fulfill` for the same order, possibly at the same
//! time. Correctness rests on the exclusive row lock and the status
//! re-check under that lock, not on either caller trying to out-guess the
//! other.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, DatabaseTransaction, EntityTrait, QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, PaymentStatus},
        order_item::{self, Entity as OrderItemEntity},
        user::Entity as UserEntity,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        gateway::PaymentGateway,
        notifications::{NotificationSender, OrderEmailContext},
        orders::OrderService,
    },
};

/// How a `fulfill` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// This call performed the `pending -> completed` transition.
    Fulfilled,
    /// The order was already `completed`; idempotent no-op.
    AlreadyFulfilled,
    /// The gateway reported the session is not paid; order left `pending`.
    PaymentIncomplete,
    /// A fault occurred and the order was driven to `failed`.
    Failed,
}

/// Outcome of a fulfillment attempt.
#[derive(Debug, Clone)]
pub struct FulfillmentOutcome {
    pub disposition: Disposition,
    pub message: String,
}

impl FulfillmentOutcome {
    fn new(disposition: Disposition, message: impl Into<String>) -> Self {
        Self {
            disposition,
            message: message.into(),
        }
    }

    pub fn success(&self) -> bool {
        matches!(
            self.disposition,
            Disposition::Fulfilled | Disposition::AlreadyFulfilled
        )
    }

    pub fn already_processed(&self) -> bool {
        self.disposition == Disposition::AlreadyFulfilled
    }
}

enum Completion {
    Performed(order::Model),
    AlreadyDone,
    TerminalFailure,
}

#[derive(Clone)]
pub struct FulfillmentService {
    db: Arc<DbPool>,
    orders: Arc<OrderService>,
    gateway: Arc<dyn PaymentGateway>,
    mailer: Arc<dyn NotificationSender>,
    event_sender: Option<Arc<EventSender>>,
    operator_email: Option<String>,
}

impl FulfillmentService {
    pub fn new(
        db: Arc<DbPool>,
        orders: Arc<OrderService>,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn NotificationSender>,
        event_sender: Option<Arc<EventSender>>,
        operator_email: Option<String>,
    ) -> Self {
        Self {
            db,
            orders,
            gateway,
            mailer,
            event_sender,
            operator_email,
        }
    }

    /// Convert a pending order into a completed order with line items.
    ///
    /// Safe to invoke concurrently and repeatedly for the same order id.
    /// When `session_id` is given, the gateway is asked to confirm payment
    /// before anything is touched; the gateway call deliberately happens
    /// outside the row lock.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn fulfill(
        &self,
        order_id: Uuid,
        session_id: Option<&str>,
    ) -> Result<FulfillmentOutcome, ServiceError> {
        let mut confirmation_ref = None;

        if let Some(session_id) = session_id {
            let verification = self.gateway.retrieve_session(session_id).await?;
            if !verification.status.is_paid() {
                warn!(
                    session_id,
                    status = verification.status.as_str(),
                    "payment not completed, leaving order pending"
                );
                return Ok(FulfillmentOutcome::new(
                    Disposition::PaymentIncomplete,
                    "payment has not been completed",
                ));
            }
            confirmation_ref = verification.confirmation_ref;
        }

        match self.complete_order(order_id, confirmation_ref).await {
            Ok(Completion::Performed(order)) => {
                if let Some(sender) = &self.event_sender {
                    sender.send_or_log(Event::OrderCompleted(order_id)).await;
                }
                // Outside the transaction: a slow or failing mail provider
                // must not roll back the financial state.
                self.send_order_emails(&order).await;
                Ok(FulfillmentOutcome::new(
                    Disposition::Fulfilled,
                    "order fulfilled",
                ))
            }
            Ok(Completion::AlreadyDone) => {
                info!("order already processed");
                Ok(FulfillmentOutcome::new(
                    Disposition::AlreadyFulfilled,
                    "order already processed",
                ))
            }
            Ok(Completion::TerminalFailure) => Ok(FulfillmentOutcome::new(
                Disposition::Failed,
                "order is in a terminal failed state",
            )),
            Err(err @ ServiceError::MissingOrderReference(_)) => Err(err),
            Err(err) => {
                error!(error = %err, "fulfillment aborted, marking order failed");
                if let Err(mark_err) = self
                    .orders
                    .mark_failed(order_id, &err.to_string())
                    .await
                {
                    error!(error = %mark_err, "failed to record order failure");
                }
                Ok(FulfillmentOutcome::new(
                    Disposition::Failed,
                    "order processing failed",
                ))
            }
        }
    }

    /// Steps 2-7: the transactional core. Everything here runs under an
    /// exclusive row lock on the order; any error aborts the transaction
    /// leaving the order untouched.
    async fn complete_order(
        &self,
        order_id: Uuid,
        confirmation_ref: Option<String>,
    ) -> Result<Completion, ServiceError> {
        let txn = self.db.begin().await?;

        // The lock serializes racing reconciliation triggers for this order.
        let locked = OrderEntity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::MissingOrderReference(order_id.to_string()))?;

        // Mandatory re-check under the lock: the other path may have
        // completed between the caller's pre-check and lock acquisition.
        match locked.payment_status {
            PaymentStatus::Completed => {
                txn.commit().await?;
                return Ok(Completion::AlreadyDone);
            }
            PaymentStatus::Failed => {
                txn.commit().await?;
                return Ok(Completion::TerminalFailure);
            }
            PaymentStatus::Pending => {}
        }

        locked.cart_snapshot.validate()?;

        let snapshot = locked.cart_snapshot.clone();
        let existing_confirmation = locked.payment_confirmation_ref.clone();
        let now = Utc::now();

        let mut active: order::ActiveModel = locked.into();
        active.payment_status = Set(PaymentStatus::Completed);
        active.payment_confirmation_ref = Set(confirmation_ref.or(existing_confirmation));
        active.updated_at = Set(Some(now));
        let completed = active.update(&txn).await?;

        self.insert_line_items(&txn, &completed, &snapshot, now)
            .await?;

        txn.commit().await?;

        info!(total_price = completed.total_price, "order completed");
        Ok(Completion::Performed(completed))
    }

    /// One line item per snapshot entry, inserted as a single batch with a
    /// shared creation timestamp.
    async fn insert_line_items(
        &self,
        txn: &DatabaseTransaction,
        order: &order::Model,
        snapshot: &crate::carts::CartSnapshot,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let items: Vec<order_item::ActiveModel> = snapshot
            .items
            .iter()
            .map(|(product_id, line)| order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(*product_id),
                quantity: Set(line.quantity),
                price: Set(line.unit_price),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            })
            .collect();

        OrderItemEntity::insert_many(items).exec(txn).await?;
        Ok(())
    }

    /// Customer confirmation plus operator alert. Failures are logged and
    /// never affect the caller's result.
    async fn send_order_emails(&self, order: &order::Model) {
        let customer = match UserEntity::find_by_id(order.user_id).one(&*self.db).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                error!(order_id = %order.id, user_id = %order.user_id, "user missing, skipping order emails");
                return;
            }
            Err(err) => {
                error!(order_id = %order.id, error = %err, "user lookup failed, skipping order emails");
                return;
            }
        };

        let context = OrderEmailContext::new(order.id, &customer, &order.cart_snapshot);

        if let Err(err) = self
            .mailer
            .send_order_confirmation(&customer.email, &context)
            .await
        {
            warn!(order_id = %order.id, error = %err, "order confirmation mail failed");
        }

        match &self.operator_email {
            Some(operator) => {
                if let Err(err) = self.mailer.send_operator_alert(operator, &context).await {
                    warn!(order_id = %order.id, error = %err, "operator alert mail failed");
                }
            }
            None => {
                warn!(order_id = %order.id, "operator email not configured, skipping alert");
            }
        }
    }
}
