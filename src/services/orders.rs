use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    carts::CartSnapshot,
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, PaymentMethod, PaymentStatus},
        order_item::{self, Entity as OrderItemEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Order aggregate operations: creation of pending orders, payment-session
/// attachment, lookups, and the customer-facing read model. Terminal state
/// transitions live in the fulfillment service.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub payment_method: PaymentMethod,
    pub total_price: i64,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderDetailResponse {
    #[serde(flatten)]
    pub order: OrderResponse,
    pub items: Vec<OrderItemResponse>,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Create a `pending` order carrying the frozen cart snapshot and its
    /// total. The snapshot is the only cart data fulfillment will ever see.
    #[instrument(skip(self, snapshot), fields(user_id = %user_id))]
    pub async fn create_pending(
        &self,
        user_id: Uuid,
        payment_method: PaymentMethod,
        snapshot: CartSnapshot,
    ) -> Result<order::Model, ServiceError> {
        if snapshot.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let total_price = snapshot.total_price();

        let txn = self.db.begin().await?;

        let model = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            payment_method: Set(payment_method),
            total_price: Set(total_price),
            payment_status: Set(PaymentStatus::Pending),
            payment_session_ref: Set(None),
            payment_confirmation_ref: Set(None),
            cart_snapshot: Set(snapshot),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(order_id = %order_id, total_price, "pending order created");

        if let Some(sender) = &self.event_sender {
            sender.send_or_log(Event::OrderCreated(order_id)).await;
        }

        Ok(model)
    }

    /// Attach the external payment session reference to a pending order.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn attach_payment_session(
        &self,
        order_id: Uuid,
        session_ref: &str,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.payment_status != PaymentStatus::Pending {
            return Err(ServiceError::BadRequest(
                "payment session can only be attached to a pending order".to_string(),
            ));
        }

        let mut active: order::ActiveModel = order.into();
        active.payment_session_ref = Set(Some(session_ref.to_string()));
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::PaymentSessionCreated {
                    order_id,
                    session_ref: session_ref.to_string(),
                })
                .await;
        }

        Ok(updated)
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn find_by_id(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(OrderEntity::find_by_id(order_id).one(&*self.db).await?)
    }

    /// Resolve an order from the payment session reference the provider
    /// echoes back on redirects and webhook events.
    #[instrument(skip(self))]
    pub async fn find_by_session_ref(
        &self,
        session_ref: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::PaymentSessionRef.eq(session_ref))
            .one(&*self.db)
            .await?)
    }

    /// Owner-scoped order detail including line items.
    #[instrument(skip(self), fields(order_id = %order_id, user_id = %user_id))]
    pub async fn get_for_user(
        &self,
        order_id: Uuid,
        user_id: Uuid,
    ) -> Result<OrderDetailResponse, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = order
            .find_related(OrderItemEntity)
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|item| OrderItemResponse {
                product_id: item.product_id,
                quantity: item.quantity,
                price: item.price,
            })
            .collect();

        Ok(OrderDetailResponse {
            order: Self::model_to_response(order),
            items,
        })
    }

    /// The user's order history, newest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderResponse>, u64), ServiceError> {
        let paginator = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let orders = paginator
            .fetch_page(page.saturating_sub(1))
            .await?
            .into_iter()
            .map(Self::model_to_response)
            .collect();

        Ok((orders, total))
    }

    /// Drive an order to the terminal `failed` state. Called by the
    /// fulfillment service outside its aborted transaction so the failure is
    /// durably recorded and retries do not spin on a poisoned order.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_failed(&self, order_id: Uuid, reason: &str) -> Result<(), ServiceError> {
        let order = match OrderEntity::find_by_id(order_id).one(&*self.db).await? {
            Some(order) => order,
            None => {
                warn!(order_id = %order_id, "cannot mark missing order as failed");
                return Ok(());
            }
        };

        if order.payment_status.is_terminal() {
            return Ok(());
        }

        let mut active: order::ActiveModel = order.into();
        active.payment_status = Set(PaymentStatus::Failed);
        active.updated_at = Set(Some(Utc::now()));
        active.update(&*self.db).await?;

        warn!(order_id = %order_id, reason, "order marked failed");

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::OrderFailed {
                    order_id,
                    reason: reason.to_string(),
                })
                .await;
        }

        Ok(())
    }

    /// Count of line items attached to an order. Used by tests and the
    /// order detail view.
    pub async fn count_items(&self, order_id: Uuid) -> Result<u64, ServiceError> {
        Ok(OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .count(&*self.db)
            .await?)
    }

    fn model_to_response(model: order::Model) -> OrderResponse {
        OrderResponse {
            id: model.id,
            payment_method: model.payment_method,
            total_price: model.total_price,
            payment_status: model.payment_status,
            created_at: model.created_at,
        }
    }
}
