pub mod carts;
pub mod checkout;
pub mod common;
pub mod orders;
pub mod payment_webhooks;
pub mod products;

use std::sync::Arc;

use crate::{
    carts::SessionCartStore,
    db::DbPool,
    events::EventSender,
    message_queue::MessageQueue,
    services::{
        fulfillment::FulfillmentService, gateway::PaymentGateway,
        notifications::NotificationSender, orders::OrderService,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub fulfillment: Arc<FulfillmentService>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub cart_store: Arc<dyn SessionCartStore>,
    pub queue: Arc<dyn MessageQueue>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        cart_store: Arc<dyn SessionCartStore>,
        queue: Arc<dyn MessageQueue>,
        mailer: Arc<dyn NotificationSender>,
        operator_email: Option<String>,
    ) -> Self {
        let orders = Arc::new(OrderService::new(db.clone(), Some(event_sender.clone())));
        let fulfillment = Arc::new(FulfillmentService::new(
            db,
            orders.clone(),
            gateway.clone(),
            mailer,
            Some(event_sender),
            operator_email,
        ));

        Self {
            orders,
            fulfillment,
            gateway,
            cart_store,
            queue,
        }
    }
}
