use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::ServiceError;

use super::SessionCart;

/// Key-value store holding one live cart per session key.
///
/// The cart is read once at checkout initiation and cleared once after a
/// successful fulfillment acknowledgment; nothing in the reconciliation
/// pipeline touches it.
#[async_trait]
pub trait SessionCartStore: Send + Sync {
    /// Fetch the cart for a session key; a missing key is an empty cart.
    async fn get(&self, key: &str) -> Result<SessionCart, ServiceError>;

    /// Replace the cart for a session key.
    async fn put(&self, key: &str, cart: &SessionCart) -> Result<(), ServiceError>;

    /// Drop the cart for a session key.
    async fn clear(&self, key: &str) -> Result<(), ServiceError>;
}

/// Redis-backed store: one JSON value per session key with a TTL so
/// abandoned carts expire on their own.
#[derive(Clone)]
pub struct RedisCartStore {
    client: Arc<redis::Client>,
    namespace: String,
    ttl: Duration,
}

impl RedisCartStore {
    pub fn new(client: Arc<redis::Client>, namespace: String, ttl: Duration) -> Self {
        Self {
            client,
            namespace,
            ttl,
        }
    }

    fn cart_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

#[async_trait]
impl SessionCartStore for RedisCartStore {
    async fn get(&self, key: &str) -> Result<SessionCart, ServiceError> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| ServiceError::CacheError(e.to_string()))?;

        let raw: Option<String> = conn
            .get(self.cart_key(key))
            .await
            .map_err(|e| ServiceError::CacheError(e.to_string()))?;

        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(SessionCart::new()),
        }
    }

    async fn put(&self, key: &str, cart: &SessionCart) -> Result<(), ServiceError> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| ServiceError::CacheError(e.to_string()))?;

        let json = serde_json::to_string(cart)?;
        let _: () = conn
            .set_ex(self.cart_key(key), json, self.ttl.as_secs() as usize)
            .await
            .map_err(|e| ServiceError::CacheError(e.to_string()))?;

        debug!(session = key, items = cart.len(), "cart stored");
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), ServiceError> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| ServiceError::CacheError(e.to_string()))?;

        let _: () = conn
            .del(self.cart_key(key))
            .await
            .map_err(|e| ServiceError::CacheError(e.to_string()))?;
        Ok(())
    }
}

/// In-memory store for development and tests.
#[derive(Clone, Default)]
pub struct InMemoryCartStore {
    carts: Arc<RwLock<HashMap<String, SessionCart>>>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionCartStore for InMemoryCartStore {
    async fn get(&self, key: &str) -> Result<SessionCart, ServiceError> {
        Ok(self
            .carts
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn put(&self, key: &str, cart: &SessionCart) -> Result<(), ServiceError> {
        self.carts
            .write()
            .await
            .insert(key.to_string(), cart.clone());
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), ServiceError> {
        self.carts.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::product;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn in_memory_store_round_trip() {
        let store = InMemoryCartStore::new();
        let product = product::Model {
            id: Uuid::new_v4(),
            name: "Washi Tape".to_string(),
            code: "TAPE-01".to_string(),
            description: None,
            price: 350,
            image_url: None,
            category: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: None,
        };

        let mut cart = SessionCart::new();
        cart.add(&product);
        store.put("session-a", &cart).await.unwrap();

        let loaded = store.get("session-a").await.unwrap();
        assert_eq!(loaded, cart);

        // Unknown keys resolve to an empty cart rather than an error.
        assert!(store.get("session-b").await.unwrap().is_empty());

        store.clear("session-a").await.unwrap();
        assert!(store.get("session-a").await.unwrap().is_empty());
    }
}
