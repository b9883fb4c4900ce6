//! Background task queue used to decouple webhook acknowledgment from
//! fulfillment work. Delivery is at-least-once; the fulfillment service's
//! idempotency is what makes that safe.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum MessageQueueError {
    #[error("Queue is full")]
    QueueFull,
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Envelope for queued work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload,
            enqueued_at: chrono::Utc::now(),
        }
    }
}

/// Queue abstraction with pluggable backends.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError>;
    /// Pop the next message for a topic, if any.
    async fn subscribe(&self, topic: &str) -> Result<Option<Message>, MessageQueueError>;
    async fn ack(&self, message_id: &Uuid) -> Result<(), MessageQueueError>;
}

/// In-memory queue for development and tests.
#[derive(Debug)]
pub struct InMemoryMessageQueue {
    queues: Arc<Mutex<HashMap<String, VecDeque<Message>>>>,
    max_size: usize,
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            max_size: 1000,
        }
    }

    /// Number of messages currently waiting on a topic.
    pub fn depth(&self, topic: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(topic)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError> {
        let mut queues = self.queues.lock().unwrap();
        let queue = queues.entry(message.topic.clone()).or_default();

        if queue.len() >= self.max_size {
            return Err(MessageQueueError::QueueFull);
        }

        queue.push_back(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Option<Message>, MessageQueueError> {
        let mut queues = self.queues.lock().unwrap();
        Ok(queues.get_mut(topic).and_then(VecDeque::pop_front))
    }

    async fn ack(&self, _message_id: &Uuid) -> Result<(), MessageQueueError> {
        Ok(())
    }
}

/// Redis-list backed queue: RPUSH on publish, LPOP on subscribe. Survives
/// process restarts, shared across worker processes.
pub struct RedisMessageQueue {
    client: Arc<redis::Client>,
    namespace: String,
}

impl RedisMessageQueue {
    pub fn new(client: Arc<redis::Client>, namespace: String) -> Self {
        Self { client, namespace }
    }

    fn topic_key(&self, topic: &str) -> String {
        format!("{}:{}", self.namespace, topic)
    }
}

#[async_trait]
impl MessageQueue for RedisMessageQueue {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| MessageQueueError::ConnectionError(e.to_string()))?;

        let json = serde_json::to_string(&message)
            .map_err(|e| MessageQueueError::SerializationError(e.to_string()))?;

        let _: () = conn
            .rpush(self.topic_key(&message.topic), json)
            .await
            .map_err(|e| MessageQueueError::ConnectionError(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Option<Message>, MessageQueueError> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| MessageQueueError::ConnectionError(e.to_string()))?;

        let raw: Option<String> = conn
            .lpop(self.topic_key(topic), None)
            .await
            .map_err(|e| MessageQueueError::ConnectionError(e.to_string()))?;

        raw.map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| MessageQueueError::SerializationError(e.to_string()))
        })
        .transpose()
    }

    async fn ack(&self, _message_id: &Uuid) -> Result<(), MessageQueueError> {
        // LPOP already removed the message; nothing to acknowledge.
        Ok(())
    }
}
