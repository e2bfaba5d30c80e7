//! Outbound events for the reconcilers.
//!
//! Publishing is fire-and-forget: callers log a failed publish and move on.
//! Delivery is at-least-once and subscribers must be idempotent.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Published after a profile is created or updated.
pub const TOPIC_PROFILE_INITIALISED: &str = "profile-initialised";

/// Payload of [`TOPIC_PROFILE_INITIALISED`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileInitEvent {
    pub provider_name: String,
    pub project_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("event channel is full")]
    Full,

    #[error("event channel is closed")]
    Closed,
}

pub trait EventPublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

/// Publisher backed by a bounded channel; the receiving half is drained by
/// whatever forwards events to the bus.
pub struct ChannelPublisher {
    tx: mpsc::Sender<Message>,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl EventPublisher for ChannelPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        self.tx
            .try_send(Message {
                topic: topic.to_string(),
                payload,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PublishError::Full,
                mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
            })
    }
}

/// Keeps every published message; for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryPublisher {
    messages: Mutex<Vec<Message>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl EventPublisher for InMemoryPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Message {
                topic: topic.to_string(),
                payload,
            });
        Ok(())
    }
}

/// Publishes `event` as JSON, logging instead of failing.
pub fn publish_json<T: Serialize>(publisher: &dyn EventPublisher, topic: &str, event: &T) {
    let payload = match serde_json::to_vec(event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("Failed to encode {} event: {}", topic, e);
            return;
        }
    };
    if let Err(e) = publisher.publish(topic, payload) {
        tracing::warn!("Failed to publish {} event: {}", topic, e);
    }
}
