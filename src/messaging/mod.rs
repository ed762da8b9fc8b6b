//! Messaging seam: publish, subscribe and per-message ack/nack.
//!
//! Delivery is at-least-once. A nacked message comes back later, possibly
//! reordered with respect to other messages on the same topic.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::BrokerError;

/// Wire envelope: the event name travels as the `type` metadata field and
/// the body is the JSON payload registered for that name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(kind: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, messages: Vec<Message>) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, BrokerError>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `None` once the topic is closed.
    async fn next(&mut self) -> Option<Delivery>;
}

/// Backend-specific settlement of one delivery.
#[async_trait]
pub trait Acknowledger: Send {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;
    async fn nack(self: Box<Self>) -> Result<(), BrokerError>;
}

/// A received message that must be settled exactly once.
pub struct Delivery {
    pub message: Message,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(message: Message, acker: Box<dyn Acknowledger>) -> Self {
        Self { message, acker }
    }

    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    /// Hand the message back to the broker for redelivery.
    pub async fn nack(self) -> Result<(), BrokerError> {
        self.acker.nack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}
