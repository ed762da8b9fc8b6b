//! In-process broker.
//!
//! Each topic is a FIFO queue. A nack puts the message back at the tail,
//! which is how redelivery of a half-drained cascade is simulated without a
//! live broker.

use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};
use tokio::sync::Notify;
use tracing::trace;

use super::{Acknowledger, Delivery, Message, Publisher, Subscriber, Subscription};
use crate::errors::BrokerError;

#[derive(Default)]
struct TopicQueue {
    messages: Mutex<VecDeque<Message>>,
    notify: Notify,
}

impl TopicQueue {
    fn push(&self, message: Message) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(message);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Message> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    topics: Arc<Mutex<HashMap<String, Arc<TopicQueue>>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, name: &str) -> Arc<TopicQueue> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.entry(name.to_string()).or_default().clone()
    }

    /// Take the next pending delivery without waiting.
    pub fn try_next(&self, topic: &str) -> Option<Delivery> {
        let queue = self.topic(topic);
        let message = queue.pop()?;
        Some(delivery(queue, message))
    }

    /// Number of messages waiting on `topic`.
    pub fn pending(&self, topic: &str) -> usize {
        self.topic(topic).len()
    }
}

fn delivery(queue: Arc<TopicQueue>, message: Message) -> Delivery {
    let acker = MemoryAcker {
        queue,
        message: message.clone(),
    };
    Delivery::new(message, Box::new(acker))
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, topic: &str, messages: Vec<Message>) -> Result<(), BrokerError> {
        let queue = self.topic(topic);
        for message in messages {
            trace!(topic, kind = %message.kind, "publish");
            queue.push(message);
        }
        Ok(())
    }
}

#[async_trait]
impl Subscriber for MemoryBroker {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        Ok(Box::new(MemorySubscription {
            queue: self.topic(topic),
        }))
    }
}

struct MemorySubscription {
    queue: Arc<TopicQueue>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Delivery> {
        loop {
            let notified = self.queue.notify.notified();
            if let Some(message) = self.queue.pop() {
                return Some(delivery(self.queue.clone(), message));
            }
            notified.await;
        }
    }
}

struct MemoryAcker {
    queue: Arc<TopicQueue>,
    message: Message,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<(), BrokerError> {
        self.queue.push(self.message);
        Ok(())
    }
}
