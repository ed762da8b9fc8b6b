//! Consumption loop: message → typed event → handler → ack/nack.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::events::{EventRegistry, HandlerContext, Outcome};
use crate::messaging::{Message, Subscription};

/// How a delivery is settled with the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nack,
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<EventRegistry>,
    ctx: HandlerContext,
}

impl Dispatcher {
    pub fn new(registry: Arc<EventRegistry>, ctx: HandlerContext) -> Self {
        Self { registry, ctx }
    }

    pub fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    /// Run one message through its handler and decide how to settle it.
    pub async fn dispatch(&self, message: &Message) -> Disposition {
        let event = match self.registry.decode(message) {
            Ok(event) => event,
            Err(err) => {
                warn!(event = %message.kind, "dropping undeliverable message: {}", err);
                return Disposition::Ack;
            }
        };

        let span = info_span!("event", event = event.name());
        match event.run(&self.ctx).instrument(span).await {
            Ok(Outcome::Done) => {
                debug!(event = event.name(), "event handled");
                Disposition::Ack
            }
            Ok(Outcome::MoreWorkRemains(reason)) => {
                debug!(event = event.name(), reason = %reason, "requeueing");
                Disposition::Nack
            }
            Ok(Outcome::PermanentFailure(reason)) => {
                warn!(event = ?event, reason = %reason, "event failed permanently, dropping");
                Disposition::Ack
            }
            Err(err) => {
                error!(event = ?event, "event failed, will retry: {}", err);
                Disposition::Nack
            }
        }
    }

    /// Consume `subscription` one delivery at a time until it closes or
    /// `shutdown` flips. The delivery in flight is always settled first.
    pub async fn run(
        &self,
        topic: &str,
        mut subscription: Box<dyn Subscription>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(topic, "dispatcher started");
        loop {
            let delivery = tokio::select! {
                delivery = subscription.next() => delivery,
                _ = shutdown.changed() => break,
            };
            let Some(delivery) = delivery else {
                break;
            };

            let settled = match self.dispatch(&delivery.message).await {
                Disposition::Ack => delivery.ack().await,
                Disposition::Nack => delivery.nack().await,
            };
            if let Err(err) = settled {
                error!(topic, "failed to settle delivery: {}", err);
            }
        }
        info!(topic, "dispatcher stopped");
    }
}
