//! Cascade events.
//!
//! Every event is a small serde payload plus a `handle` that performs one
//! bounded slice of work. Large trees are drained across several
//! deliveries: a handler that hit its batch limit answers
//! [`Outcome::MoreWorkRemains`], the message is nacked, and the redelivered
//! copy simply re-queries, because rows already processed no longer match.

pub mod bucket_purge;
pub mod context;
pub mod folder_purge;
pub mod folder_restore;
pub mod folder_trash;
pub mod object_deletion;
pub mod recovery;
pub mod registry;
pub mod trash_expiration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use tracing::warn;

use crate::errors::{BrokerError, CascadeError, StorageResult};
use crate::messaging::{Message, Publisher};

pub use bucket_purge::BucketPurge;
pub use context::HandlerContext;
pub use folder_purge::FolderPurge;
pub use folder_restore::FolderRestore;
pub use folder_trash::FolderTrash;
pub use object_deletion::ObjectDeletion;
pub use recovery::resume_cascades;
pub use registry::{DynEvent, EventRegistry};
pub use trash_expiration::TrashExpiration;

/// Topic carrying folder and bucket cascades.
pub const TRASH_TOPIC: &str = "trash";
/// Topic carrying storage-driven work.
pub const STORAGE_TOPIC: &str = "storage";
pub const TOPICS: [&str; 2] = [TRASH_TOPIC, STORAGE_TOPIC];

/// Result of one delivery of a cascade event.
///
/// A transient failure (database, broker) is the `Err` side of the handler
/// result instead; the phase rolled back and redelivery retries it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing left to do. Ack.
    Done,
    /// A batch was full or children are still converging. Nack to run again.
    MoreWorkRemains(String),
    /// Retrying cannot help. Ack and drop.
    PermanentFailure(String),
}

impl Outcome {
    pub fn more(reason: impl Into<String>) -> Self {
        Outcome::MoreWorkRemains(reason.into())
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Done => f.write_str("done"),
            Outcome::MoreWorkRemains(reason) => write!(f, "more work remains: {}", reason),
            Outcome::PermanentFailure(reason) => write!(f, "permanent failure: {}", reason),
        }
    }
}

#[async_trait]
pub trait Event: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// Wire name carried in the message `type` field.
    const NAME: &'static str;
    const TOPIC: &'static str;

    /// Run one delivery. Must be safe to re-run from scratch.
    async fn handle(&self, ctx: &HandlerContext) -> Result<Outcome, CascadeError>;
}

pub fn encode<E: Event>(event: &E) -> Result<Message, BrokerError> {
    Ok(Message::new(E::NAME, serde_json::to_vec(event)?))
}

/// Publish a batch of same-typed events on their topic.
pub async fn publish<E: Event>(publisher: &dyn Publisher, events: &[E]) -> Result<(), BrokerError> {
    if events.is_empty() {
        return Ok(());
    }
    let messages = events.iter().map(encode).collect::<Result<Vec<_>, _>>()?;
    publisher.publish(E::TOPIC, messages).await
}

/// Downgrade a storage failure to a warning. Storage is reconciled later by
/// another pass or by the lifecycle rule itself.
pub(crate) fn best_effort(result: StorageResult<()>, action: &str, key: &str) {
    if let Err(err) = result {
        warn!(key, "{} failed: {}", action, err);
    }
}
