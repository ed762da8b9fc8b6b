//! User notifications raised by cascades.
//!
//! Rendering and delivery (email, push) live outside this service; the
//! worker only decides *that* someone should hear about an outcome.

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// A folder restore was abandoned because its name is taken.
    RestoreConflict {
        bucket_id: Uuid,
        folder_id: Uuid,
        user_id: Uuid,
        name: String,
    },
    /// Every trace of a deleted bucket is gone.
    BucketPurged { bucket_id: Uuid, user_id: Uuid },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Emits notifications as log lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) {
        match notification {
            Notification::RestoreConflict {
                bucket_id,
                folder_id,
                user_id,
                name,
            } => info!(
                %bucket_id, %folder_id, %user_id,
                "restore of folder `{}` abandoned: name already in use", name
            ),
            Notification::BucketPurged { bucket_id, user_id } => {
                info!(%bucket_id, %user_id, "bucket purge complete")
            }
        }
    }
}

/// Collects notifications in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: std::sync::Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, notification: Notification) {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
    }
}
