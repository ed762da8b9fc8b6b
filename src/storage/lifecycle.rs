//! Trash expiry for backends without a native lifecycle rule.
//!
//! Cloud stores expire `trash/` objects on their own and send a deletion
//! notification. The sweeper does the same for local storage: it deletes
//! markers past the retention window and publishes a [`TrashExpiration`]
//! for each one, so the cascade side cannot tell the two apart.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::ObjectStorage;
use super::marker::{ObjectRef, TRASH_ROOT};
use crate::errors::CascadeError;
use crate::events::{TrashExpiration, publish};
use crate::messaging::Publisher;

pub struct LifecycleSweeper {
    storage: Arc<dyn ObjectStorage>,
    publisher: Arc<dyn Publisher>,
    retention: ChronoDuration,
    page_size: usize,
}

impl LifecycleSweeper {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        publisher: Arc<dyn Publisher>,
        retention_days: u32,
        page_size: usize,
    ) -> Self {
        Self {
            storage,
            publisher,
            retention: ChronoDuration::days(i64::from(retention_days)),
            page_size: page_size.max(1),
        }
    }

    /// Sweep every `interval` until `shutdown` flips.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once(Utc::now()).await {
                        Ok(0) => {}
                        Ok(expired) => info!(expired, "expired trash markers"),
                        Err(err) => warn!("trash sweep failed: {}", err),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("lifecycle sweeper stopped");
    }

    /// Expire every marker last modified before `now - retention`.
    /// Returns how many were expired.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize, CascadeError> {
        let cutoff = now - self.retention;
        let prefix = format!("{}/", TRASH_ROOT);
        let mut start_after: Option<String> = None;
        let mut expired = 0;

        loop {
            let page = self
                .storage
                .list_objects(&prefix, start_after.as_deref(), self.page_size)
                .await?;

            let mut notices = Vec::new();
            for object in &page.objects {
                if object.last_modified > cutoff {
                    continue;
                }
                let Some(marker) = ObjectRef::parse(&object.key) else {
                    debug!(key = %object.key, "skipping foreign key under trash prefix");
                    continue;
                };
                if let Err(err) = self.storage.remove_object(&object.key).await {
                    warn!(key = %object.key, "failed to expire marker: {}", err);
                    continue;
                }
                notices.push(TrashExpiration {
                    bucket_id: marker.bucket_id,
                    object_key: object.key.clone(),
                });
            }
            expired += notices.len();
            publish(self.publisher.as_ref(), &notices).await?;

            if !page.is_truncated {
                return Ok(expired);
            }
            start_after = page.next_start_after;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::STORAGE_TOPIC;
    use crate::messaging::memory::MemoryBroker;
    use crate::storage::memory::MemoryStorage;
    use bytes::Bytes;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sweep_expires_only_old_markers() {
        let storage = Arc::new(MemoryStorage::new());
        let broker = MemoryBroker::new();
        let bucket = Uuid::new_v4();

        let old = ObjectRef::file(bucket, Uuid::new_v4());
        let fresh = ObjectRef::folder(bucket, Uuid::new_v4());
        storage.mark_as_trashed(&old).await.unwrap();
        storage.mark_as_trashed(&fresh).await.unwrap();
        storage
            .put_object(&old.object_path(), Bytes::from_static(b"payload"))
            .await
            .unwrap();
        storage.set_last_modified(&old.marker_path(), Utc::now() - ChronoDuration::days(31));
        storage.set_last_modified(&old.object_path(), Utc::now() - ChronoDuration::days(31));

        let sweeper = LifecycleSweeper::new(storage.clone(), Arc::new(broker.clone()), 30, 1);
        let expired = sweeper.sweep_once(Utc::now()).await.unwrap();

        assert_eq!(expired, 1);
        assert!(!storage.contains(&old.marker_path()));
        assert!(storage.contains(&fresh.marker_path()));
        // Only markers expire; the payload is the cascade's job.
        assert!(storage.contains(&old.object_path()));

        let delivery = broker.try_next(STORAGE_TOPIC).unwrap();
        assert_eq!(delivery.message.kind, "TrashExpiration");
        let notice: TrashExpiration = serde_json::from_slice(&delivery.message.payload).unwrap();
        assert_eq!(notice.object_key, old.marker_path());
        assert_eq!(notice.bucket_id, bucket);
        assert!(broker.try_next(STORAGE_TOPIC).is_none());
    }
}
