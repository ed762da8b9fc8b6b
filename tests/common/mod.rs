//! Test helpers for cascade integration tests.
//!
//! Provides a fully wired in-process worker (in-memory SQLite, object store
//! and broker) plus helpers to build trees and drain the queues.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use uuid::Uuid;

use bucket_store::activity::DbActivityLogger;
use bucket_store::db::{Database, files, folders};
use bucket_store::dispatcher::{Dispatcher, Disposition};
use bucket_store::events::{Event, EventRegistry, HandlerContext, TOPICS, publish};
use bucket_store::messaging::memory::MemoryBroker;
use bucket_store::models::{Action, Activity, Bucket, File, Folder};
use bucket_store::notify::MemoryNotifier;
use bucket_store::services::{BucketService, TrashService};
use bucket_store::storage::ObjectStorage;
use bucket_store::storage::memory::MemoryStorage;

/// Guard against a cascade that never converges.
pub const MAX_DELIVERIES: usize = 10_000;

/// What a drain did.
#[derive(Debug, Default)]
pub struct DrainStats {
    pub total: usize,
    pub nacks: usize,
    pub deliveries: HashMap<String, usize>,
}

impl DrainStats {
    pub fn count(&self, kind: &str) -> usize {
        self.deliveries.get(kind).copied().unwrap_or(0)
    }
}

/// A wired worker with one live bucket.
pub struct Harness {
    pub db: Database,
    pub storage: Arc<MemoryStorage>,
    pub broker: MemoryBroker,
    pub notifier: Arc<MemoryNotifier>,
    pub activity: DbActivityLogger,
    pub dispatcher: Dispatcher,
    pub trash: TrashService,
    pub buckets: BucketService,
    pub bucket: Bucket,
    pub user: Uuid,
}

impl Harness {
    pub async fn new(batch_limit: usize) -> Self {
        let db = Database::open_in_memory().await.unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let broker = MemoryBroker::new();
        let notifier = Arc::new(MemoryNotifier::new());
        let activity = DbActivityLogger::new(db.pool().clone());

        let ctx = HandlerContext {
            db: db.clone(),
            storage: storage.clone(),
            publisher: Arc::new(broker.clone()),
            notifier: notifier.clone(),
            activity: Arc::new(activity.clone()),
            trash_retention_days: 30,
            batch_limit,
        };
        let trash = TrashService::from_context(&ctx);
        let buckets = BucketService::new(db.clone(), storage.clone());
        let dispatcher = Dispatcher::new(Arc::new(EventRegistry::standard()), ctx);

        let user = Uuid::new_v4();
        let bucket = buckets.create_bucket("test-bucket", user).await.unwrap();

        Self {
            db,
            storage,
            broker,
            notifier,
            activity,
            dispatcher,
            trash,
            buckets,
            bucket,
            user,
        }
    }

    pub fn bucket_id(&self) -> Uuid {
        self.bucket.id
    }

    /// Deliver one pending message of `topic`, if any.
    pub async fn step(&self, topic: &str) -> Option<(String, Disposition)> {
        let delivery = self.broker.try_next(topic)?;
        let kind = delivery.message.kind.clone();
        let disposition = self.dispatcher.dispatch(&delivery.message).await;
        match disposition {
            Disposition::Ack => delivery.ack().await.unwrap(),
            Disposition::Nack => delivery.nack().await.unwrap(),
        }
        Some((kind, disposition))
    }

    /// Deliver messages round-robin across topics until every queue is empty.
    pub async fn drain(&self) -> DrainStats {
        let mut stats = DrainStats::default();
        loop {
            let mut progressed = false;
            for topic in TOPICS {
                if let Some((kind, disposition)) = self.step(topic).await {
                    progressed = true;
                    stats.total += 1;
                    if disposition == Disposition::Nack {
                        stats.nacks += 1;
                    }
                    *stats.deliveries.entry(kind).or_default() += 1;
                    assert!(
                        stats.total < MAX_DELIVERIES,
                        "cascade did not converge: {:?}",
                        stats
                    );
                }
            }
            if !progressed {
                return stats;
            }
        }
    }

    pub async fn publish<E: Event>(&self, event: E) {
        publish(&self.broker, &[event]).await.unwrap();
    }

    pub async fn folder(&self, parent: Option<Uuid>, name: &str) -> Folder {
        self.buckets
            .create_folder(self.bucket_id(), parent, name)
            .await
            .unwrap()
    }

    /// Upload a file end to end: register, write the payload, complete.
    pub async fn file(&self, parent: Option<Uuid>, name: &str) -> File {
        let (file, _post) = self
            .buckets
            .begin_upload(self.bucket_id(), parent, name, Duration::from_secs(60))
            .await
            .unwrap();
        self.storage
            .put_object(
                &file.object_ref().object_path(),
                Bytes::from(format!("contents of {}", name)),
            )
            .await
            .unwrap();
        self.buckets
            .complete_upload(self.bucket_id(), file.id)
            .await
            .unwrap()
    }

    pub async fn folder_row(&self, id: Uuid) -> Option<Folder> {
        let mut conn = self.db.pool().acquire().await.unwrap();
        folders::find_unscoped(&mut conn, id).await.unwrap()
    }

    pub async fn file_row(&self, id: Uuid) -> Option<File> {
        let mut conn = self.db.pool().acquire().await.unwrap();
        files::find_unscoped(&mut conn, id).await.unwrap()
    }

    /// Every file row of the bucket, trashed or not.
    pub async fn all_files(&self) -> Vec<File> {
        let mut conn = self.db.pool().acquire().await.unwrap();
        files::under_path(&mut conn, self.bucket_id(), "", 10_000)
            .await
            .unwrap()
    }

    pub async fn activities(&self) -> Vec<Activity> {
        self.activity.for_bucket(self.bucket_id(), 10_000).await.unwrap()
    }

    pub async fn count_activities(&self, action: Action, folder_id: Uuid) -> usize {
        self.activities()
            .await
            .iter()
            .filter(|a| a.action == action && a.folder_id == Some(folder_id))
            .count()
    }

    /// Keys stored under `trash/{bucket}/`.
    pub fn markers(&self) -> Vec<String> {
        self.storage.keys(&format!("trash/{}/", self.bucket_id()))
    }

    /// Keys stored under `buckets/{bucket}/`.
    pub fn objects(&self) -> Vec<String> {
        self.storage.keys(&format!("buckets/{}/", self.bucket_id()))
    }
}
