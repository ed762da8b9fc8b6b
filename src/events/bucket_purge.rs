//! BucketPurge: tear down a deleted bucket.
//!
//! Phases, each drained over as many deliveries as it takes:
//! 1. root-level files (payload, marker, row),
//! 2. root-level folders, handed to `FolderPurge` (which wakes this purge
//!    once the last of them is gone),
//! 3. storage leftovers under the bucket and trash prefixes,
//! then the bucket row itself.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Event, FolderPurge, HandlerContext, Outcome, TRASH_TOPIC, best_effort, publish};
use crate::db::{ChildFilter, buckets, files, folders};
use crate::errors::CascadeError;
use crate::models::{Action, Activity, ObjectType};
use crate::notify::Notification;
use crate::storage::marker::{bucket_prefix, trash_prefix};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BucketPurge {
    pub bucket_id: Uuid,
    pub user_id: Uuid,
}

#[async_trait]
impl Event for BucketPurge {
    const NAME: &'static str = "BucketPurge";
    const TOPIC: &'static str = TRASH_TOPIC;

    async fn handle(&self, ctx: &HandlerContext) -> Result<Outcome, CascadeError> {
        let limit = ctx.batch_limit;

        {
            let mut conn = ctx.db.pool().acquire().await?;
            if let Some(bucket) = buckets::find_unscoped(&mut conn, self.bucket_id).await? {
                if !bucket.is_deleted() {
                    return Ok(Outcome::PermanentFailure(format!(
                        "bucket {} is live, refusing to purge",
                        self.bucket_id
                    )));
                }
            }
        }

        // Phase 1: root-level files.
        let mut tx = ctx.db.begin().await?;
        let root_files = files::children(&mut tx, self.bucket_id, None, ChildFilter::Any, limit).await?;
        if !root_files.is_empty() {
            let mut keys = Vec::with_capacity(root_files.len() * 2);
            for file in &root_files {
                let object = file.object_ref();
                keys.push(object.object_path());
                keys.push(object.marker_path());
            }
            best_effort(
                ctx.storage.remove_objects(&keys).await,
                "remove root file objects",
                &bucket_prefix(self.bucket_id),
            );
            let ids: Vec<Uuid> = root_files.iter().map(|f| f.id).collect();
            files::hard_delete(&mut tx, &ids).await?;
            tx.commit().await?;
            debug!(bucket_id = %self.bucket_id, files = ids.len(), "purged root files");
            if ids.len() == limit {
                return Ok(Outcome::more("root files remain"));
            }
            tx = ctx.db.begin().await?;
        }

        // Phase 2: root-level folders. Each is claimed once; the last one to
        // finish wakes this purge again.
        let root_folders =
            folders::children(&mut tx, self.bucket_id, None, ChildFilter::Unclaimed, limit).await?;
        let ids: Vec<Uuid> = root_folders.iter().map(|f| f.id).collect();
        folders::claim_for_purge(&mut tx, &ids, Utc::now()).await?;
        let waiting = folders::count_children(&mut tx, self.bucket_id, None, ChildFilter::Any).await?;
        tx.commit().await?;

        let purges: Vec<FolderPurge> = ids
            .iter()
            .map(|id| FolderPurge {
                bucket_id: self.bucket_id,
                folder_id: *id,
                user_id: self.user_id,
            })
            .collect();
        publish(ctx.publisher.as_ref(), &purges).await?;
        if ids.len() == limit {
            return Ok(Outcome::more("root folders remain"));
        }
        if waiting > 0 {
            debug!(bucket_id = %self.bucket_id, waiting, "waiting on root folder purges");
            return Ok(Outcome::Done);
        }

        // Phase 3: nothing in the database references this bucket any more,
        // so anything still in storage is an orphan.
        for prefix in [bucket_prefix(self.bucket_id), trash_prefix(self.bucket_id)] {
            let page = ctx.storage.list_objects(&prefix, None, limit).await?;
            if page.objects.is_empty() {
                continue;
            }
            let keys: Vec<String> = page.objects.into_iter().map(|o| o.key).collect();
            let removed = keys.len();
            best_effort(ctx.storage.remove_objects(&keys).await, "remove orphans", &prefix);
            debug!(bucket_id = %self.bucket_id, prefix = %prefix, removed, "removed orphaned objects");
            if page.is_truncated || removed == limit {
                return Ok(Outcome::more("orphaned objects remain"));
            }
        }

        let deleted = {
            let mut conn = ctx.db.pool().acquire().await?;
            buckets::hard_delete(&mut conn, self.bucket_id).await?
        };
        if deleted > 0 {
            info!(bucket_id = %self.bucket_id, "bucket purged");
            ctx.record(Activity::new(Action::Purge, ObjectType::Bucket, self.bucket_id).by(self.user_id))
                .await;
            ctx.notifier
                .notify(Notification::BucketPurged {
                    bucket_id: self.bucket_id,
                    user_id: self.user_id,
                })
                .await;
        }
        Ok(Outcome::Done)
    }
}
