//! FolderPurge: permanently delete a trashed folder and everything in it.
//!
//! A folder claims each non-empty child folder once (status `purging`) and
//! publishes a single `FolderPurge` for it. Once every direct child is gone
//! the folder deletes itself and wakes whoever is waiting on it: its parent
//! when that parent is purging too, or the bucket purge for a root folder of
//! a deleted bucket. A folder waiting only on claimed children acks and
//! sleeps until that wake-up arrives.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{BucketPurge, Event, HandlerContext, Outcome, TRASH_TOPIC, best_effort, publish};
use crate::db::{ChildFilter, buckets, files, folders};
use crate::errors::CascadeError;
use crate::models::{Action, Activity, Folder, FolderStatus};
use crate::storage::ObjectRef;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FolderPurge {
    pub bucket_id: Uuid,
    pub folder_id: Uuid,
    pub user_id: Uuid,
}

#[async_trait]
impl Event for FolderPurge {
    const NAME: &'static str = "FolderPurge";
    const TOPIC: &'static str = TRASH_TOPIC;

    async fn handle(&self, ctx: &HandlerContext) -> Result<Outcome, CascadeError> {
        let limit = ctx.batch_limit;
        let mut tx = ctx.db.begin().await?;

        let Some(folder) = folders::find_unscoped(&mut tx, self.folder_id).await? else {
            debug!(folder_id = %self.folder_id, "folder already purged");
            return Ok(Outcome::Done);
        };
        let claimable = matches!(folder.status, Some(FolderStatus::Trashed | FolderStatus::Purging));
        if !claimable || !folder.is_trashed() {
            debug!(folder_id = %folder.id, status = ?folder.status, "folder not trashed, refusing to purge");
            return Ok(Outcome::Done);
        }
        if !folder.is_purging() {
            folders::claim_for_purge(&mut tx, &[folder.id], Utc::now()).await?;
        }

        // Files: payload first, then the row.
        let child_files =
            files::children(&mut tx, self.bucket_id, Some(folder.id), ChildFilter::Any, limit).await?;
        if !child_files.is_empty() {
            let mut keys = Vec::with_capacity(child_files.len() * 2);
            for file in &child_files {
                let object = file.object_ref();
                keys.push(object.object_path());
                keys.push(object.marker_path());
            }
            best_effort(
                ctx.storage.remove_objects(&keys).await,
                "remove file objects",
                &folder.id.to_string(),
            );
            let ids: Vec<Uuid> = child_files.iter().map(|f| f.id).collect();
            files::hard_delete(&mut tx, &ids).await?;
        }
        if child_files.len() == limit {
            tx.commit().await?;
            return Ok(Outcome::more("child files remain"));
        }

        // Folders: empty ones go now, the rest are claimed and purge themselves.
        let child_folders =
            folders::children(&mut tx, self.bucket_id, Some(folder.id), ChildFilter::Unclaimed, limit)
                .await?;
        let mut empty = Vec::new();
        let mut nested = Vec::new();
        for child in &child_folders {
            let grandchildren = folders::count_children(&mut tx, self.bucket_id, Some(child.id), ChildFilter::Any)
                .await?
                + files::count_children(&mut tx, self.bucket_id, Some(child.id), ChildFilter::Any)
                    .await?;
            if grandchildren == 0 {
                empty.push(child.id);
            } else {
                nested.push(child.id);
            }
        }
        if !empty.is_empty() {
            let markers: Vec<String> = empty
                .iter()
                .map(|id| ObjectRef::folder(self.bucket_id, *id).marker_path())
                .collect();
            best_effort(
                ctx.storage.remove_objects(&markers).await,
                "remove folder markers",
                &folder.id.to_string(),
            );
            folders::hard_delete(&mut tx, &empty).await?;
        }
        folders::claim_for_purge(&mut tx, &nested, Utc::now()).await?;
        tx.commit().await?;

        let fan_out: Vec<FolderPurge> = nested
            .iter()
            .map(|id| FolderPurge {
                bucket_id: self.bucket_id,
                folder_id: *id,
                user_id: self.user_id,
            })
            .collect();
        publish(ctx.publisher.as_ref(), &fan_out).await?;

        debug!(
            folder_id = %folder.id,
            files = child_files.len(),
            folders = empty.len(),
            nested = nested.len(),
            "purged batch of children"
        );

        if child_folders.len() == limit {
            return Ok(Outcome::more("child folders remain"));
        }

        let mut tx = ctx.db.begin().await?;
        let remaining = folders::count_children(&mut tx, self.bucket_id, Some(folder.id), ChildFilter::Any)
            .await?
            + files::count_children(&mut tx, self.bucket_id, Some(folder.id), ChildFilter::Any).await?;
        if remaining > 0 {
            // Only claimed children are left; the last one to finish wakes us.
            debug!(folder_id = %folder.id, remaining, "waiting on nested purges");
            return Ok(Outcome::Done);
        }

        let object = ObjectRef::folder(self.bucket_id, folder.id);
        best_effort(
            ctx.storage.unmark_as_trashed(&object).await,
            "remove folder marker",
            &object.marker_path(),
        );
        let deleted = folders::hard_delete(&mut tx, &[folder.id]).await?;
        tx.commit().await?;
        if deleted == 0 {
            return Ok(Outcome::Done);
        }

        ctx.record(Activity::folder(Action::Purge, self.bucket_id, folder.id).by(self.user_id))
            .await;
        self.wake_waiter(ctx, &folder).await?;
        Ok(Outcome::Done)
    }
}

impl FolderPurge {
    /// Re-deliver the purge that is waiting on `folder`, if any.
    async fn wake_waiter(&self, ctx: &HandlerContext, folder: &Folder) -> Result<(), CascadeError> {
        let mut conn = ctx.db.pool().acquire().await?;
        match folder.folder_id {
            Some(parent_id) => {
                let waiting = folders::find_unscoped(&mut conn, parent_id)
                    .await?
                    .is_some_and(|parent| parent.is_purging());
                drop(conn);
                if waiting {
                    let wake = FolderPurge {
                        bucket_id: self.bucket_id,
                        folder_id: parent_id,
                        user_id: self.user_id,
                    };
                    publish(ctx.publisher.as_ref(), &[wake]).await?;
                }
            }
            None => {
                let waiting = buckets::find_unscoped(&mut conn, self.bucket_id)
                    .await?
                    .is_some_and(|bucket| bucket.is_deleted());
                drop(conn);
                if waiting {
                    let wake = BucketPurge {
                        bucket_id: self.bucket_id,
                        user_id: self.user_id,
                    };
                    publish(ctx.publisher.as_ref(), &[wake]).await?;
                }
            }
        }
        Ok(())
    }
}
