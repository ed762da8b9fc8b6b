//! FolderTrash: push a trashed folder's state down its subtree.
//!
//! The caller already soft-deleted the folder itself. Each delivery trashes
//! one batch of direct children, writes their markers, and fans out a
//! `FolderTrash` per child folder so the next level proceeds in parallel.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{Event, HandlerContext, Outcome, TRASH_TOPIC, best_effort, publish};
use crate::db::{ChildFilter, files, folders};
use crate::errors::CascadeError;
use crate::models::{Action, Activity};
use crate::storage::ObjectRef;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FolderTrash {
    pub bucket_id: Uuid,
    pub folder_id: Uuid,
    pub user_id: Uuid,
}

#[async_trait]
impl Event for FolderTrash {
    const NAME: &'static str = "FolderTrash";
    const TOPIC: &'static str = TRASH_TOPIC;

    async fn handle(&self, ctx: &HandlerContext) -> Result<Outcome, CascadeError> {
        let limit = ctx.batch_limit;
        let mut tx = ctx.db.begin().await?;

        let Some(folder) = folders::find_unscoped(&mut tx, self.folder_id).await? else {
            debug!(folder_id = %self.folder_id, "folder gone, nothing to trash");
            return Ok(Outcome::Done);
        };
        if !folder.is_trashed() || folder.is_restoring() {
            // A restore overtook this cascade; the restore owns the subtree now.
            debug!(folder_id = %folder.id, "folder no longer trashed, stopping");
            return Ok(Outcome::Done);
        }

        let child_folders =
            folders::children(&mut tx, self.bucket_id, Some(folder.id), ChildFilter::Active, limit)
                .await?;
        let child_files =
            files::children(&mut tx, self.bucket_id, Some(folder.id), ChildFilter::Active, limit)
                .await?;

        let folder_ids: Vec<Uuid> = child_folders.iter().map(|f| f.id).collect();
        let file_ids: Vec<Uuid> = child_files.iter().map(|f| f.id).collect();

        // Markers go out before the rows flip; a missing marker only delays expiry.
        for id in &folder_ids {
            let object = ObjectRef::folder(self.bucket_id, *id);
            best_effort(
                ctx.storage.mark_as_trashed(&object).await,
                "mark folder as trashed",
                &object.marker_path(),
            );
        }
        for id in &file_ids {
            let object = ObjectRef::file(self.bucket_id, *id);
            best_effort(
                ctx.storage.mark_as_trashed(&object).await,
                "mark file as trashed",
                &object.marker_path(),
            );
        }

        let now = Utc::now();
        folders::soft_delete(&mut tx, &folder_ids, self.user_id, now).await?;
        files::soft_delete(&mut tx, &file_ids, self.user_id, now).await?;
        tx.commit().await?;

        let fan_out: Vec<FolderTrash> = folder_ids
            .iter()
            .map(|id| FolderTrash {
                bucket_id: self.bucket_id,
                folder_id: *id,
                user_id: self.user_id,
            })
            .collect();
        publish(ctx.publisher.as_ref(), &fan_out).await?;

        debug!(
            folder_id = %folder.id,
            folders = folder_ids.len(),
            files = file_ids.len(),
            "trashed batch of children"
        );

        if folder_ids.len() == limit || file_ids.len() == limit {
            return Ok(Outcome::more("batch limit reached"));
        }

        let remaining = {
            let mut conn = ctx.db.pool().acquire().await?;
            folders::count_children(&mut conn, self.bucket_id, Some(folder.id), ChildFilter::Active)
                .await?
                + files::count_children(&mut conn, self.bucket_id, Some(folder.id), ChildFilter::Active)
                    .await?
        };
        if remaining > 0 {
            return Ok(Outcome::more(format!("{} children still active", remaining)));
        }

        ctx.record(Activity::folder(Action::Trash, self.bucket_id, folder.id).by(self.user_id))
            .await;
        Ok(Outcome::Done)
    }
}
