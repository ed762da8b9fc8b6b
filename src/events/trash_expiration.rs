//! TrashExpiration: react to storage deleting a trashed object.
//!
//! Storage-side expiry removes the marker; this handler removes what the
//! marker stood for. A restore may have completed between the marker being
//! deleted and this delivery, so the row is re-read right before acting and
//! a cleared `deleted_at` always wins.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Event, FolderPurge, HandlerContext, Outcome, STORAGE_TOPIC, best_effort, publish};
use crate::db::{files, folders};
use crate::errors::CascadeError;
use crate::models::{Action, Activity, File, FolderStatus};
use crate::storage::{ObjectKind, ObjectRef};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TrashExpiration {
    pub bucket_id: Uuid,
    /// Key storage reported as deleted: a marker or a real object.
    pub object_key: String,
}

#[async_trait]
impl Event for TrashExpiration {
    const NAME: &'static str = "TrashExpiration";
    const TOPIC: &'static str = STORAGE_TOPIC;

    async fn handle(&self, ctx: &HandlerContext) -> Result<Outcome, CascadeError> {
        let (is_marker, logical) = ctx.storage.is_trash_marker_path(&self.object_key);
        let Some(object) = ObjectRef::parse(&logical) else {
            debug!(key = %self.object_key, "not a tracked object key, ignoring");
            return Ok(Outcome::Done);
        };
        if object.bucket_id != self.bucket_id {
            warn!(
                bucket_id = %self.bucket_id,
                key = %self.object_key,
                "key belongs to another bucket, ignoring"
            );
            return Ok(Outcome::Done);
        }

        match object.kind {
            ObjectKind::File => self.expire_file(ctx, object, is_marker).await,
            ObjectKind::Folder => self.expire_folder(ctx, object).await,
        }
    }
}

impl TrashExpiration {
    async fn expire_file(
        &self,
        ctx: &HandlerContext,
        object: ObjectRef,
        is_marker: bool,
    ) -> Result<Outcome, CascadeError> {
        match self.load_file(ctx, object.id).await? {
            None => {
                debug!(file_id = %object.id, "file already purged");
                return Ok(Outcome::Done);
            }
            Some(file) if !file.is_trashed() => {
                debug!(file_id = %object.id, "file not in trash");
                return Ok(Outcome::Done);
            }
            Some(_) => {}
        }

        // Re-read: a restore may have landed since the first look.
        if !self.load_file(ctx, object.id).await?.is_some_and(|f| f.is_trashed()) {
            debug!(file_id = %object.id, "restore won the race, keeping file");
            return Ok(Outcome::Done);
        }

        ctx.storage.remove_object(&object.object_path()).await?;
        let deleted = {
            let mut conn = ctx.db.pool().acquire().await?;
            files::hard_delete_if_trashed(&mut conn, object.id).await?
        };
        if deleted == 0 {
            debug!(file_id = %object.id, "file left the trash before delete");
            return Ok(Outcome::Done);
        }
        if !is_marker {
            best_effort(
                ctx.storage.unmark_as_trashed(&object).await,
                "remove file marker",
                &object.marker_path(),
            );
        }

        info!(bucket_id = %self.bucket_id, file_id = %object.id, "trashed file expired");
        ctx.record(Activity::file(Action::Expire, self.bucket_id, object.id)).await;
        Ok(Outcome::Done)
    }

    async fn load_file(&self, ctx: &HandlerContext, id: Uuid) -> Result<Option<File>, CascadeError> {
        let mut conn = ctx.db.pool().acquire().await?;
        Ok(files::find_unscoped(&mut conn, id).await?)
    }

    /// A folder whose marker expired is purged as a whole, unless a restore
    /// already picked it up.
    async fn expire_folder(&self, ctx: &HandlerContext, object: ObjectRef) -> Result<Outcome, CascadeError> {
        let folder = {
            let mut conn = ctx.db.pool().acquire().await?;
            folders::find_unscoped(&mut conn, object.id).await?
        };
        let Some(folder) = folder else {
            return Ok(Outcome::Done);
        };
        if !folder.is_trashed() || folder.status != Some(FolderStatus::Trashed) {
            debug!(folder_id = %folder.id, status = ?folder.status, "folder not in steady trash, keeping it");
            return Ok(Outcome::Done);
        }

        let user_id = folder.trashed_by.unwrap_or_else(Uuid::nil);
        publish(
            ctx.publisher.as_ref(),
            &[FolderPurge {
                bucket_id: self.bucket_id,
                folder_id: folder.id,
                user_id,
            }],
        )
        .await?;
        info!(bucket_id = %self.bucket_id, folder_id = %folder.id, "trashed folder expired, purging");
        ctx.record(Activity::folder(Action::Expire, self.bucket_id, folder.id)).await;
        Ok(Outcome::Done)
    }
}
