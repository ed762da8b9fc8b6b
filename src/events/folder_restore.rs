//! FolderRestore: bring a restoring folder and its subtree back.
//!
//! Ordering matters here. Rows are restored and committed *before* any trash
//! marker is removed: once a marker disappears, storage may report it as
//! expired, and the expiration handler must then find `deleted_at` already
//! cleared so it backs off instead of deleting a file the user just got back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Event, HandlerContext, Outcome, TRASH_TOPIC, best_effort, publish};
use crate::db::{ChildFilter, files, folders};
use crate::errors::CascadeError;
use crate::models::{Action, Activity, Folder, FolderStatus};
use crate::notify::Notification;
use crate::storage::ObjectRef;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FolderRestore {
    pub bucket_id: Uuid,
    pub folder_id: Uuid,
    pub user_id: Uuid,
}

#[async_trait]
impl Event for FolderRestore {
    const NAME: &'static str = "FolderRestore";
    const TOPIC: &'static str = TRASH_TOPIC;

    async fn handle(&self, ctx: &HandlerContext) -> Result<Outcome, CascadeError> {
        let limit = ctx.batch_limit;
        let mut tx = ctx.db.begin().await?;

        let Some(folder) = folders::find_unscoped(&mut tx, self.folder_id).await? else {
            debug!(folder_id = %self.folder_id, "folder gone, nothing to restore");
            return Ok(Outcome::Done);
        };
        if !folder.is_restoring() {
            debug!(folder_id = %folder.id, status = ?folder.status, "folder not restoring, skipping");
            return Ok(Outcome::Done);
        }

        if folders::has_active_sibling_named(
            &mut tx,
            self.bucket_id,
            folder.folder_id,
            &folder.name,
            Some(folder.id),
        )
        .await?
        {
            return self.abandon(ctx, tx, &folder, folder.name.clone()).await;
        }

        // Checked over the whole remaining subtree before anything flips, so
        // a clash deep down never leaves part of the tree restored.
        let conflict = match folders::restore_conflict(&mut tx, self.bucket_id, folder.id).await? {
            Some(name) => Some(name),
            None => files::restore_conflict(&mut tx, self.bucket_id, folder.id).await?,
        };
        if let Some(name) = conflict {
            return self.abandon(ctx, tx, &folder, name).await;
        }

        let child_folders = folders::children(
            &mut tx,
            self.bucket_id,
            Some(folder.id),
            ChildFilter::TrashedNotRestoring,
            limit,
        )
        .await?;
        let child_files = files::children(
            &mut tx,
            self.bucket_id,
            Some(folder.id),
            ChildFilter::TrashedNotRestoring,
            limit,
        )
        .await?;

        let folder_ids: Vec<Uuid> = child_folders.iter().map(|f| f.id).collect();
        let file_ids: Vec<Uuid> = child_files.iter().map(|f| f.id).collect();

        folders::set_status(&mut tx, &folder_ids, Some(FolderStatus::Restoring)).await?;
        // Files skip the transient state: clearing deleted_at right away is
        // what lets a racing expiration see the restore.
        files::restore(&mut tx, &file_ids).await?;
        tx.commit().await?;

        let fan_out: Vec<FolderRestore> = folder_ids
            .iter()
            .map(|id| FolderRestore {
                bucket_id: self.bucket_id,
                folder_id: *id,
                user_id: self.user_id,
            })
            .collect();
        publish(ctx.publisher.as_ref(), &fan_out).await?;

        for id in &file_ids {
            let object = ObjectRef::file(self.bucket_id, *id);
            best_effort(
                ctx.storage.unmark_as_trashed(&object).await,
                "unmark file",
                &object.marker_path(),
            );
        }

        if folder_ids.len() == limit || file_ids.len() == limit {
            return Ok(Outcome::more("batch limit reached"));
        }

        // Soft-deleted children include child folders whose own restore is
        // still running; this folder stays in the trash until they finish.
        let pending = {
            let mut conn = ctx.db.pool().acquire().await?;
            folders::count_children(&mut conn, self.bucket_id, Some(folder.id), ChildFilter::Trashed)
                .await?
                + files::count_children(&mut conn, self.bucket_id, Some(folder.id), ChildFilter::Trashed)
                    .await?
        };
        if pending > 0 {
            return Ok(Outcome::more(format!("{} children still in trash", pending)));
        }

        let mut tx = ctx.db.begin().await?;
        match folders::find_unscoped(&mut tx, folder.id).await? {
            Some(current) if current.is_restoring() => {
                folders::clear_trash(&mut tx, folder.id).await?;
                tx.commit().await?;
            }
            _ => {
                debug!(folder_id = %folder.id, "folder changed state before finishing restore");
                return Ok(Outcome::Done);
            }
        }

        let object = ObjectRef::folder(self.bucket_id, folder.id);
        best_effort(
            ctx.storage.unmark_as_trashed(&object).await,
            "unmark folder",
            &object.marker_path(),
        );
        ctx.record(Activity::folder(Action::Restore, self.bucket_id, folder.id).by(self.user_id))
            .await;
        Ok(Outcome::Done)
    }
}

impl FolderRestore {
    /// Give up on the whole restore this folder belongs to: the topmost
    /// restoring ancestor and everything below it go back to the trash.
    async fn abandon(
        &self,
        ctx: &HandlerContext,
        mut tx: sqlx::Transaction<'static, sqlx::Sqlite>,
        folder: &Folder,
        name: String,
    ) -> Result<Outcome, CascadeError> {
        let root = folders::restoring_root(&mut tx, folder.id).await?;
        let reverted = folders::abandon_restore(&mut tx, root).await?;
        tx.commit().await?;

        warn!(
            bucket_id = %self.bucket_id,
            folder_id = %folder.id,
            root_id = %root,
            reverted,
            "restore abandoned, name `{}` already in use", name
        );
        ctx.notifier
            .notify(Notification::RestoreConflict {
                bucket_id: self.bucket_id,
                folder_id: root,
                user_id: self.user_id,
                name: name.clone(),
            })
            .await;
        Ok(Outcome::PermanentFailure(format!(
            "name conflict on `{}`",
            name
        )))
    }
}
