//! TrashService: the synchronous half of trash, restore and purge.
//!
//! Every call validates state, flips it in one transaction, publishes the
//! cascade event and returns. Descendants converge later through the
//! dispatcher; until then list/read calls show the in-between state.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::activity::{self, ActivityLogger};
use crate::db::{Database, buckets, files, folders};
use crate::errors::{ServiceError, ServiceResult};
use crate::events::{
    BucketPurge, FolderPurge, FolderRestore, FolderTrash, HandlerContext, ObjectDeletion, publish,
};
use crate::messaging::Publisher;
use crate::models::{Action, Activity, Bucket, File, FileStatus, Folder, FolderStatus, ObjectType};
use crate::storage::{ObjectRef, ObjectStorage};

/// One top-level entry of a bucket's trash listing.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct TrashEntry {
    pub object_type: ObjectType,
    pub id: Uuid,
    pub name: String,
    pub deleted_at: DateTime<Utc>,
    pub trashed_by: Option<Uuid>,
    /// When storage lifecycle will expire the item.
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TrashService {
    db: Database,
    storage: Arc<dyn ObjectStorage>,
    publisher: Arc<dyn Publisher>,
    activity: Arc<dyn ActivityLogger>,
    retention: ChronoDuration,
}

impl TrashService {
    pub fn new(
        db: Database,
        storage: Arc<dyn ObjectStorage>,
        publisher: Arc<dyn Publisher>,
        activity: Arc<dyn ActivityLogger>,
        trash_retention_days: u32,
    ) -> Self {
        Self {
            db,
            storage,
            publisher,
            activity,
            retention: ChronoDuration::days(i64::from(trash_retention_days)),
        }
    }

    /// Share the handles the dispatcher already holds.
    pub fn from_context(ctx: &HandlerContext) -> Self {
        Self::new(
            ctx.db.clone(),
            ctx.storage.clone(),
            ctx.publisher.clone(),
            ctx.activity.clone(),
            ctx.trash_retention_days,
        )
    }

    // ---------------------------------------------------------------------
    // Folders
    // ---------------------------------------------------------------------

    /// Move a live folder to the trash and start the cascade over its subtree.
    pub async fn trash_folder(&self, bucket_id: Uuid, folder_id: Uuid, user_id: Uuid) -> ServiceResult<()> {
        let mut tx = self.db.begin().await?;
        live_bucket(&mut tx, bucket_id).await?;
        let folder = folders::find(&mut tx, folder_id)
            .await?
            .filter(|f| f.bucket_id == bucket_id)
            .ok_or(ServiceError::FolderNotFound(folder_id))?;

        let object = ObjectRef::folder(bucket_id, folder.id);
        if let Err(err) = self.storage.mark_as_trashed(&object).await {
            warn!(key = %object.marker_path(), "mark folder as trashed failed: {}", err);
        }
        folders::soft_delete(&mut tx, &[folder.id], user_id, Utc::now()).await?;
        tx.commit().await?;

        publish(
            self.publisher.as_ref(),
            &[FolderTrash {
                bucket_id,
                folder_id: folder.id,
                user_id,
            }],
        )
        .await?;
        info!(%bucket_id, folder_id = %folder.id, "folder moved to trash");
        Ok(())
    }

    /// Start bringing a trashed folder back.
    ///
    /// Name clashes anywhere in the trashed subtree are rejected here, before
    /// any state changes. The cascade checks again in case the tree moved in
    /// between.
    pub async fn restore_folder(&self, bucket_id: Uuid, folder_id: Uuid, user_id: Uuid) -> ServiceResult<()> {
        let mut tx = self.db.begin().await?;
        live_bucket(&mut tx, bucket_id).await?;
        let folder = trashed_folder(&mut tx, bucket_id, folder_id).await?;
        if folder.is_restoring() {
            return Err(ServiceError::InvalidState("folder is already being restored".into()));
        }
        if folder.is_purging() {
            return Err(ServiceError::InvalidState("folder is being purged".into()));
        }
        if let Some(parent_id) = folder.folder_id {
            if folders::find(&mut tx, parent_id).await?.is_none() {
                return Err(ServiceError::InvalidState(
                    "parent folder is in the trash, restore it first".into(),
                ));
            }
        }
        if folders::has_active_sibling_named(&mut tx, bucket_id, folder.folder_id, &folder.name, Some(folder.id))
            .await?
        {
            return Err(ServiceError::NameConflict(folder.name));
        }
        if let Some(name) = folders::restore_conflict(&mut tx, bucket_id, folder.id).await? {
            return Err(ServiceError::NameConflict(name));
        }
        if let Some(name) = files::restore_conflict(&mut tx, bucket_id, folder.id).await? {
            return Err(ServiceError::NameConflict(name));
        }

        folders::set_status(&mut tx, &[folder.id], Some(FolderStatus::Restoring)).await?;
        tx.commit().await?;

        publish(
            self.publisher.as_ref(),
            &[FolderRestore {
                bucket_id,
                folder_id: folder.id,
                user_id,
            }],
        )
        .await?;
        info!(%bucket_id, folder_id = %folder.id, "folder restore started");
        Ok(())
    }

    /// Permanently delete a trashed folder and its subtree.
    pub async fn purge_folder(&self, bucket_id: Uuid, folder_id: Uuid, user_id: Uuid) -> ServiceResult<()> {
        let mut tx = self.db.begin().await?;
        let folder = trashed_folder(&mut tx, bucket_id, folder_id).await?;
        if folder.is_restoring() {
            return Err(ServiceError::InvalidState("folder is being restored".into()));
        }
        folders::claim_for_purge(&mut tx, &[folder.id], Utc::now()).await?;
        tx.commit().await?;

        publish(
            self.publisher.as_ref(),
            &[FolderPurge {
                bucket_id,
                folder_id: folder.id,
                user_id,
            }],
        )
        .await?;
        info!(%bucket_id, folder_id = %folder.id, "folder purge started");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Files
    // ---------------------------------------------------------------------

    pub async fn trash_file(&self, bucket_id: Uuid, file_id: Uuid, user_id: Uuid) -> ServiceResult<()> {
        let mut tx = self.db.begin().await?;
        live_bucket(&mut tx, bucket_id).await?;
        let file = files::find(&mut tx, file_id)
            .await?
            .filter(|f| f.bucket_id == bucket_id)
            .ok_or(ServiceError::FileNotFound(file_id))?;
        if !file.status.can_transition_to(FileStatus::Trashed) {
            return Err(ServiceError::InvalidState(format!("file is {}", file.status)));
        }

        let object = file.object_ref();
        if let Err(err) = self.storage.mark_as_trashed(&object).await {
            warn!(key = %object.marker_path(), "mark file as trashed failed: {}", err);
        }
        files::soft_delete(&mut tx, &[file.id], user_id, Utc::now()).await?;
        tx.commit().await?;

        self.record(Activity::file(Action::Trash, bucket_id, file.id).by(user_id)).await;
        Ok(())
    }

    /// Restore a trashed file. The row is cleared before the marker goes, so
    /// an expiration racing with this call finds the file live and backs off.
    pub async fn restore_file(&self, bucket_id: Uuid, file_id: Uuid, user_id: Uuid) -> ServiceResult<()> {
        let mut tx = self.db.begin().await?;
        live_bucket(&mut tx, bucket_id).await?;
        let file = trashed_file(&mut tx, bucket_id, file_id).await?;
        if let Some(parent_id) = file.folder_id {
            if folders::find(&mut tx, parent_id).await?.is_none() {
                return Err(ServiceError::InvalidState(
                    "parent folder is in the trash, restore it first".into(),
                ));
            }
        }
        if files::has_active_sibling_named(&mut tx, bucket_id, file.folder_id, &file.name, Some(file.id)).await? {
            return Err(ServiceError::NameConflict(file.name));
        }

        files::restore(&mut tx, &[file.id]).await?;
        tx.commit().await?;

        let object = file.object_ref();
        if let Err(err) = self.storage.unmark_as_trashed(&object).await {
            warn!(key = %object.marker_path(), "unmark file failed: {}", err);
        }
        self.record(Activity::file(Action::Restore, bucket_id, file.id).by(user_id)).await;
        Ok(())
    }

    pub async fn purge_file(&self, bucket_id: Uuid, file_id: Uuid, user_id: Uuid) -> ServiceResult<()> {
        let mut tx = self.db.begin().await?;
        let file = trashed_file(&mut tx, bucket_id, file_id).await?;

        let object = file.object_ref();
        self.storage.remove_object(&object.object_path()).await?;
        files::hard_delete(&mut tx, &[file.id]).await?;
        tx.commit().await?;

        if let Err(err) = self.storage.unmark_as_trashed(&object).await {
            warn!(key = %object.marker_path(), "remove file marker failed: {}", err);
        }
        self.record(Activity::file(Action::Purge, bucket_id, file.id).by(user_id)).await;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Buckets and paths
    // ---------------------------------------------------------------------

    /// Soft-delete a bucket and hand the teardown to `BucketPurge`.
    pub async fn delete_bucket(&self, bucket_id: Uuid, user_id: Uuid) -> ServiceResult<Bucket> {
        let mut tx = self.db.begin().await?;
        let mut bucket = live_bucket(&mut tx, bucket_id).await?;
        let now = Utc::now();
        buckets::soft_delete(&mut tx, bucket_id, now).await?;
        tx.commit().await?;
        bucket.deleted_at = Some(now);

        publish(self.publisher.as_ref(), &[BucketPurge { bucket_id, user_id }]).await?;
        self.record(Activity::new(Action::Delete, ObjectType::Bucket, bucket_id).by(user_id))
            .await;
        info!(%bucket_id, "bucket deleted, purge scheduled");
        Ok(bucket)
    }

    /// Schedule removal of every file at or below `path`.
    pub async fn delete_path(&self, bucket_id: Uuid, path: &str, user_id: Uuid) -> ServiceResult<()> {
        let path = path.trim_matches('/');
        if path.split('/').any(|segment| segment == "..") {
            return Err(ServiceError::InvalidName(path.to_string()));
        }
        {
            let mut conn = self.db.pool().acquire().await?;
            live_bucket(&mut conn, bucket_id).await?;
        }

        publish(
            self.publisher.as_ref(),
            &[ObjectDeletion {
                bucket_id,
                path: path.to_string(),
                user_id: Some(user_id),
            }],
        )
        .await?;
        info!(%bucket_id, path, "path deletion scheduled");
        Ok(())
    }

    /// Items trashed directly (not through an ancestor), newest first.
    pub async fn list_trash(&self, bucket_id: Uuid, limit: usize) -> ServiceResult<Vec<TrashEntry>> {
        let mut conn = self.db.pool().acquire().await?;
        live_bucket(&mut conn, bucket_id).await?;

        let mut entries = Vec::new();
        for folder in folders::trashed_roots(&mut conn, bucket_id, limit).await? {
            if let Some(deleted_at) = folder.deleted_at {
                entries.push(TrashEntry {
                    object_type: ObjectType::Folder,
                    id: folder.id,
                    name: folder.name,
                    deleted_at,
                    trashed_by: folder.trashed_by,
                    expires_at: deleted_at + self.retention,
                });
            }
        }
        for file in files::trashed_roots(&mut conn, bucket_id, limit).await? {
            if let Some(deleted_at) = file.deleted_at {
                entries.push(TrashEntry {
                    object_type: ObjectType::File,
                    id: file.id,
                    name: file.name,
                    deleted_at,
                    trashed_by: file.trashed_by,
                    expires_at: deleted_at + self.retention,
                });
            }
        }
        entries.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at).then(a.id.cmp(&b.id)));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn record(&self, activity: Activity) {
        activity::record(self.activity.as_ref(), activity).await;
    }
}

async fn live_bucket(conn: &mut sqlx::SqliteConnection, bucket_id: Uuid) -> ServiceResult<Bucket> {
    buckets::find(conn, bucket_id)
        .await?
        .ok_or(ServiceError::BucketNotFound(bucket_id))
}

async fn trashed_folder(
    conn: &mut sqlx::SqliteConnection,
    bucket_id: Uuid,
    folder_id: Uuid,
) -> ServiceResult<Folder> {
    let folder = folders::find_unscoped(conn, folder_id)
        .await?
        .filter(|f| f.bucket_id == bucket_id)
        .ok_or(ServiceError::FolderNotFound(folder_id))?;
    if !folder.is_trashed() {
        return Err(ServiceError::InvalidState("folder is not in the trash".into()));
    }
    Ok(folder)
}

async fn trashed_file(conn: &mut sqlx::SqliteConnection, bucket_id: Uuid, file_id: Uuid) -> ServiceResult<File> {
    let file = files::find_unscoped(conn, file_id)
        .await?
        .filter(|f| f.bucket_id == bucket_id)
        .ok_or(ServiceError::FileNotFound(file_id))?;
    if !file.is_trashed() {
        return Err(ServiceError::InvalidState("file is not in the trash".into()));
    }
    Ok(file)
}
