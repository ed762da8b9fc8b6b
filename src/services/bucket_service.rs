//! BucketService: buckets, folders and the two-step upload flow.
//!
//! Payloads never pass through this service. `begin_upload` registers the
//! row and hands out a presigned POST; the client uploads straight to
//! storage and then calls `complete_upload`, which checks storage before
//! flipping the row to `uploaded`.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{Database, buckets, files, folders};
use crate::errors::{ServiceError, ServiceResult, StorageError, is_unique_violation};
use crate::models::{Bucket, File, FileStatus, Folder, NewFile, NewFolder};
use crate::storage::{ObjectStorage, PresignedPost};

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const ITEM_NAME_MAX_LEN: usize = 255;

#[derive(Clone)]
pub struct BucketService {
    db: Database,
    storage: Arc<dyn ObjectStorage>,
}

impl BucketService {
    pub fn new(db: Database, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { db, storage }
    }

    pub async fn create_bucket(&self, name: &str, owner_id: Uuid) -> ServiceResult<Bucket> {
        validate_bucket_name(name)?;
        let mut conn = self.db.pool().acquire().await?;
        match buckets::insert(&mut conn, name, owner_id).await {
            Ok(bucket) => {
                info!(bucket_id = %bucket.id, name, "bucket created");
                Ok(bucket)
            }
            Err(err) if is_unique_violation(&err) => Err(ServiceError::NameConflict(name.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// Create a folder under `parent` (`None` = bucket root).
    pub async fn create_folder(&self, bucket_id: Uuid, parent: Option<Uuid>, name: &str) -> ServiceResult<Folder> {
        validate_item_name(name)?;
        let mut tx = self.db.begin().await?;
        buckets::find(&mut tx, bucket_id)
            .await?
            .ok_or(ServiceError::BucketNotFound(bucket_id))?;
        if let Some(parent_id) = parent {
            live_parent(&mut tx, bucket_id, parent_id).await?;
        }
        if folders::has_active_sibling_named(&mut tx, bucket_id, parent, name, None).await? {
            return Err(ServiceError::NameConflict(name.to_string()));
        }

        let mut new = NewFolder::new(bucket_id, name);
        if let Some(parent_id) = parent {
            new = new.with_parent(parent_id);
        }
        let folder = folders::insert(&mut tx, &new).await?;
        tx.commit().await?;
        debug!(%bucket_id, folder_id = %folder.id, "folder created");
        Ok(folder)
    }

    /// Register a file in `uploading` state and presign its upload.
    pub async fn begin_upload(
        &self,
        bucket_id: Uuid,
        parent: Option<Uuid>,
        name: &str,
        expiry: Duration,
    ) -> ServiceResult<(File, PresignedPost)> {
        validate_item_name(name)?;
        let mut tx = self.db.begin().await?;
        buckets::find(&mut tx, bucket_id)
            .await?
            .ok_or(ServiceError::BucketNotFound(bucket_id))?;
        let path = match parent {
            Some(parent_id) => {
                live_parent(&mut tx, bucket_id, parent_id).await?;
                format!("{}/{}", folders::path_of(&mut tx, parent_id).await?, name)
            }
            None => name.to_string(),
        };
        if files::has_active_sibling_named(&mut tx, bucket_id, parent, name, None).await? {
            return Err(ServiceError::NameConflict(name.to_string()));
        }

        let file = files::insert(
            &mut tx,
            &NewFile {
                bucket_id,
                folder_id: parent,
                name: name.to_string(),
                path,
            },
        )
        .await?;
        tx.commit().await?;

        let post = self
            .storage
            .presigned_post_policy(&file.object_ref().object_path(), expiry)
            .await?;
        debug!(%bucket_id, file_id = %file.id, path = %file.path, "upload started");
        Ok((file, post))
    }

    /// Confirm the payload landed and record its size.
    pub async fn complete_upload(&self, bucket_id: Uuid, file_id: Uuid) -> ServiceResult<File> {
        let file = self.live_file(bucket_id, file_id).await?;
        if !file.status.can_transition_to(FileStatus::Uploaded) {
            return Err(ServiceError::InvalidState(format!("file is {}", file.status)));
        }

        let info = match self.storage.stat_object(&file.object_ref().object_path()).await {
            Ok(info) => info,
            Err(StorageError::NotFound(_)) => {
                return Err(ServiceError::InvalidState("payload has not been uploaded".into()));
            }
            Err(err) => return Err(err.into()),
        };

        let mut conn = self.db.pool().acquire().await?;
        if files::mark_uploaded(&mut conn, file.id, info.size).await? == 0 {
            return Err(ServiceError::InvalidState("file changed during upload".into()));
        }
        let file = files::find(&mut conn, file.id)
            .await?
            .ok_or(ServiceError::FileNotFound(file_id))?;
        info!(%bucket_id, file_id = %file.id, size = file.size, "upload complete");
        Ok(file)
    }

    pub async fn download_url(&self, bucket_id: Uuid, file_id: Uuid, expiry: Duration) -> ServiceResult<String> {
        let file = self.live_file(bucket_id, file_id).await?;
        if file.status != FileStatus::Uploaded {
            return Err(ServiceError::InvalidState(format!("file is {}", file.status)));
        }
        Ok(self
            .storage
            .presigned_get_object(&file.object_ref().object_path(), expiry)
            .await?)
    }

    async fn live_file(&self, bucket_id: Uuid, file_id: Uuid) -> ServiceResult<File> {
        let mut conn = self.db.pool().acquire().await?;
        buckets::find(&mut conn, bucket_id)
            .await?
            .ok_or(ServiceError::BucketNotFound(bucket_id))?;
        files::find(&mut conn, file_id)
            .await?
            .filter(|f| f.bucket_id == bucket_id)
            .ok_or(ServiceError::FileNotFound(file_id))
    }
}

async fn live_parent(conn: &mut sqlx::SqliteConnection, bucket_id: Uuid, parent_id: Uuid) -> ServiceResult<Folder> {
    folders::find(conn, parent_id)
        .await?
        .filter(|f| f.bucket_id == bucket_id)
        .ok_or(ServiceError::FolderNotFound(parent_id))
}

fn validate_bucket_name(name: &str) -> ServiceResult<()> {
    let len = name.len();
    let valid = (BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len)
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
        && !name.starts_with(['-', '.'])
        && !name.ends_with(['-', '.']);
    if valid {
        Ok(())
    } else {
        Err(ServiceError::InvalidName(name.to_string()))
    }
}

fn validate_item_name(name: &str) -> ServiceResult<()> {
    if name.is_empty()
        || name.len() > ITEM_NAME_MAX_LEN
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.chars().any(char::is_control)
    {
        return Err(ServiceError::InvalidName(name.to_string()));
    }
    Ok(())
}
