//! Represents a folder inside a bucket's tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::status::FolderStatus;

/// A folder row.
///
/// `folder_id` is the parent; `None` places the folder at the bucket root.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Folder {
    pub id: Uuid,
    pub bucket_id: Uuid,
    pub folder_id: Option<Uuid>,
    pub name: String,
    pub status: Option<FolderStatus>,
    pub created_at: DateTime<Utc>,

    /// Soft-delete timestamp. Set while the folder is in the trash.
    pub deleted_at: Option<DateTime<Utc>>,

    /// User who moved the folder (or an ancestor) to the trash.
    pub trashed_by: Option<Uuid>,
}

impl Folder {
    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_restoring(&self) -> bool {
        self.status == Some(FolderStatus::Restoring)
    }

    pub fn is_purging(&self) -> bool {
        self.status == Some(FolderStatus::Purging)
    }
}

/// Data for creating a new folder.
#[derive(Debug, Clone)]
pub struct NewFolder {
    pub bucket_id: Uuid,
    pub folder_id: Option<Uuid>,
    pub name: String,
}

impl NewFolder {
    pub fn new(bucket_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            bucket_id,
            folder_id: None,
            name: name.into(),
        }
    }

    /// Place the folder under `parent`.
    pub fn with_parent(mut self, parent: Uuid) -> Self {
        self.folder_id = Some(parent);
        self
    }
}
