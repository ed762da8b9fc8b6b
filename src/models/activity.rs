//! Activity log entries emitted by user actions and cascades.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Domain an activity belongs to.
pub const DOMAIN_BUCKET: &str = "bucket";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ObjectType {
    Bucket,
    Folder,
    File,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Action {
    Trash,
    Restore,
    Purge,
    Expire,
    Delete,
}

/// One structured activity record.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Activity {
    pub action: Action,
    pub bucket_id: Uuid,
    pub folder_id: Option<Uuid>,
    pub file_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub domain: String,
    pub object_type: ObjectType,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn new(action: Action, object_type: ObjectType, bucket_id: Uuid) -> Self {
        Self {
            action,
            bucket_id,
            folder_id: None,
            file_id: None,
            user_id: None,
            domain: DOMAIN_BUCKET.to_string(),
            object_type,
            created_at: Utc::now(),
        }
    }

    pub fn folder(action: Action, bucket_id: Uuid, folder_id: Uuid) -> Self {
        Self {
            folder_id: Some(folder_id),
            ..Self::new(action, ObjectType::Folder, bucket_id)
        }
    }

    pub fn file(action: Action, bucket_id: Uuid, file_id: Uuid) -> Self {
        Self {
            file_id: Some(file_id),
            ..Self::new(action, ObjectType::File, bucket_id)
        }
    }

    pub fn by(mut self, user_id: impl Into<Option<Uuid>>) -> Self {
        self.user_id = user_id.into();
        self
    }
}
