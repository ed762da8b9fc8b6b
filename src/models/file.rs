//! Represents a file (object) stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::status::FileStatus;
use crate::storage::marker::ObjectRef;

/// A file row.
///
/// The row stores metadata only; the payload lives in object storage under
/// the key derived from [`File::object_ref`].
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct File {
    pub id: Uuid,
    pub bucket_id: Uuid,

    /// Parent folder, `None` for files at the bucket root.
    pub folder_id: Option<Uuid>,

    pub name: String,

    /// Logical path within the bucket, e.g. `docs/reports/q1.pdf`.
    pub path: String,

    /// Size in bytes, known once the upload completed.
    pub size: i64,

    pub extension: Option<String>,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub trashed_by: Option<Uuid>,
}

impl File {
    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::file(self.bucket_id, self.id)
    }
}

/// Data for registering a new upload.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub bucket_id: Uuid,
    pub folder_id: Option<Uuid>,
    pub name: String,
    pub path: String,
}

/// Split the extension off a file name (`report.tar.gz` → `gz`).
pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
