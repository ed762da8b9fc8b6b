//! Represents a logical bucket, the tenant root of a folder tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage bucket.
///
/// Buckets own every folder and file beneath them. Deleting a bucket
/// soft-deletes the row; the purge cascade removes it for good.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Unique identifier for this bucket.
    pub id: Uuid,

    /// Display name, unique per owner among live buckets.
    pub name: String,

    /// ID of the user that owns this bucket.
    pub owner_id: Uuid,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,

    /// Set once the owner deleted the bucket and a purge is pending.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Bucket {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
