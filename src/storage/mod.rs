//! Object storage seam.
//!
//! Cascades only talk to [`ObjectStorage`]; they never branch on which
//! backend sits behind it.

pub mod lifecycle;
pub mod local;
pub mod marker;
pub mod memory;
pub mod signing;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::StorageResult;
pub use marker::{ObjectKind, ObjectRef};

/// Metadata of a stored object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: i64,
    pub etag: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// One page of a prefix listing, ordered by key.
#[derive(Clone, Debug, Default)]
pub struct ObjectPage {
    pub objects: Vec<ObjectInfo>,
    pub is_truncated: bool,

    /// Pass back as `start_after` to fetch the next page.
    pub next_start_after: Option<String>,
}

/// Form fields a client posts alongside the payload for a direct upload.
#[derive(Clone, Debug)]
pub struct PresignedPost {
    pub url: String,
    pub fields: HashMap<String, String>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put_object(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Remove one object. A missing object is not an error.
    async fn remove_object(&self, key: &str) -> StorageResult<()>;

    async fn remove_objects(&self, keys: &[String]) -> StorageResult<()> {
        for key in keys {
            self.remove_object(key).await?;
        }
        Ok(())
    }

    async fn list_objects(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        max_keys: usize,
    ) -> StorageResult<ObjectPage>;

    /// Read a whole object into memory.
    async fn get_object(&self, key: &str) -> StorageResult<Bytes>;

    async fn stat_object(&self, key: &str) -> StorageResult<ObjectInfo>;

    async fn presigned_post_policy(
        &self,
        key: &str,
        expiry: Duration,
    ) -> StorageResult<PresignedPost>;

    async fn presigned_get_object(&self, key: &str, expiry: Duration) -> StorageResult<String>;

    /// Write the zero-byte trash marker for `object`.
    async fn mark_as_trashed(&self, object: &ObjectRef) -> StorageResult<()> {
        self.put_object(&object.marker_path(), Bytes::new()).await
    }

    /// Remove the trash marker for `object`. A missing marker is not an error.
    async fn unmark_as_trashed(&self, object: &ObjectRef) -> StorageResult<()> {
        self.remove_object(&object.marker_path()).await
    }

    /// Whether `path` is a trash marker, and the logical key of the real object.
    fn is_trash_marker_path(&self, path: &str) -> (bool, String) {
        marker::is_trash_marker_path(path)
    }
}
