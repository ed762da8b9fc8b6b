//! Trash-marker key protocol.
//!
//! Real objects live under `buckets/{bucket}/files/{id}`. While an item is
//! in the trash a zero-byte marker sits at `trash/{bucket}/{files|folders}/{id}`,
//! so a storage-native expiration rule scoped to `trash/` decides *when* an
//! item is really deleted while the database keeps deciding *what*.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const OBJECT_ROOT: &str = "buckets";
pub const TRASH_ROOT: &str = "trash";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    File,
    Folder,
}

impl ObjectKind {
    fn segment(&self) -> &'static str {
        match self {
            ObjectKind::File => "files",
            ObjectKind::Folder => "folders",
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "files" => Some(ObjectKind::File),
            "folders" => Some(ObjectKind::Folder),
            _ => None,
        }
    }
}

/// Identity of a trashable object, from which both its real key and its
/// marker key are derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub bucket_id: Uuid,
    pub kind: ObjectKind,
    pub id: Uuid,
}

impl ObjectRef {
    pub fn file(bucket_id: Uuid, id: Uuid) -> Self {
        Self {
            bucket_id,
            kind: ObjectKind::File,
            id,
        }
    }

    pub fn folder(bucket_id: Uuid, id: Uuid) -> Self {
        Self {
            bucket_id,
            kind: ObjectKind::Folder,
            id,
        }
    }

    /// Logical key of the real object.
    pub fn object_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            OBJECT_ROOT,
            self.bucket_id,
            self.kind.segment(),
            self.id
        )
    }

    /// Key of the zero-byte trash marker.
    pub fn marker_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            TRASH_ROOT,
            self.bucket_id,
            self.kind.segment(),
            self.id
        )
    }

    /// Parse either a real object key or a marker key.
    pub fn parse(path: &str) -> Option<Self> {
        let mut parts = path.trim_start_matches('/').split('/');
        let root = parts.next()?;
        if root != OBJECT_ROOT && root != TRASH_ROOT {
            return None;
        }
        let bucket_id = Uuid::parse_str(parts.next()?).ok()?;
        let kind = ObjectKind::from_segment(parts.next()?)?;
        let id = Uuid::parse_str(parts.next()?).ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            bucket_id,
            kind,
            id,
        })
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.object_path())
    }
}

/// Reverse-map a marker key to the real object's logical key.
///
/// Returns `(false, path)` unchanged for keys outside `trash/`.
pub fn is_trash_marker_path(path: &str) -> (bool, String) {
    let trimmed = path.trim_start_matches('/');
    match trimmed.strip_prefix(TRASH_ROOT).and_then(|rest| rest.strip_prefix('/')) {
        Some(rest) if !rest.is_empty() => (true, format!("{}/{}", OBJECT_ROOT, rest)),
        _ => (false, path.to_string()),
    }
}

/// Prefix holding every real object of a bucket.
pub fn bucket_prefix(bucket_id: Uuid) -> String {
    format!("{}/{}/", OBJECT_ROOT, bucket_id)
}

/// Prefix holding the file payloads of a bucket.
pub fn files_prefix(bucket_id: Uuid) -> String {
    format!("{}/{}/files/", OBJECT_ROOT, bucket_id)
}

/// Prefix holding every trash marker of a bucket.
pub fn trash_prefix(bucket_id: Uuid) -> String {
    format!("{}/{}/", TRASH_ROOT, bucket_id)
}
