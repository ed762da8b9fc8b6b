//! Lifecycle status layered over soft-delete.
//!
//! `deleted_at` decides whether an item is in the trash; the status column
//! only refines it. `Restoring` and `Purging` are transient and mark that a
//! restore or purge cascade has claimed the folder.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status column of a folder. `None` in the row means active.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum FolderStatus {
    Trashed,
    Restoring,
    Purging,
}

impl FolderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderStatus::Trashed => "trashed",
            FolderStatus::Restoring => "restoring",
            FolderStatus::Purging => "purging",
        }
    }
}

impl fmt::Display for FolderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status column of a file.
///
/// uploading → uploaded → trashed → {restoring → uploaded | purged}
///
/// An upload still in flight when its folder is trashed keeps `uploading`;
/// only `deleted_at` records that it sits in the trash.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum FileStatus {
    Uploading,
    Uploaded,
    Trashed,
    Restoring,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Uploading => "uploading",
            FileStatus::Uploaded => "uploaded",
            FileStatus::Trashed => "trashed",
            FileStatus::Restoring => "restoring",
        }
    }

    /// Whether the status may follow `self` in the file lifecycle.
    pub fn can_transition_to(&self, next: FileStatus) -> bool {
        matches!(
            (self, next),
            (FileStatus::Uploading, FileStatus::Uploaded)
                | (FileStatus::Uploaded, FileStatus::Trashed)
                | (FileStatus::Trashed, FileStatus::Restoring)
                | (FileStatus::Trashed, FileStatus::Uploaded)
                | (FileStatus::Restoring, FileStatus::Uploaded)
                | (FileStatus::Restoring, FileStatus::Trashed)
        )
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_lifecycle_transitions() {
        assert!(FileStatus::Uploading.can_transition_to(FileStatus::Uploaded));
        assert!(FileStatus::Uploaded.can_transition_to(FileStatus::Trashed));
        assert!(FileStatus::Trashed.can_transition_to(FileStatus::Restoring));
        assert!(FileStatus::Restoring.can_transition_to(FileStatus::Uploaded));
    }

    #[test]
    fn test_file_lifecycle_rejects_shortcuts() {
        assert!(!FileStatus::Uploading.can_transition_to(FileStatus::Trashed));
        assert!(!FileStatus::Uploaded.can_transition_to(FileStatus::Restoring));
        assert!(!FileStatus::Uploaded.can_transition_to(FileStatus::Uploading));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&FolderStatus::Restoring).unwrap();
        assert_eq!(json, "\"restoring\"");
        assert_eq!(FileStatus::Uploaded.to_string(), "uploaded");
        assert_eq!(FolderStatus::Purging.to_string(), "purging");
    }
}
