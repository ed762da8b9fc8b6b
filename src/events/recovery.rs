//! Startup recovery for cascades the broker may have lost.
//!
//! The in-process broker keeps its queues in memory, so a restart drops
//! every pending delivery. The database still records which cascades were
//! in flight, and every handler is idempotent, so re-publishing one event
//! per unfinished cascade is enough to resume them.

use tracing::{info, warn};
use uuid::Uuid;

use super::{BucketPurge, FolderPurge, FolderRestore, FolderTrash, publish};
use crate::db::{Database, buckets, folders};
use crate::errors::CascadeError;
use crate::messaging::Publisher;
use crate::models::{Folder, FolderStatus};

/// Upper bound on rows inspected per cascade kind.
pub const RECOVERY_SCAN_LIMIT: usize = 10_000;

/// Events re-published by [`resume_cascades`], per kind.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Resumed {
    pub folder_trash: usize,
    pub folder_restore: usize,
    pub folder_purge: usize,
    pub bucket_purge: usize,
}

impl Resumed {
    pub fn total(&self) -> usize {
        self.folder_trash + self.folder_restore + self.folder_purge + self.bucket_purge
    }
}

/// Re-publish one event for every cascade the database shows as unfinished.
pub async fn resume_cascades(db: &Database, publisher: &dyn Publisher) -> Result<Resumed, CascadeError> {
    let (trashing, restoring, purging, deleted) = {
        let mut conn = db.pool().acquire().await?;
        (
            folders::trashed_with_active_children(&mut conn, RECOVERY_SCAN_LIMIT).await?,
            folders::with_status(&mut conn, FolderStatus::Restoring, RECOVERY_SCAN_LIMIT).await?,
            folders::with_status(&mut conn, FolderStatus::Purging, RECOVERY_SCAN_LIMIT).await?,
            buckets::deleted(&mut conn, RECOVERY_SCAN_LIMIT).await?,
        )
    };
    for (kind, len) in [
        ("trash", trashing.len()),
        ("restore", restoring.len()),
        ("purge", purging.len()),
        ("bucket purge", deleted.len()),
    ] {
        if len == RECOVERY_SCAN_LIMIT {
            warn!(kind, "recovery scan hit its limit, later cascades resume on the next start");
        }
    }

    let trash: Vec<FolderTrash> = trashing
        .iter()
        .map(|f| FolderTrash {
            bucket_id: f.bucket_id,
            folder_id: f.id,
            user_id: actor(f),
        })
        .collect();
    let restore: Vec<FolderRestore> = restoring
        .iter()
        .map(|f| FolderRestore {
            bucket_id: f.bucket_id,
            folder_id: f.id,
            user_id: actor(f),
        })
        .collect();
    let purge: Vec<FolderPurge> = purging
        .iter()
        .map(|f| FolderPurge {
            bucket_id: f.bucket_id,
            folder_id: f.id,
            user_id: actor(f),
        })
        .collect();
    let bucket_purge: Vec<BucketPurge> = deleted
        .iter()
        .map(|b| BucketPurge {
            bucket_id: b.id,
            user_id: b.owner_id,
        })
        .collect();

    publish(publisher, &trash).await?;
    publish(publisher, &restore).await?;
    publish(publisher, &purge).await?;
    publish(publisher, &bucket_purge).await?;

    let resumed = Resumed {
        folder_trash: trash.len(),
        folder_restore: restore.len(),
        folder_purge: purge.len(),
        bucket_purge: bucket_purge.len(),
    };
    if resumed.total() > 0 {
        info!(?resumed, "resumed unfinished cascades");
    }
    Ok(resumed)
}

fn actor(folder: &Folder) -> Uuid {
    folder.trashed_by.unwrap_or_else(Uuid::nil)
}
