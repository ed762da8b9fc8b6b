//! Activity logging.
//!
//! Cascades report what they did through [`ActivityLogger`]. A failed send
//! is logged and dropped; it never fails the cascade that produced it.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use crate::errors::ActivityError;
use crate::models::Activity;

#[async_trait]
pub trait ActivityLogger: Send + Sync {
    async fn send(&self, activity: Activity) -> Result<(), ActivityError>;
}

/// Send `activity`, downgrading a failure to a warning.
pub async fn record(logger: &dyn ActivityLogger, activity: Activity) {
    let action = activity.action;
    let bucket_id = activity.bucket_id;
    if let Err(err) = logger.send(activity).await {
        warn!(?action, %bucket_id, "failed to record activity: {}", err);
    }
}

/// Persists activities to the `activities` table.
#[derive(Clone)]
pub struct DbActivityLogger {
    pool: SqlitePool,
}

impl DbActivityLogger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Most recent activities of a bucket, newest first.
    pub async fn for_bucket(&self, bucket_id: Uuid, limit: i64) -> Result<Vec<Activity>, ActivityError> {
        let rows = sqlx::query_as::<_, Activity>(
            "SELECT action, bucket_id, folder_id, file_id, user_id, domain, object_type, created_at
             FROM activities WHERE bucket_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(bucket_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl ActivityLogger for DbActivityLogger {
    async fn send(&self, activity: Activity) -> Result<(), ActivityError> {
        let fields = serde_json::to_string(&activity)
            .map_err(|err| ActivityError::Rejected(err.to_string()))?;
        sqlx::query(
            "INSERT INTO activities (action, bucket_id, folder_id, file_id, user_id, domain, object_type, fields, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(activity.action)
        .bind(activity.bucket_id)
        .bind(activity.folder_id)
        .bind(activity.file_id)
        .bind(activity.user_id)
        .bind(&activity.domain)
        .bind(activity.object_type)
        .bind(fields)
        .bind(activity.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
