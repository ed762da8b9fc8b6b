//! Bucket rows.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::models::Bucket;

const BUCKET_COLUMNS: &str = "id, name, owner_id, created_at, deleted_at";

pub async fn insert(conn: &mut SqliteConnection, name: &str, owner_id: Uuid) -> sqlx::Result<Bucket> {
    let bucket = Bucket {
        id: Uuid::new_v4(),
        name: name.to_string(),
        owner_id,
        created_at: Utc::now(),
        deleted_at: None,
    };
    sqlx::query(
        "INSERT INTO buckets (id, name, owner_id, created_at, deleted_at)
         VALUES (?, ?, ?, ?, NULL)",
    )
    .bind(bucket.id)
    .bind(&bucket.name)
    .bind(bucket.owner_id)
    .bind(bucket.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(bucket)
}

/// Fetch a bucket whether or not it has been deleted.
pub async fn find_unscoped(conn: &mut SqliteConnection, id: Uuid) -> sqlx::Result<Option<Bucket>> {
    sqlx::query_as::<_, Bucket>(&format!(
        "SELECT {} FROM buckets WHERE id = ?",
        BUCKET_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
}

pub async fn find(conn: &mut SqliteConnection, id: Uuid) -> sqlx::Result<Option<Bucket>> {
    Ok(find_unscoped(conn, id)
        .await?
        .filter(|bucket| !bucket.is_deleted()))
}

pub async fn soft_delete(
    conn: &mut SqliteConnection,
    id: Uuid,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let result = sqlx::query("UPDATE buckets SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Buckets deleted but not yet purged.
pub async fn deleted(conn: &mut SqliteConnection, limit: usize) -> sqlx::Result<Vec<Bucket>> {
    sqlx::query_as::<_, Bucket>(&format!(
        "SELECT {} FROM buckets WHERE deleted_at IS NOT NULL ORDER BY deleted_at ASC, id ASC LIMIT ?",
        BUCKET_COLUMNS
    ))
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await
}

pub async fn hard_delete(conn: &mut SqliteConnection, id: Uuid) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM buckets WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
