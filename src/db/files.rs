//! File rows.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::HashSet;
use uuid::Uuid;

use super::ChildFilter;
use super::folders::RESTORE_SUBTREE;
use crate::models::{File, FileStatus, NewFile, file::extension_of};

const FILE_COLUMNS: &str =
    "id, bucket_id, folder_id, name, path, size, extension, status, created_at, deleted_at, trashed_by";

/// Register a file in `uploading` state.
pub async fn insert(conn: &mut SqliteConnection, new: &NewFile) -> sqlx::Result<File> {
    let file = File {
        id: Uuid::new_v4(),
        bucket_id: new.bucket_id,
        folder_id: new.folder_id,
        name: new.name.clone(),
        path: new.path.clone(),
        size: 0,
        extension: extension_of(&new.name),
        status: FileStatus::Uploading,
        created_at: Utc::now(),
        deleted_at: None,
        trashed_by: None,
    };
    sqlx::query(
        "INSERT INTO files (id, bucket_id, folder_id, name, path, size, extension, status, created_at, deleted_at, trashed_by)
         VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?, NULL, NULL)",
    )
    .bind(file.id)
    .bind(file.bucket_id)
    .bind(file.folder_id)
    .bind(&file.name)
    .bind(&file.path)
    .bind(&file.extension)
    .bind(file.status)
    .bind(file.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(file)
}

pub async fn find_unscoped(conn: &mut SqliteConnection, id: Uuid) -> sqlx::Result<Option<File>> {
    sqlx::query_as::<_, File>(&format!("SELECT {} FROM files WHERE id = ?", FILE_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn find(conn: &mut SqliteConnection, id: Uuid) -> sqlx::Result<Option<File>> {
    Ok(find_unscoped(conn, id).await?.filter(|file| !file.is_trashed()))
}

/// Direct child files of `parent` (`None` = bucket root), oldest first.
pub async fn children(
    conn: &mut SqliteConnection,
    bucket_id: Uuid,
    parent: Option<Uuid>,
    filter: ChildFilter,
    limit: usize,
) -> sqlx::Result<Vec<File>> {
    sqlx::query_as::<_, File>(&format!(
        "SELECT {} FROM files WHERE bucket_id = ? AND folder_id IS ?{}
         ORDER BY created_at ASC, id ASC LIMIT ?",
        FILE_COLUMNS,
        filter.file_clause()
    ))
    .bind(bucket_id)
    .bind(parent)
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await
}

pub async fn count_children(
    conn: &mut SqliteConnection,
    bucket_id: Uuid,
    parent: Option<Uuid>,
    filter: ChildFilter,
) -> sqlx::Result<i64> {
    sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM files WHERE bucket_id = ? AND folder_id IS ?{}",
        filter.file_clause()
    ))
    .bind(bucket_id)
    .bind(parent)
    .fetch_one(&mut *conn)
    .await
}

/// Files whose logical path is `prefix` or lies below it. An empty prefix
/// matches the whole bucket. Soft-deleted rows are included.
pub async fn under_path(
    conn: &mut SqliteConnection,
    bucket_id: Uuid,
    prefix: &str,
    limit: usize,
) -> sqlx::Result<Vec<File>> {
    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM files WHERE bucket_id = ",
        FILE_COLUMNS
    ));
    builder.push_bind(bucket_id);
    if !prefix.is_empty() {
        let dir_prefix = format!("{}/", prefix);
        builder.push(" AND (path = ");
        builder.push_bind(prefix.to_string());
        builder.push(" OR substr(path, 1, ");
        builder.push_bind(dir_prefix.chars().count() as i64);
        builder.push(") = ");
        builder.push_bind(dir_prefix);
        builder.push(")");
    }
    builder.push(" ORDER BY created_at ASC, id ASC LIMIT ");
    builder.push_bind(limit as i64);
    builder.build_query_as().fetch_all(&mut *conn).await
}

/// Which of `ids` still have a row, soft-deleted or not.
pub async fn existing_ids(conn: &mut SqliteConnection, ids: &[Uuid]) -> sqlx::Result<HashSet<Uuid>> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }
    let mut builder = QueryBuilder::<Sqlite>::new("SELECT id FROM files");
    push_id_filter(&mut builder, ids);
    let rows: Vec<(Uuid,)> = builder.build_query_as().fetch_all(&mut *conn).await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn has_active_sibling_named(
    conn: &mut SqliteConnection,
    bucket_id: Uuid,
    parent: Option<Uuid>,
    name: &str,
    exclude: Option<Uuid>,
) -> sqlx::Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM files
         WHERE bucket_id = ? AND folder_id IS ? AND name = ? AND deleted_at IS NULL
           AND id IS NOT ?",
    )
    .bind(bucket_id)
    .bind(parent)
    .bind(name)
    .bind(exclude)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count > 0)
}

/// First file name that restoring folder `root` would duplicate, if any.
///
/// Covers the files of `root` and of every trashed, unclaimed folder below
/// it: a trashed file conflicts when another file in the same folder carries
/// its name, live or trashed.
pub async fn restore_conflict(
    conn: &mut SqliteConnection,
    bucket_id: Uuid,
    root: Uuid,
) -> sqlx::Result<Option<String>> {
    sqlx::query_scalar::<_, String>(&format!(
        "{}
         SELECT c.name FROM files c
         WHERE c.bucket_id = ? AND c.folder_id IN (SELECT id FROM subtree)
           AND c.deleted_at IS NOT NULL AND c.status != 'restoring'
           AND EXISTS (
               SELECT 1 FROM files o
               WHERE o.bucket_id = c.bucket_id AND o.folder_id = c.folder_id
                 AND o.name = c.name AND o.id != c.id
           )
         LIMIT 1",
        RESTORE_SUBTREE
    ))
    .bind(root)
    .bind(bucket_id)
    .fetch_optional(&mut *conn)
    .await
}

/// Files the user trashed directly: in the trash while their folder is not.
pub async fn trashed_roots(
    conn: &mut SqliteConnection,
    bucket_id: Uuid,
    limit: usize,
) -> sqlx::Result<Vec<File>> {
    sqlx::query_as::<_, File>(
        "SELECT f.id, f.bucket_id, f.folder_id, f.name, f.path, f.size, f.extension, f.status,
                f.created_at, f.deleted_at, f.trashed_by
         FROM files f LEFT JOIN folders p ON p.id = f.folder_id
         WHERE f.bucket_id = ? AND f.deleted_at IS NOT NULL AND p.deleted_at IS NULL
         ORDER BY f.deleted_at DESC, f.id ASC LIMIT ?",
    )
    .bind(bucket_id)
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await
}

pub async fn soft_delete(
    conn: &mut SqliteConnection,
    ids: &[Uuid],
    user_id: Uuid,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    // An upload still in flight keeps its status so it can complete once
    // restored.
    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE files SET status = CASE WHEN status = ");
    builder.push_bind(FileStatus::Uploading);
    builder.push(" THEN status ELSE ");
    builder.push_bind(FileStatus::Trashed);
    builder.push(" END, deleted_at = ");
    builder.push_bind(now);
    builder.push(", trashed_by = ");
    builder.push_bind(user_id);
    push_id_filter(&mut builder, ids);
    Ok(builder.build().execute(&mut *conn).await?.rows_affected())
}

/// Take files out of the trash: clear the soft-delete and put them back to
/// `uploaded`, or leave an interrupted upload `uploading`.
pub async fn restore(conn: &mut SqliteConnection, ids: &[Uuid]) -> sqlx::Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE files SET status = CASE WHEN status = ");
    builder.push_bind(FileStatus::Uploading);
    builder.push(" THEN status ELSE ");
    builder.push_bind(FileStatus::Uploaded);
    builder.push(" END, deleted_at = NULL, trashed_by = NULL");
    push_id_filter(&mut builder, ids);
    Ok(builder.build().execute(&mut *conn).await?.rows_affected())
}

pub async fn mark_uploaded(conn: &mut SqliteConnection, id: Uuid, size: i64) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE files SET status = ?, size = ? WHERE id = ? AND status = ? AND deleted_at IS NULL",
    )
    .bind(FileStatus::Uploaded)
    .bind(size)
    .bind(id)
    .bind(FileStatus::Uploading)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn hard_delete(conn: &mut SqliteConnection, ids: &[Uuid]) -> sqlx::Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM files");
    push_id_filter(&mut builder, ids);
    Ok(builder.build().execute(&mut *conn).await?.rows_affected())
}

/// Delete a file only while it is still soft-deleted.
pub async fn hard_delete_if_trashed(conn: &mut SqliteConnection, id: Uuid) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM files WHERE id = ? AND deleted_at IS NOT NULL")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

fn push_id_filter(builder: &mut QueryBuilder<'_, Sqlite>, ids: &[Uuid]) {
    builder.push(" WHERE id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}
