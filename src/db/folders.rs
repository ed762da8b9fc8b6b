//! Folder rows.
//!
//! Reads come in two flavours: scoped (`find`, live rows only) and
//! unscoped (`find_unscoped`, soft-deleted rows included). Cascades always
//! use the unscoped read and then inspect `deleted_at`/`status` themselves.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use super::ChildFilter;
use crate::models::{Folder, FolderStatus, NewFolder};

const FOLDER_COLUMNS: &str =
    "id, bucket_id, folder_id, name, status, created_at, deleted_at, trashed_by";

pub async fn insert(conn: &mut SqliteConnection, new: &NewFolder) -> sqlx::Result<Folder> {
    let folder = Folder {
        id: Uuid::new_v4(),
        bucket_id: new.bucket_id,
        folder_id: new.folder_id,
        name: new.name.clone(),
        status: None,
        created_at: Utc::now(),
        deleted_at: None,
        trashed_by: None,
    };
    sqlx::query(
        "INSERT INTO folders (id, bucket_id, folder_id, name, status, created_at, deleted_at, trashed_by)
         VALUES (?, ?, ?, ?, NULL, ?, NULL, NULL)",
    )
    .bind(folder.id)
    .bind(folder.bucket_id)
    .bind(folder.folder_id)
    .bind(&folder.name)
    .bind(folder.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(folder)
}

pub async fn find_unscoped(conn: &mut SqliteConnection, id: Uuid) -> sqlx::Result<Option<Folder>> {
    sqlx::query_as::<_, Folder>(&format!(
        "SELECT {} FROM folders WHERE id = ?",
        FOLDER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
}

pub async fn find(conn: &mut SqliteConnection, id: Uuid) -> sqlx::Result<Option<Folder>> {
    Ok(find_unscoped(conn, id)
        .await?
        .filter(|folder| !folder.is_trashed()))
}

/// Direct child folders of `parent` (`None` = bucket root), oldest first.
pub async fn children(
    conn: &mut SqliteConnection,
    bucket_id: Uuid,
    parent: Option<Uuid>,
    filter: ChildFilter,
    limit: usize,
) -> sqlx::Result<Vec<Folder>> {
    sqlx::query_as::<_, Folder>(&format!(
        "SELECT {} FROM folders WHERE bucket_id = ? AND folder_id IS ?{}
         ORDER BY created_at ASC, id ASC LIMIT ?",
        FOLDER_COLUMNS,
        filter.folder_clause()
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
        "SELECT COUNT(*) FROM folders WHERE bucket_id = ? AND folder_id IS ?{}",
        filter.folder_clause()
    ))
    .bind(bucket_id)
    .bind(parent)
    .fetch_one(&mut *conn)
    .await
}

/// Whether a live sibling of `folder` already uses `name`.
pub async fn has_active_sibling_named(
    conn: &mut SqliteConnection,
    bucket_id: Uuid,
    parent: Option<Uuid>,
    name: &str,
    exclude: Option<Uuid>,
) -> sqlx::Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM folders
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

/// Move folders to the trash on behalf of `user_id`.
pub async fn soft_delete(
    conn: &mut SqliteConnection,
    ids: &[Uuid],
    user_id: Uuid,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE folders SET status = ");
    builder.push_bind(FolderStatus::Trashed);
    builder.push(", deleted_at = ");
    builder.push_bind(now);
    builder.push(", trashed_by = ");
    builder.push_bind(user_id);
    push_id_filter(&mut builder, ids);
    Ok(builder.build().execute(&mut *conn).await?.rows_affected())
}

/// Hand folders to a purge cascade. Rows already claimed are left alone,
/// so the count says how many were newly claimed.
pub async fn claim_for_purge(
    conn: &mut SqliteConnection,
    ids: &[Uuid],
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE folders SET status = ");
    builder.push_bind(FolderStatus::Purging);
    builder.push(", deleted_at = COALESCE(deleted_at, ");
    builder.push_bind(now);
    builder.push(")");
    push_id_filter(&mut builder, ids);
    builder.push(" AND IFNULL(status, '') != 'purging'");
    Ok(builder.build().execute(&mut *conn).await?.rows_affected())
}

pub async fn set_status(
    conn: &mut SqliteConnection,
    ids: &[Uuid],
    status: Option<FolderStatus>,
) -> sqlx::Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE folders SET status = ");
    builder.push_bind(status);
    push_id_filter(&mut builder, ids);
    Ok(builder.build().execute(&mut *conn).await?.rows_affected())
}

/// Folders the user trashed directly: in the trash while their parent is not.
pub async fn trashed_roots(
    conn: &mut SqliteConnection,
    bucket_id: Uuid,
    limit: usize,
) -> sqlx::Result<Vec<Folder>> {
    sqlx::query_as::<_, Folder>(
        "SELECT f.id, f.bucket_id, f.folder_id, f.name, f.status, f.created_at, f.deleted_at, f.trashed_by
         FROM folders f LEFT JOIN folders p ON p.id = f.folder_id
         WHERE f.bucket_id = ? AND f.deleted_at IS NOT NULL AND p.deleted_at IS NULL
         ORDER BY f.deleted_at DESC, f.id ASC LIMIT ?",
    )
    .bind(bucket_id)
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await
}

/// Trashed folders below `root` (inclusive) that a restore of `root` would
/// bring back: the root itself plus every unclaimed trashed descendant.
pub(super) const RESTORE_SUBTREE: &str = "WITH RECURSIVE subtree(id) AS (
         SELECT id FROM folders WHERE id = ?
         UNION ALL
         SELECT f.id FROM folders f JOIN subtree s ON f.folder_id = s.id
         WHERE f.deleted_at IS NOT NULL AND IFNULL(f.status, '') NOT IN ('restoring', 'purging')
     )";

/// First folder name that restoring `root` would duplicate, if any.
///
/// A trashed child conflicts when another folder under the same parent
/// carries its name, whether that one is live, coming back with it, or
/// already restored by an earlier batch.
pub async fn restore_conflict(
    conn: &mut SqliteConnection,
    bucket_id: Uuid,
    root: Uuid,
) -> sqlx::Result<Option<String>> {
    sqlx::query_scalar::<_, String>(&format!(
        "{}
         SELECT c.name FROM folders c
         WHERE c.bucket_id = ? AND c.folder_id IN (SELECT id FROM subtree)
           AND c.deleted_at IS NOT NULL AND IFNULL(c.status, '') NOT IN ('restoring', 'purging')
           AND EXISTS (
               SELECT 1 FROM folders o
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

/// Send `root` and every descendant still marked `restoring` back to the
/// steady trashed state. Pending restore events for them become no-ops.
pub async fn abandon_restore(conn: &mut SqliteConnection, root: Uuid) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "WITH RECURSIVE subtree(id) AS (
             SELECT id FROM folders WHERE id = ?
             UNION ALL
             SELECT f.id FROM folders f JOIN subtree s ON f.folder_id = s.id
             WHERE f.deleted_at IS NOT NULL
         )
         UPDATE folders SET status = ?
         WHERE id IN (SELECT id FROM subtree) AND status = ?",
    )
    .bind(root)
    .bind(FolderStatus::Trashed)
    .bind(FolderStatus::Restoring)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Topmost ancestor of `id` (inclusive) that is still restoring.
pub async fn restoring_root(conn: &mut SqliteConnection, id: Uuid) -> sqlx::Result<Uuid> {
    let mut top = id;
    let mut current = find_unscoped(conn, id).await?.and_then(|f| f.folder_id);
    while let Some(parent_id) = current {
        match find_unscoped(conn, parent_id).await? {
            Some(parent) if parent.is_restoring() => {
                top = parent.id;
                current = parent.folder_id;
            }
            _ => break,
        }
    }
    Ok(top)
}

/// Folders of every bucket carrying `status`.
pub async fn with_status(
    conn: &mut SqliteConnection,
    status: FolderStatus,
    limit: usize,
) -> sqlx::Result<Vec<Folder>> {
    sqlx::query_as::<_, Folder>(&format!(
        "SELECT {} FROM folders WHERE status = ? ORDER BY created_at ASC, id ASC LIMIT ?",
        FOLDER_COLUMNS
    ))
    .bind(status)
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await
}

/// Trashed folders that still hold live children.
pub async fn trashed_with_active_children(
    conn: &mut SqliteConnection,
    limit: usize,
) -> sqlx::Result<Vec<Folder>> {
    sqlx::query_as::<_, Folder>(
        "SELECT p.id, p.bucket_id, p.folder_id, p.name, p.status, p.created_at, p.deleted_at, p.trashed_by
         FROM folders p
         WHERE p.status = 'trashed'
           AND (EXISTS (SELECT 1 FROM folders c WHERE c.folder_id = p.id AND c.deleted_at IS NULL)
             OR EXISTS (SELECT 1 FROM files c WHERE c.folder_id = p.id AND c.deleted_at IS NULL))
         ORDER BY p.created_at ASC, p.id ASC LIMIT ?",
    )
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await
}

/// Take a folder out of the trash.
pub async fn clear_trash(conn: &mut SqliteConnection, id: Uuid) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE folders SET status = NULL, deleted_at = NULL, trashed_by = NULL WHERE id = ?",
    )
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn hard_delete(conn: &mut SqliteConnection, ids: &[Uuid]) -> sqlx::Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM folders");
    push_id_filter(&mut builder, ids);
    Ok(builder.build().execute(&mut *conn).await?.rows_affected())
}

/// Resolve `a/b/c` to a folder by walking names from the bucket root.
/// Soft-deleted folders are included.
pub async fn find_by_path(
    conn: &mut SqliteConnection,
    bucket_id: Uuid,
    path: &str,
) -> sqlx::Result<Option<Folder>> {
    let mut parent: Option<Uuid> = None;
    let mut found = None;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let next = sqlx::query_as::<_, Folder>(&format!(
            "SELECT {} FROM folders WHERE bucket_id = ? AND folder_id IS ? AND name = ?
             ORDER BY deleted_at IS NOT NULL, created_at ASC LIMIT 1",
            FOLDER_COLUMNS
        ))
        .bind(bucket_id)
        .bind(parent)
        .bind(segment)
        .fetch_optional(&mut *conn)
        .await?;
        match next {
            Some(folder) => {
                parent = Some(folder.id);
                found = Some(folder);
            }
            None => return Ok(None),
        }
    }
    Ok(found)
}

/// Logical path of a folder, built from its ancestors' names.
pub async fn path_of(conn: &mut SqliteConnection, id: Uuid) -> sqlx::Result<String> {
    let mut names = Vec::new();
    let mut current = Some(id);
    while let Some(folder_id) = current {
        match find_unscoped(conn, folder_id).await? {
            Some(folder) => {
                names.push(folder.name);
                current = folder.folder_id;
            }
            None => break,
        }
    }
    names.reverse();
    Ok(names.join("/"))
}

fn push_id_filter(builder: &mut QueryBuilder<'_, Sqlite>, ids: &[Uuid]) {
    builder.push(" WHERE id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> (Database, Uuid) {
        let db = Database::open_in_memory().await.unwrap();
        (db, Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_children_filters() {
        let (db, bucket) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let root = insert(&mut conn, &NewFolder::new(bucket, "root")).await.unwrap();
        let a = insert(&mut conn, &NewFolder::new(bucket, "a").with_parent(root.id))
            .await
            .unwrap();
        let b = insert(&mut conn, &NewFolder::new(bucket, "b").with_parent(root.id))
            .await
            .unwrap();

        soft_delete(&mut conn, &[a.id], Uuid::new_v4(), Utc::now())
            .await
            .unwrap();

        let active = children(&mut conn, bucket, Some(root.id), ChildFilter::Active, 10)
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);

        let trashed = children(&mut conn, bucket, Some(root.id), ChildFilter::TrashedNotRestoring, 10)
            .await
            .unwrap();
        assert_eq!(trashed.len(), 1);
        assert_eq!(trashed[0].status, Some(FolderStatus::Trashed));

        set_status(&mut conn, &[a.id], Some(FolderStatus::Restoring))
            .await
            .unwrap();
        assert_eq!(
            count_children(&mut conn, bucket, Some(root.id), ChildFilter::TrashedNotRestoring)
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            count_children(&mut conn, bucket, Some(root.id), ChildFilter::Restoring)
                .await
                .unwrap(),
            1
        );

        let roots = children(&mut conn, bucket, None, ChildFilter::Any, 10).await.unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id, root.id);
    }

    #[tokio::test]
    async fn test_scoped_find_hides_trashed() {
        let (db, bucket) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let folder = insert(&mut conn, &NewFolder::new(bucket, "gone")).await.unwrap();
        soft_delete(&mut conn, &[folder.id], Uuid::new_v4(), Utc::now())
            .await
            .unwrap();

        assert!(find(&mut conn, folder.id).await.unwrap().is_none());
        let unscoped = find_unscoped(&mut conn, folder.id).await.unwrap().unwrap();
        assert!(unscoped.is_trashed());

        clear_trash(&mut conn, folder.id).await.unwrap();
        let restored = find(&mut conn, folder.id).await.unwrap().unwrap();
        assert!(restored.status.is_none());
        assert!(restored.trashed_by.is_none());
    }

    #[tokio::test]
    async fn test_sibling_name_conflict_ignores_trash() {
        let (db, bucket) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let first = insert(&mut conn, &NewFolder::new(bucket, "docs")).await.unwrap();

        assert!(
            has_active_sibling_named(&mut conn, bucket, None, "docs", None)
                .await
                .unwrap()
        );
        assert!(
            !has_active_sibling_named(&mut conn, bucket, None, "docs", Some(first.id))
                .await
                .unwrap()
        );

        soft_delete(&mut conn, &[first.id], Uuid::new_v4(), Utc::now())
            .await
            .unwrap();
        assert!(
            !has_active_sibling_named(&mut conn, bucket, None, "docs", None)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_find_by_path_and_path_of() {
        let (db, bucket) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let a = insert(&mut conn, &NewFolder::new(bucket, "a")).await.unwrap();
        let b = insert(&mut conn, &NewFolder::new(bucket, "b").with_parent(a.id))
            .await
            .unwrap();

        let found = find_by_path(&mut conn, bucket, "/a/b/").await.unwrap().unwrap();
        assert_eq!(found.id, b.id);
        assert!(find_by_path(&mut conn, bucket, "a/c").await.unwrap().is_none());
        assert_eq!(path_of(&mut conn, b.id).await.unwrap(), "a/b");
    }

    #[tokio::test]
    async fn test_claim_for_purge_keeps_deleted_at() {
        let (db, bucket) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let folder = insert(&mut conn, &NewFolder::new(bucket, "f")).await.unwrap();
        let earlier = Utc::now() - chrono::Duration::days(3);
        soft_delete(&mut conn, &[folder.id], Uuid::new_v4(), earlier)
            .await
            .unwrap();

        assert_eq!(claim_for_purge(&mut conn, &[folder.id], Utc::now()).await.unwrap(), 1);
        assert_eq!(claim_for_purge(&mut conn, &[folder.id], Utc::now()).await.unwrap(), 0);
        let row = find_unscoped(&mut conn, folder.id).await.unwrap().unwrap();
        assert_eq!(row.status, Some(FolderStatus::Purging));
        assert_eq!(row.deleted_at.unwrap().timestamp(), earlier.timestamp());
    }

    #[tokio::test]
    async fn test_restore_conflict_spans_subtree() {
        let (db, bucket) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let user = Uuid::new_v4();
        let root = insert(&mut conn, &NewFolder::new(bucket, "root")).await.unwrap();
        let mid = insert(&mut conn, &NewFolder::new(bucket, "mid").with_parent(root.id))
            .await
            .unwrap();
        let old = insert(&mut conn, &NewFolder::new(bucket, "dup").with_parent(mid.id))
            .await
            .unwrap();
        soft_delete(&mut conn, &[old.id], user, Utc::now()).await.unwrap();
        let new = insert(&mut conn, &NewFolder::new(bucket, "dup").with_parent(mid.id))
            .await
            .unwrap();
        soft_delete(&mut conn, &[root.id, mid.id, new.id], user, Utc::now())
            .await
            .unwrap();

        let conflict = restore_conflict(&mut conn, bucket, root.id).await.unwrap();
        assert_eq!(conflict.as_deref(), Some("dup"));

        hard_delete(&mut conn, &[old.id]).await.unwrap();
        assert!(restore_conflict(&mut conn, bucket, root.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_abandon_restore_resets_descendants() {
        let (db, bucket) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let root = insert(&mut conn, &NewFolder::new(bucket, "root")).await.unwrap();
        let child = insert(&mut conn, &NewFolder::new(bucket, "child").with_parent(root.id))
            .await
            .unwrap();
        soft_delete(&mut conn, &[root.id, child.id], Uuid::new_v4(), Utc::now())
            .await
            .unwrap();
        set_status(&mut conn, &[root.id, child.id], Some(FolderStatus::Restoring))
            .await
            .unwrap();

        assert_eq!(restoring_root(&mut conn, child.id).await.unwrap(), root.id);
        assert_eq!(abandon_restore(&mut conn, root.id).await.unwrap(), 2);
        for id in [root.id, child.id] {
            let row = find_unscoped(&mut conn, id).await.unwrap().unwrap();
            assert_eq!(row.status, Some(FolderStatus::Trashed));
        }
    }
}
