//! FolderRestore cascade and restore race tests.

mod common;

use bytes::Bytes;
use std::time::Duration;
use uuid::Uuid;

use bucket_store::db::folders;
use bucket_store::errors::ServiceError;
use bucket_store::events::{FolderRestore, TRASH_TOPIC, TrashExpiration};
use bucket_store::models::{Action, File, FileStatus, FolderStatus};
use bucket_store::notify::Notification;
use bucket_store::storage::{ObjectRef, ObjectStorage};
use common::Harness;

#[tokio::test]
async fn test_deep_restore_clears_every_descendant() {
    let h = Harness::new(2).await;
    let a = h.folder(None, "a").await;
    let b = h.folder(Some(a.id), "b").await;
    let c = h.folder(Some(b.id), "c").await;
    let mut files = Vec::new();
    for (parent, name) in [(a.id, "1.txt"), (a.id, "2.txt"), (a.id, "3.txt"), (b.id, "4.txt"), (c.id, "5.txt")] {
        files.push(h.file(Some(parent), name).await);
    }

    h.trash.trash_folder(h.bucket_id(), a.id, h.user).await.unwrap();
    h.drain().await;
    assert_eq!(h.markers().len(), 3 + files.len());

    h.trash.restore_folder(h.bucket_id(), a.id, h.user).await.unwrap();
    assert!(h.folder_row(a.id).await.unwrap().is_restoring());
    h.drain().await;

    for id in [a.id, b.id, c.id] {
        let row = h.folder_row(id).await.unwrap();
        assert!(row.deleted_at.is_none(), "folder {} still trashed", id);
        assert!(row.status.is_none());
        assert!(row.trashed_by.is_none());
    }
    for file in &files {
        let row = h.file_row(file.id).await.unwrap();
        assert!(row.deleted_at.is_none());
        assert_eq!(row.status, FileStatus::Uploaded);
        assert!(h.storage.contains(&file.object_ref().object_path()));
    }
    assert!(h.markers().is_empty());
    assert_eq!(h.count_activities(Action::Restore, a.id).await, 1);
}

#[tokio::test]
async fn test_top_level_conflict_is_rejected_synchronously() {
    let h = Harness::new(10).await;
    let docs = h.folder(None, "docs").await;
    h.trash.trash_folder(h.bucket_id(), docs.id, h.user).await.unwrap();
    h.drain().await;
    h.folder(None, "docs").await;

    let err = h
        .trash
        .restore_folder(h.bucket_id(), docs.id, h.user)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NameConflict(name) if name == "docs"));

    let row = h.folder_row(docs.id).await.unwrap();
    assert_eq!(row.status, Some(FolderStatus::Trashed));
    assert!(row.is_trashed());
}

/// Trash `a` after leaving two trashed `x.txt` files inside it.
async fn tree_with_clashing_files(h: &Harness, a: Uuid) -> (File, File) {
    let old = h.file(Some(a), "x.txt").await;
    h.trash.trash_file(h.bucket_id(), old.id, h.user).await.unwrap();
    let new = h.file(Some(a), "x.txt").await;
    (old, new)
}

/// Flip folders to `restoring` without the synchronous checks, as if the
/// clash appeared after the restore was accepted.
async fn force_restoring(h: &Harness, ids: &[Uuid]) {
    let mut conn = h.db.pool().acquire().await.unwrap();
    folders::set_status(&mut conn, ids, Some(FolderStatus::Restoring))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_descendant_conflict_is_rejected_synchronously() {
    let h = Harness::new(10).await;
    let a = h.folder(None, "a").await;
    let b = h.folder(Some(a.id), "b").await;
    let (old, new) = tree_with_clashing_files(&h, b.id).await;
    h.trash.trash_folder(h.bucket_id(), a.id, h.user).await.unwrap();
    h.drain().await;

    let err = h
        .trash
        .restore_folder(h.bucket_id(), a.id, h.user)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NameConflict(name) if name == "x.txt"));

    // Nothing moved.
    assert_eq!(h.broker.pending(TRASH_TOPIC), 0);
    for id in [a.id, b.id] {
        assert_eq!(h.folder_row(id).await.unwrap().status, Some(FolderStatus::Trashed));
    }
    assert!(h.file_row(old.id).await.unwrap().is_trashed());
    assert!(h.file_row(new.id).await.unwrap().is_trashed());
}

#[tokio::test]
async fn test_descendant_conflict_abandons_restore() {
    let h = Harness::new(10).await;
    let a = h.folder(None, "a").await;
    let (old, new) = tree_with_clashing_files(&h, a.id).await;
    h.trash.trash_folder(h.bucket_id(), a.id, h.user).await.unwrap();
    h.drain().await;
    assert!(h.file_row(new.id).await.unwrap().is_trashed());

    force_restoring(&h, &[a.id]).await;
    h.publish(FolderRestore {
        bucket_id: h.bucket_id(),
        folder_id: a.id,
        user_id: h.user,
    })
    .await;
    let stats = h.drain().await;
    assert_eq!(stats.count("FolderRestore"), 1);

    // Back in the steady trashed state, children untouched.
    let row = h.folder_row(a.id).await.unwrap();
    assert_eq!(row.status, Some(FolderStatus::Trashed));
    assert!(row.is_trashed());
    assert!(h.file_row(old.id).await.unwrap().is_trashed());
    assert!(h.file_row(new.id).await.unwrap().is_trashed());
    assert!(h.storage.contains(&ObjectRef::folder(h.bucket_id(), a.id).marker_path()));

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        &sent[0],
        Notification::RestoreConflict { folder_id, name, .. } if *folder_id == a.id && name == "x.txt"
    ));
}

#[tokio::test]
async fn test_nested_conflict_abandons_whole_restore() {
    let h = Harness::new(10).await;
    let f = h.folder(None, "f").await;
    let c = h.folder(Some(f.id), "c").await;
    let (old, new) = tree_with_clashing_files(&h, c.id).await;
    h.trash.trash_folder(h.bucket_id(), f.id, h.user).await.unwrap();
    h.drain().await;

    // The parent already fanned out to `c` when the clash shows up there.
    force_restoring(&h, &[f.id, c.id]).await;
    for folder_id in [c.id, f.id] {
        h.publish(FolderRestore {
            bucket_id: h.bucket_id(),
            folder_id,
            user_id: h.user,
        })
        .await;
    }
    let stats = h.drain().await;
    assert_eq!(stats.count("FolderRestore"), 2);
    assert_eq!(stats.nacks, 0);

    for id in [f.id, c.id] {
        let row = h.folder_row(id).await.unwrap();
        assert_eq!(row.status, Some(FolderStatus::Trashed), "folder {} not reverted", id);
        assert!(row.is_trashed());
    }
    assert!(h.file_row(old.id).await.unwrap().is_trashed());
    assert!(h.file_row(new.id).await.unwrap().is_trashed());

    // Reported once, against the folder the user restored.
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        &sent[0],
        Notification::RestoreConflict { folder_id, .. } if *folder_id == f.id
    ));
}

#[tokio::test]
async fn test_conflict_in_later_batch_restores_nothing() {
    let h = Harness::new(2).await;
    let a = h.folder(None, "a").await;
    let mut clean = Vec::new();
    for name in ["1.txt", "2.txt", "3.txt", "4.txt"] {
        clean.push(h.file(Some(a.id), name).await);
    }
    // Created last, so a batch-by-batch check would only reach them after
    // the first files were already back.
    let (old, new) = tree_with_clashing_files(&h, a.id).await;
    h.trash.trash_folder(h.bucket_id(), a.id, h.user).await.unwrap();
    h.drain().await;
    let markers_before = h.markers().len();

    force_restoring(&h, &[a.id]).await;
    h.publish(FolderRestore {
        bucket_id: h.bucket_id(),
        folder_id: a.id,
        user_id: h.user,
    })
    .await;
    let stats = h.drain().await;
    assert_eq!(stats.count("FolderRestore"), 1);

    assert_eq!(h.folder_row(a.id).await.unwrap().status, Some(FolderStatus::Trashed));
    for file in clean.iter().chain([&old, &new]) {
        let row = h.file_row(file.id).await.unwrap();
        assert!(row.is_trashed(), "{} was restored", file.name);
    }
    assert_eq!(h.markers().len(), markers_before);
}

#[tokio::test]
async fn test_restore_refuses_folder_being_purged() {
    let h = Harness::new(10).await;
    let a = h.folder(None, "a").await;
    h.file(Some(a.id), "x.txt").await;
    h.trash.trash_folder(h.bucket_id(), a.id, h.user).await.unwrap();
    h.drain().await;

    h.trash.purge_folder(h.bucket_id(), a.id, h.user).await.unwrap();
    let err = h
        .trash
        .restore_folder(h.bucket_id(), a.id, h.user)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    h.drain().await;
    assert!(h.folder_row(a.id).await.is_none());
}

#[tokio::test]
async fn test_in_flight_upload_survives_trash_and_restore() {
    let h = Harness::new(10).await;
    let a = h.folder(None, "a").await;
    let (pending, _post) = h
        .buckets
        .begin_upload(h.bucket_id(), Some(a.id), "big.iso", Duration::from_secs(60))
        .await
        .unwrap();

    // A live upload cannot be trashed on its own.
    let err = h
        .trash
        .trash_file(h.bucket_id(), pending.id, h.user)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    h.trash.trash_folder(h.bucket_id(), a.id, h.user).await.unwrap();
    h.drain().await;
    let row = h.file_row(pending.id).await.unwrap();
    assert!(row.is_trashed());
    assert_eq!(row.status, FileStatus::Uploading);

    h.trash.restore_folder(h.bucket_id(), a.id, h.user).await.unwrap();
    h.drain().await;
    let row = h.file_row(pending.id).await.unwrap();
    assert!(row.deleted_at.is_none());
    assert_eq!(row.status, FileStatus::Uploading);

    h.storage
        .put_object(&pending.object_ref().object_path(), Bytes::from_static(b"iso"))
        .await
        .unwrap();
    let done = h
        .buckets
        .complete_upload(h.bucket_id(), pending.id)
        .await
        .unwrap();
    assert_eq!(done.status, FileStatus::Uploaded);
    assert_eq!(done.size, 3);
}

#[tokio::test]
async fn test_restore_of_non_restoring_folder_is_noop() {
    let h = Harness::new(10).await;
    let a = h.folder(None, "a").await;
    h.trash.trash_folder(h.bucket_id(), a.id, h.user).await.unwrap();
    h.drain().await;

    // A stray event without the synchronous status flip does nothing.
    h.publish(FolderRestore {
        bucket_id: h.bucket_id(),
        folder_id: a.id,
        user_id: h.user,
    })
    .await;
    h.drain().await;
    assert_eq!(h.folder_row(a.id).await.unwrap().status, Some(FolderStatus::Trashed));
}

#[tokio::test]
async fn test_expiration_after_restore_keeps_file() {
    let h = Harness::new(10).await;
    let x = h.file(None, "x.txt").await;
    let marker = x.object_ref().marker_path();

    h.trash.trash_file(h.bucket_id(), x.id, h.user).await.unwrap();
    assert!(h.storage.contains(&marker));
    h.trash.restore_file(h.bucket_id(), x.id, h.user).await.unwrap();
    assert!(!h.storage.contains(&marker));

    // Storage reports the marker's deletion after the restore landed.
    h.publish(TrashExpiration {
        bucket_id: h.bucket_id(),
        object_key: marker,
    })
    .await;
    h.drain().await;

    let row = h.file_row(x.id).await.unwrap();
    assert!(row.deleted_at.is_none());
    assert_eq!(row.status, FileStatus::Uploaded);
    assert!(h.storage.contains(&x.object_ref().object_path()));
}

#[tokio::test]
async fn test_restore_file_inside_trashed_folder_is_refused() {
    let h = Harness::new(10).await;
    let a = h.folder(None, "a").await;
    let x = h.file(Some(a.id), "x.txt").await;
    h.trash.trash_folder(h.bucket_id(), a.id, h.user).await.unwrap();
    h.drain().await;

    let err = h
        .trash
        .restore_file(h.bucket_id(), x.id, h.user)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));
}
