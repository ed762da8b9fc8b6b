//! FolderTrash cascade tests.

mod common;

use bucket_store::dispatcher::Disposition;
use bucket_store::events::{FolderTrash, TRASH_TOPIC};
use bucket_store::models::{Action, FileStatus, FolderStatus};
use bucket_store::storage::ObjectRef;
use common::Harness;

#[tokio::test]
async fn test_trash_marks_children_and_writes_markers() {
    let h = Harness::new(100).await;
    let f1 = h.folder(None, "A").await;
    let x = h.file(Some(f1.id), "x.txt").await;
    let f2 = h.folder(Some(f1.id), "B").await;

    h.trash.trash_folder(h.bucket_id(), f1.id, h.user).await.unwrap();
    h.drain().await;

    let b = h.folder_row(f2.id).await.unwrap();
    assert_eq!(b.status, Some(FolderStatus::Trashed));
    assert!(b.deleted_at.is_some());
    assert_eq!(b.trashed_by, Some(h.user));
    assert!(h.storage.contains(&format!("trash/{}/folders/{}", h.bucket_id(), f2.id)));

    let file = h.file_row(x.id).await.unwrap();
    assert_eq!(file.status, FileStatus::Trashed);
    assert!(file.deleted_at.is_some());
    assert!(h.storage.contains(&format!("trash/{}/files/{}", h.bucket_id(), x.id)));
    // The payload stays until the item expires or is purged.
    assert!(h.storage.contains(&x.object_ref().object_path()));

    assert!(h.storage.contains(&ObjectRef::folder(h.bucket_id(), f1.id).marker_path()));
    assert_eq!(h.count_activities(Action::Trash, f1.id).await, 1);
}

#[tokio::test]
async fn test_redelivery_with_no_children_only_logs() {
    let h = Harness::new(100).await;
    let f1 = h.folder(None, "A").await;
    let x = h.file(Some(f1.id), "x.txt").await;
    h.folder(Some(f1.id), "B").await;

    h.trash.trash_folder(h.bucket_id(), f1.id, h.user).await.unwrap();
    h.drain().await;
    let before = h.file_row(x.id).await.unwrap();
    let markers_before = h.markers();

    h.publish(FolderTrash {
        bucket_id: h.bucket_id(),
        folder_id: f1.id,
        user_id: h.user,
    })
    .await;
    let stats = h.drain().await;

    assert_eq!(stats.total, 1);
    assert_eq!(stats.nacks, 0);
    let after = h.file_row(x.id).await.unwrap();
    assert_eq!(after.deleted_at, before.deleted_at);
    assert_eq!(h.markers(), markers_before);
    assert_eq!(h.count_activities(Action::Trash, f1.id).await, 2);
}

#[tokio::test]
async fn test_batches_take_ceil_m_over_n_deliveries() {
    let h = Harness::new(2).await;
    let folder = h.folder(None, "bulk").await;
    for i in 0..5 {
        h.file(Some(folder.id), &format!("f{}.txt", i)).await;
    }

    h.trash.trash_folder(h.bucket_id(), folder.id, h.user).await.unwrap();
    let stats = h.drain().await;

    assert_eq!(stats.count("FolderTrash"), 3);
    assert_eq!(stats.nacks, 2);
    assert!(h.all_files().await.iter().all(|f| f.status == FileStatus::Trashed));
    assert_eq!(h.markers().len(), 6);
}

#[tokio::test]
async fn test_deep_tree_is_fully_trashed() {
    let h = Harness::new(3).await;
    let root = h.folder(None, "root").await;
    let mut parent = root.id;
    let mut levels = vec![root.id];
    for depth in 0..4 {
        let child = h.folder(Some(parent), &format!("level{}", depth)).await;
        h.file(Some(child.id), "a.txt").await;
        h.file(Some(child.id), "b.txt").await;
        h.folder(Some(child.id), "side").await;
        levels.push(child.id);
        parent = child.id;
    }

    h.trash.trash_folder(h.bucket_id(), root.id, h.user).await.unwrap();
    h.drain().await;

    for id in levels {
        let row = h.folder_row(id).await.unwrap();
        assert!(row.is_trashed(), "folder {} not trashed", id);
        assert_eq!(row.status, Some(FolderStatus::Trashed));
    }
    for file in h.all_files().await {
        assert!(file.is_trashed());
        assert!(h.storage.contains(&file.object_ref().marker_path()));
    }
}

#[tokio::test]
async fn test_marker_failures_do_not_stop_the_cascade() {
    let h = Harness::new(100).await;
    let folder = h.folder(None, "A").await;
    let x = h.file(Some(folder.id), "x.txt").await;

    h.storage.set_fail_writes(true);
    h.trash.trash_folder(h.bucket_id(), folder.id, h.user).await.unwrap();
    let first = h.step(TRASH_TOPIC).await.unwrap();
    h.storage.set_fail_writes(false);

    assert_eq!(first.1, Disposition::Ack);
    assert!(h.file_row(x.id).await.unwrap().is_trashed());
    assert!(h.markers().is_empty());
}

#[tokio::test]
async fn test_restore_overtaking_trash_stops_cascade() {
    let h = Harness::new(1).await;
    let folder = h.folder(None, "A").await;
    let a = h.file(Some(folder.id), "a.txt").await;
    let b = h.file(Some(folder.id), "b.txt").await;

    h.trash.trash_folder(h.bucket_id(), folder.id, h.user).await.unwrap();
    // One batch of one file, then the user changes their mind.
    let (_, disposition) = h.step(TRASH_TOPIC).await.unwrap();
    assert_eq!(disposition, Disposition::Nack);
    h.trash.restore_folder(h.bucket_id(), folder.id, h.user).await.unwrap();
    h.drain().await;

    let row = h.folder_row(folder.id).await.unwrap();
    assert!(!row.is_trashed());
    assert!(row.status.is_none());
    assert!(!h.file_row(a.id).await.unwrap().is_trashed());
    assert!(!h.file_row(b.id).await.unwrap().is_trashed());
    assert!(h.markers().is_empty());
}
