//! ObjectDeletion: hard-delete every file at or below a logical path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Event, HandlerContext, Outcome, STORAGE_TOPIC, best_effort};
use crate::db::{ChildFilter, files, folders};
use crate::errors::CascadeError;
use crate::models::{Action, Activity, ObjectType};
use crate::storage::marker::files_prefix;
use crate::storage::{ObjectKind, ObjectRef};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectDeletion {
    pub bucket_id: Uuid,
    /// Logical path inside the bucket. Empty means the whole bucket.
    pub path: String,
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

impl ObjectDeletion {
    fn prefix(&self) -> &str {
        self.path.trim_matches('/')
    }

    /// Remove up to one batch of tracked files under the path.
    async fn drain_rows(&self, ctx: &HandlerContext) -> Result<usize, CascadeError> {
        let mut tx = ctx.db.begin().await?;
        let batch = files::under_path(&mut tx, self.bucket_id, self.prefix(), ctx.batch_limit).await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut keys = Vec::with_capacity(batch.len() * 2);
        for file in &batch {
            let object = file.object_ref();
            keys.push(object.object_path());
            keys.push(object.marker_path());
        }
        best_effort(
            ctx.storage.remove_objects(&keys).await,
            "remove file objects",
            self.prefix(),
        );

        let ids: Vec<Uuid> = batch.iter().map(|f| f.id).collect();
        files::hard_delete(&mut tx, &ids).await?;
        tx.commit().await?;
        debug!(bucket_id = %self.bucket_id, path = self.prefix(), files = ids.len(), "deleted file rows");
        Ok(ids.len())
    }

    /// Walk the bucket's payload keys and remove the ones no row accounts
    /// for. Returns true when a full page was removed and another pass is due.
    async fn sweep_orphans(&self, ctx: &HandlerContext) -> Result<bool, CascadeError> {
        let prefix = files_prefix(self.bucket_id);
        let mut start_after: Option<String> = None;
        loop {
            let page = ctx
                .storage
                .list_objects(&prefix, start_after.as_deref(), ctx.batch_limit)
                .await?;
            if page.objects.is_empty() {
                return Ok(false);
            }

            let listed: Vec<(String, Option<Uuid>)> = page
                .objects
                .iter()
                .map(|o| {
                    let id = ObjectRef::parse(&o.key)
                        .filter(|r| r.kind == ObjectKind::File && r.bucket_id == self.bucket_id)
                        .map(|r| r.id);
                    (o.key.clone(), id)
                })
                .collect();
            let ids: Vec<Uuid> = listed.iter().filter_map(|(_, id)| *id).collect();
            let tracked = {
                let mut conn = ctx.db.pool().acquire().await?;
                files::existing_ids(&mut conn, &ids).await?
            };
            let orphans: Vec<String> = listed
                .into_iter()
                .filter(|(_, id)| id.is_none_or(|id| !tracked.contains(&id)))
                .map(|(key, _)| key)
                .collect();

            if !orphans.is_empty() {
                best_effort(ctx.storage.remove_objects(&orphans).await, "remove orphans", &prefix);
                debug!(bucket_id = %self.bucket_id, removed = orphans.len(), "removed orphaned objects");
            }
            if orphans.len() == ctx.batch_limit {
                return Ok(true);
            }
            if !page.is_truncated {
                return Ok(false);
            }
            start_after = page.next_start_after;
        }
    }

    /// Drop the folder the path named, or the directory holding the file it
    /// named, once nothing is left inside it.
    async fn prune_folder(&self, ctx: &HandlerContext) -> Result<(), CascadeError> {
        let path = self.prefix();
        if path.is_empty() {
            return Ok(());
        }

        let mut tx = ctx.db.begin().await?;
        let mut folder = folders::find_by_path(&mut tx, self.bucket_id, path).await?;
        if folder.is_none() {
            if let Some((parent, _)) = path.rsplit_once('/') {
                folder = folders::find_by_path(&mut tx, self.bucket_id, parent).await?;
            }
        }
        let Some(folder) = folder else {
            return Ok(());
        };

        let remaining = folders::count_children(&mut tx, self.bucket_id, Some(folder.id), ChildFilter::Any)
            .await?
            + files::count_children(&mut tx, self.bucket_id, Some(folder.id), ChildFilter::Any).await?;
        if remaining > 0 {
            debug!(folder_id = %folder.id, remaining, "folder not empty, keeping it");
            return Ok(());
        }

        let object = ObjectRef::folder(self.bucket_id, folder.id);
        best_effort(
            ctx.storage.unmark_as_trashed(&object).await,
            "remove folder marker",
            &object.marker_path(),
        );
        folders::hard_delete(&mut tx, &[folder.id]).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Event for ObjectDeletion {
    const NAME: &'static str = "ObjectDeletion";
    const TOPIC: &'static str = STORAGE_TOPIC;

    async fn handle(&self, ctx: &HandlerContext) -> Result<Outcome, CascadeError> {
        let deleted = self.drain_rows(ctx).await?;
        if deleted == ctx.batch_limit {
            return Ok(Outcome::more("file rows remain"));
        }

        if self.sweep_orphans(ctx).await? {
            return Ok(Outcome::more("orphaned objects remain"));
        }

        self.prune_folder(ctx).await?;

        info!(bucket_id = %self.bucket_id, path = self.prefix(), "path deleted");
        ctx.record(Activity::new(Action::Delete, ObjectType::Bucket, self.bucket_id).by(self.user_id))
            .await;
        Ok(Outcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_without_user_decodes() {
        let bucket = Uuid::new_v4();
        let raw = format!(r#"{{"bucket_id":"{}","path":"/docs/"}}"#, bucket);
        let event: ObjectDeletion = serde_json::from_str(&raw).unwrap();
        assert_eq!(event.user_id, None);
        assert_eq!(event.prefix(), "docs");
    }
}
