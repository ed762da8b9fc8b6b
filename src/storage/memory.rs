//! In-memory [`ObjectStorage`] used by tests and local experiments.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use super::{ObjectInfo, ObjectPage, ObjectStorage, PresignedPost};
use crate::errors::{StorageError, StorageResult};

#[derive(Clone, Debug)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every mutating call fail with a backend error, simulating an outage.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// All keys currently stored below `prefix`.
    pub fn keys(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Backdate an object, e.g. to push a marker past its retention window.
    pub fn set_last_modified(&self, key: &str, at: DateTime<Utc>) {
        if let Some(obj) = self.lock().get_mut(key) {
            obj.last_modified = at;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredObject>> {
        // A poisoned map is still structurally sound.
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put_object(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.check_writable()?;
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        self.lock().insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn remove_object(&self, key: &str) -> StorageResult<()> {
        self.check_writable()?;
        self.lock().remove(key);
        Ok(())
    }

    async fn list_objects(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        max_keys: usize,
    ) -> StorageResult<ObjectPage> {
        let max_keys = max_keys.max(1);
        let objects = self.lock();
        let mut page: Vec<ObjectInfo> = objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .filter(|(k, _)| start_after.is_none_or(|after| k.as_str() > after))
            .take(max_keys + 1)
            .map(|(k, v)| ObjectInfo {
                key: k.clone(),
                size: v.data.len() as i64,
                etag: Some(format!("{:x}", md5::compute(&v.data))),
                last_modified: v.last_modified,
            })
            .collect();

        let is_truncated = page.len() > max_keys;
        page.truncate(max_keys);
        let next_start_after = if is_truncated {
            page.last().map(|o| o.key.clone())
        } else {
            None
        };
        Ok(ObjectPage {
            objects: page,
            is_truncated,
            next_start_after,
        })
    }

    async fn get_object(&self, key: &str) -> StorageResult<Bytes> {
        self.lock()
            .get(key)
            .map(|obj| obj.data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn stat_object(&self, key: &str) -> StorageResult<ObjectInfo> {
        let objects = self.lock();
        let obj = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size: obj.data.len() as i64,
            etag: Some(format!("{:x}", md5::compute(&obj.data))),
            last_modified: obj.last_modified,
        })
    }

    async fn presigned_post_policy(
        &self,
        key: &str,
        expiry: Duration,
    ) -> StorageResult<PresignedPost> {
        let expires_at = Utc::now() + chrono::Duration::seconds(expiry.as_secs() as i64);
        let mut fields = HashMap::new();
        fields.insert("key".to_string(), key.to_string());
        Ok(PresignedPost {
            url: "memory://upload".to_string(),
            fields,
            expires_at,
        })
    }

    async fn presigned_get_object(&self, key: &str, expiry: Duration) -> StorageResult<String> {
        Ok(format!("memory://{}?expires_in={}", key, expiry.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_and_truncation() {
        let store = MemoryStorage::new();
        for key in ["p/a", "p/b", "p/c", "q/a"] {
            store.put_object(key, Bytes::from_static(b"x")).await.unwrap();
        }
        let page = store.list_objects("p/", None, 2).await.unwrap();
        assert!(page.is_truncated);
        assert_eq!(page.next_start_after.as_deref(), Some("p/b"));

        let page = store.list_objects("p/", Some("p/b"), 2).await.unwrap();
        assert!(!page.is_truncated);
        assert_eq!(page.objects.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStorage::new();
        store.set_fail_writes(true);
        assert!(store.put_object("k", Bytes::new()).await.is_err());
        store.set_fail_writes(false);
        store.put_object("k", Bytes::new()).await.unwrap();
        assert!(store.contains("k"));
    }
}
