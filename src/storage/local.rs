//! LocalStorage: filesystem-backed [`ObjectStorage`].
//!
//! Objects are stored at `base_path/{key}` so prefix listings map onto
//! directory walks. Writes go through a temporary file that is fsynced and
//! renamed into place; removals prune directories left empty.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::Context;
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

use super::signing::UrlSigner;
use super::{ObjectInfo, ObjectPage, ObjectStorage, PresignedPost};
use crate::errors::{StorageError, StorageResult};

const MAX_OBJECT_KEY_LEN: usize = 1024;
const TMP_PREFIX: &str = ".tmp-";

#[derive(Clone, Debug)]
pub struct LocalStorage {
    /// Base directory on disk where objects are stored.
    pub base_path: PathBuf,

    /// Public base URL presigned links are issued against.
    public_url: String,

    /// Signs the presigned links; the object routes verify with the same key.
    signer: UrlSigner,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>, public_url: impl Into<String>, signer: UrlSigner) -> Self {
        Self {
            base_path: base_path.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
            signer,
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        if key.starts_with('/') || key.contains("..") || key.ends_with('/') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        for segment in key.split('/') {
            path.push(segment);
        }
        path
    }

    /// Collect every object key below `prefix`, sorted.
    async fn walk_keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        // Start at the deepest directory fully named by the prefix.
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let start = if dir_part.is_empty() {
            self.base_path.clone()
        } else {
            self.object_path(dir_part)
        };

        let mut keys = Vec::new();
        let mut stack = vec![start];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::Io(err)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    stack.push(path);
                    continue;
                }
                if entry.file_name().to_string_lossy().starts_with(TMP_PREFIX) {
                    continue;
                }
                if let Some(key) = self.key_for(&path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.base_path).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    async fn info_for(&self, key: &str, path: &Path) -> StorageResult<ObjectInfo> {
        let meta = fs::metadata(path).await.map_err(|err| match err.kind() {
            ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
            _ => StorageError::Io(err),
        })?;
        let last_modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(ObjectInfo {
            key: key.to_string(),
            size: meta.len() as i64,
            etag: None,
            last_modified,
        })
    }

    /// Recursively remove empty directories up to the base path.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn put_object(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));

        let write = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&data).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &file_path).await
        };
        if let Err(err) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        Ok(())
    }

    async fn remove_object(&self, key: &str) -> StorageResult<()> {
        self.ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed object {}", key),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("object {} already missing", key);
                return Ok(());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn list_objects(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        max_keys: usize,
    ) -> StorageResult<ObjectPage> {
        let max_keys = max_keys.clamp(1, 1000);
        let fetch_limit = max_keys + 1;

        let mut keys: Vec<String> = self
            .walk_keys(prefix)
            .await?
            .into_iter()
            .filter(|key| start_after.is_none_or(|after| key.as_str() > after))
            .take(fetch_limit)
            .collect();

        let is_truncated = keys.len() == fetch_limit;
        if is_truncated {
            keys.pop();
        }

        let mut objects = Vec::with_capacity(keys.len());
        for key in keys {
            match self.info_for(&key, &self.object_path(&key)).await {
                Ok(info) => objects.push(info),
                // Removed between the walk and the stat.
                Err(StorageError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        let next_start_after = if is_truncated {
            objects.last().map(|o| o.key.clone())
        } else {
            None
        };

        Ok(ObjectPage {
            objects,
            is_truncated,
            next_start_after,
        })
    }

    async fn get_object(&self, key: &str) -> StorageResult<Bytes> {
        self.ensure_key_safe(key)?;
        match fs::read(self.object_path(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn stat_object(&self, key: &str) -> StorageResult<ObjectInfo> {
        self.ensure_key_safe(key)?;
        let path = self.object_path(key);
        let mut info = self.info_for(key, &path).await?;

        let mut file = File::open(&path).await?;
        let mut digest = Context::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            digest.consume(&buf[..read]);
        }
        info.etag = Some(format!("{:x}", digest.compute()));
        Ok(info)
    }

    async fn presigned_post_policy(
        &self,
        key: &str,
        expiry: Duration,
    ) -> StorageResult<PresignedPost> {
        self.ensure_key_safe(key)?;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(expiry)
                .map_err(|err| StorageError::Backend(err.to_string()))?;
        let expires = expires_at.timestamp();

        let mut fields = HashMap::new();
        fields.insert("key".to_string(), key.to_string());
        fields.insert("expires".to_string(), expires.to_string());
        fields.insert("signature".to_string(), self.signer.sign("POST", key, expires));

        Ok(PresignedPost {
            url: format!("{}/upload", self.public_url),
            fields,
            expires_at,
        })
    }

    async fn presigned_get_object(&self, key: &str, expiry: Duration) -> StorageResult<String> {
        self.ensure_key_safe(key)?;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(expiry)
                .map_err(|err| StorageError::Backend(err.to_string()))?;
        let expires = expires_at.timestamp();
        Ok(format!(
            "{}/objects/{}?expires={}&signature={}",
            self.public_url,
            key,
            expires,
            self.signer.sign("GET", key, expires)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ObjectRef;

    fn storage(dir: &tempfile::TempDir) -> LocalStorage {
        LocalStorage::new(dir.path(), "http://localhost:3000", UrlSigner::new("secret").unwrap())
    }

    #[tokio::test]
    async fn test_put_stat_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(&dir);

        store
            .put_object("buckets/b/files/1", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let info = store.stat_object("buckets/b/files/1").await.unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(info.etag.as_deref(), Some("5d41402abc4b2a76b9719d911017c592"));

        store.remove_object("buckets/b/files/1").await.unwrap();
        assert!(matches!(
            store.stat_object("buckets/b/files/1").await,
            Err(StorageError::NotFound(_))
        ));
        // Empty parents are pruned.
        assert!(!dir.path().join("buckets").exists());
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(&dir);
        store.remove_object("trash/b/files/none").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(&dir);
        for key in ["", "/abs", "a/../b", "dir/"] {
            assert!(matches!(
                store.put_object(key, Bytes::new()).await,
                Err(StorageError::InvalidKey(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_list_paginates_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(&dir);
        for name in ["a", "b", "c"] {
            store
                .put_object(&format!("buckets/x/files/{}", name), Bytes::from_static(b"1"))
                .await
                .unwrap();
        }
        store
            .put_object("buckets/y/files/z", Bytes::from_static(b"1"))
            .await
            .unwrap();

        let page = store.list_objects("buckets/x/", None, 2).await.unwrap();
        assert!(page.is_truncated);
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["buckets/x/files/a", "buckets/x/files/b"]);

        let page = store
            .list_objects("buckets/x/", page.next_start_after.as_deref(), 2)
            .await
            .unwrap();
        assert!(!page.is_truncated);
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].key, "buckets/x/files/c");
    }

    #[tokio::test]
    async fn test_markers_are_separate_objects() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(&dir);
        let obj = ObjectRef::file(Uuid::new_v4(), Uuid::new_v4());
        store
            .put_object(&obj.object_path(), Bytes::from_static(b"payload"))
            .await
            .unwrap();

        store.mark_as_trashed(&obj).await.unwrap();
        let marker = store.stat_object(&obj.marker_path()).await.unwrap();
        assert_eq!(marker.size, 0);

        store.unmark_as_trashed(&obj).await.unwrap();
        store.unmark_as_trashed(&obj).await.unwrap();
        assert!(store.stat_object(&obj.object_path()).await.is_ok());
    }

    #[tokio::test]
    async fn test_presigned_links_verify() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(&dir);
        let signer = UrlSigner::new("secret").unwrap();

        let url = store
            .presigned_get_object("buckets/b/files/1", Duration::from_secs(60))
            .await
            .unwrap();
        let query = url
            .strip_prefix("http://localhost:3000/objects/buckets/b/files/1?")
            .unwrap();
        let params: HashMap<&str, &str> = query.split('&').filter_map(|kv| kv.split_once('=')).collect();
        let expires: i64 = params["expires"].parse().unwrap();
        assert!(signer.verify("GET", "buckets/b/files/1", expires, params["signature"], Utc::now()));

        let post = store
            .presigned_post_policy("buckets/b/files/1", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(post.url, "http://localhost:3000/upload");
        let expires: i64 = post.fields["expires"].parse().unwrap();
        assert!(signer.verify("POST", "buckets/b/files/1", expires, &post.fields["signature"], Utc::now()));
        assert!(!signer.verify("GET", "buckets/b/files/1", expires, &post.fields["signature"], Utc::now()));
    }

    #[tokio::test]
    async fn test_get_object_reads_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(&dir);
        store
            .put_object("buckets/b/files/1", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(store.get_object("buckets/b/files/1").await.unwrap(), Bytes::from_static(b"hello"));
        assert!(matches!(
            store.get_object("buckets/b/files/2").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
