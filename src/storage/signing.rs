//! HMAC-SHA256 signatures for presigned object URLs.
//!
//! A signature covers the HTTP method, the object key and the expiry
//! timestamp, so a download link cannot be replayed as an upload form.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::{StorageError, StorageResult};

type HmacSha256 = Hmac<Sha256>;

/// Keyed signer, cloned per signature.
#[derive(Clone)]
pub struct UrlSigner {
    keyed: HmacSha256,
}

impl UrlSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> StorageResult<Self> {
        let keyed = HmacSha256::new_from_slice(secret.as_ref())
            .map_err(|err| StorageError::Backend(format!("signing key: {}", err)))?;
        Ok(Self { keyed })
    }

    fn mac(&self, method: &str, key: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(method.as_bytes());
        mac.update(b"\n");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    /// Hex-encoded signature for `method key` valid until `expires` (unix seconds).
    pub fn sign(&self, method: &str, key: &str, expires: i64) -> String {
        hex::encode(self.mac(method, key, expires).finalize().into_bytes())
    }

    /// Check a signature from [`UrlSigner::sign`]. The comparison runs in
    /// constant time.
    pub fn verify(&self, method: &str, key: &str, expires: i64, signature: &str, now: DateTime<Utc>) -> bool {
        if expires < now.timestamp() {
            return false;
        }
        let Ok(raw) = hex::decode(signature) else {
            return false;
        };
        self.mac(method, key, expires).verify_slice(&raw).is_ok()
    }
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("UrlSigner(***)")
    }
}
