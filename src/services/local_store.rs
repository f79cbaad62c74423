//! Disk-backed [`ObjectStore`] for development and tests.
//!
//! Payloads live beneath `base_path/{shard}/{shard}/{key}` and signed
//! URLs point back at this process's own `/o/{key}` endpoints. This
//! keeps the broker core byte-free: the dev store is a separate,
//! swappable provider that happens to share the binary.

use crate::services::object_store::{ObjectStore, ProviderError, UploadUrlRequest};
use crate::services::signing::{SignatureError, UrlSigner};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use futures::{Stream, StreamExt, pin_mut};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use sha2::{Digest, Sha256};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

/// Characters escaped when a key or query value is embedded in a URL.
/// `/` stays literal so keys keep their folder structure; `+` is
/// escaped because query parsers read a bare `+` as a space.
const KEY_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'%')
    .add(b'{')
    .add(b'}')
    .add(b'`')
    .add(b'\\')
    .add(b'+')
    .add(b'&')
    .add(b'=');

const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum StoreWriteError {
    #[error("payload exceeds the {limit} byte cap of the signed url")]
    TooLarge { limit: u64 },
    #[error("invalid object key")]
    InvalidKey,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Dev object store: local disk plus HMAC-signed URLs.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    base_path: PathBuf,
    public_base: String,
    signer: UrlSigner,
    allow_unsigned_reads: bool,
}

impl LocalObjectStore {
    /// `public_base` is the externally reachable origin of this server,
    /// e.g. `http://127.0.0.1:3000`; signed URLs are minted under it.
    pub fn new(base_path: impl Into<PathBuf>, public_base: impl Into<String>, signer: UrlSigner) -> Self {
        let mut public_base = public_base.into();
        while public_base.ends_with('/') {
            public_base.pop();
        }
        Self {
            base_path: base_path.into(),
            public_base,
            signer,
            allow_unsigned_reads: false,
        }
    }

    /// Serve unsigned GETs. Only sensible for public-bucket dev setups.
    pub fn allow_unsigned_reads(mut self) -> Self {
        self.allow_unsigned_reads = true;
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn unsigned_reads_allowed(&self) -> bool {
        self.allow_unsigned_reads
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    fn ensure_key_safe(key: &str) -> Result<(), StoreWriteError> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StoreWriteError::InvalidKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StoreWriteError::InvalidKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StoreWriteError::InvalidKey);
        }
        Ok(())
    }

    /// Two-level shard identifiers for an object key.
    ///
    /// First two bytes of SHA-256(key) as lowercase hex. Reduces file
    /// count per directory.
    fn shards(key: &str) -> (String, String) {
        let digest = Sha256::digest(key.as_bytes());
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Fully-qualified payload path: `base/{shard}/{shard}/{key}`.
    fn object_path(&self, key: &str) -> PathBuf {
        let (a, b) = Self::shards(key);
        let mut path = self.base_path.clone();
        path.push(a);
        path.push(b);
        path.push(key);
        path
    }

    fn encoded_key(key: &str) -> String {
        utf8_percent_encode(key, KEY_SEGMENT).to_string()
    }

    pub fn verify_upload_url(
        &self,
        key: &str,
        content_type: &str,
        max_size: Option<u64>,
        expires: i64,
        sig: &str,
    ) -> Result<(), SignatureError> {
        self.signer
            .verify_upload(key, content_type, max_size, expires, sig, Utc::now())
    }

    pub fn verify_read_url(&self, key: &str, expires: i64, sig: &str) -> Result<(), SignatureError> {
        self.signer.verify_read(key, expires, sig, Utc::now())
    }

    /// Stream a verified upload to disk.
    ///
    /// Writes to a temp file, enforces the signed size cap while
    /// streaming, then flush + sync + atomic rename. Temp files are
    /// removed on every failure path.
    pub async fn put_object<S>(
        &self,
        key: &str,
        max_size: Option<u64>,
        stream: S,
    ) -> Result<u64, StoreWriteError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        Self::ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StoreWriteError::Io(io::Error::other("object path missing parent")))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut written: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreWriteError::Io(err));
                }
            };
            written += chunk.len() as u64;
            if let Some(limit) = max_size {
                if written > limit {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreWriteError::TooLarge { limit });
                }
            }
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreWriteError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreWriteError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreWriteError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreWriteError::Io(err));
            }
        }

        Ok(written)
    }

    /// Open an object for streaming out. `None` when absent.
    pub async fn open_object(&self, key: &str) -> Result<Option<(File, u64)>, StoreWriteError> {
        Self::ensure_key_safe(key)?;
        let path = self.object_path(key);
        match File::open(&path).await {
            Ok(file) => {
                let len = file.metadata().await?.len();
                Ok(Some((file, len)))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreWriteError::Io(err)),
        }
    }

    /// Recursively remove empty shard directories up to the base path.
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
impl ObjectStore for LocalObjectStore {
    async fn generate_upload_url(&self, req: &UploadUrlRequest) -> Result<String, ProviderError> {
        Self::ensure_key_safe(&req.key)
            .map_err(|_| ProviderError::Rejected(format!("invalid object key `{}`", req.key)))?;
        let expires = (Utc::now() + req.ttl).timestamp();
        let sig = self
            .signer
            .sign_upload(&req.key, &req.content_type, req.max_size_bytes, expires);
        let mut url = format!(
            "{}/o/{}?expires={}&content-type={}&sig={}",
            self.public_base,
            Self::encoded_key(&req.key),
            expires,
            utf8_percent_encode(&req.content_type, KEY_SEGMENT),
            sig,
        );
        if let Some(limit) = req.max_size_bytes {
            url.push_str(&format!("&max-size={limit}"));
        }
        Ok(url)
    }

    async fn generate_read_url(&self, key: &str, ttl: Duration) -> Result<String, ProviderError> {
        Self::ensure_key_safe(key)
            .map_err(|_| ProviderError::Rejected(format!("invalid object key `{key}`")))?;
        let expires = (Utc::now() + ttl).timestamp();
        let sig = self.signer.sign_read(key, expires);
        Ok(format!(
            "{}/o/{}?expires={}&sig={}",
            self.public_base,
            Self::encoded_key(key),
            expires,
            sig,
        ))
    }

    async fn delete_object(&self, key: &str) -> Result<(), ProviderError> {
        Self::ensure_key_safe(key)
            .map_err(|_| ProviderError::Rejected(format!("invalid object key `{key}`")))?;
        let path = self.object_path(key);
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed object {}", key),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("object {} already absent", key);
            }
            Err(err) => return Err(ProviderError::Io(err)),
        }
        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/o/{}", self.public_base, Self::encoded_key(key))
    }

    fn object_key_from_url(&self, url: &str) -> Option<String> {
        let prefix = format!("{}/o/", self.public_base);
        let rest = url.strip_prefix(&prefix)?;
        let path = rest.split('?').next()?;
        let key = percent_decode_str(path).decode_utf8().ok()?.into_owned();
        Self::ensure_key_safe(&key).ok()?;
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn store(dir: &Path) -> LocalObjectStore {
        LocalObjectStore::new(dir, "http://localhost:3000", UrlSigner::new("test-secret"))
    }

    fn body(bytes: &'static [u8]) -> impl Stream<Item = io::Result<Bytes>> + Send {
        stream::iter(vec![Ok(Bytes::from_static(bytes))])
    }

    #[tokio::test]
    async fn put_then_open_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let written = store
            .put_object("files/a.txt", None, body(b"hello"))
            .await
            .unwrap();
        assert_eq!(written, 5);
        let (_file, len) = store.open_object("files/a.txt").await.unwrap().unwrap();
        assert_eq!(len, 5);
    }

    #[tokio::test]
    async fn size_cap_is_enforced_while_streaming() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let err = store
            .put_object("files/big.bin", Some(3), body(b"too long"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreWriteError::TooLarge { limit: 3 }));
        assert!(store.open_object("files/big.bin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_an_absent_object_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.delete_object("files/nothing.txt").await.unwrap();
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let err = store
            .put_object("../escape", None, body(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreWriteError::InvalidKey));
    }

    #[tokio::test]
    async fn url_to_key_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let url = store.public_url("images/logo v2.png");
        assert_eq!(
            store.object_key_from_url(&url).as_deref(),
            Some("images/logo v2.png")
        );
        assert!(store.object_key_from_url("http://elsewhere/o/x").is_none());
    }

    #[tokio::test]
    async fn signed_upload_url_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let url = store
            .generate_upload_url(&UploadUrlRequest {
                key: "files/a.txt".into(),
                content_type: "text/plain".into(),
                max_size_bytes: Some(10),
                ttl: Duration::hours(1),
                thumbnails: false,
            })
            .await
            .unwrap();
        // pull expires + sig back out of the query string
        let query = url.split_once('?').unwrap().1;
        let mut expires = 0;
        let mut sig = String::new();
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse().unwrap(),
                Some(("sig", v)) => sig = v.to_string(),
                _ => {}
            }
        }
        store
            .verify_upload_url("files/a.txt", "text/plain", Some(10), expires, &sig)
            .unwrap();
    }
}
