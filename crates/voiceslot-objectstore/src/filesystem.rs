//! Filesystem-backed object store. Keys map directly onto paths under a
//! root directory; this adapter exists for local dev and tests, never
//! production (no presigned URL scheme, so `presigned_url` returns a
//! plain `file://` reference).

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;

use voiceslot_core::errors::{ObjectStoreError, ObjectStoreResult};
use voiceslot_core::ports::{HeadResult, ObjectStorePort, PutOptions};

pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

fn io_err(err: std::io::Error) -> ObjectStoreError {
    ObjectStoreError::RequestFailed {
        message: err.to_string(),
    }
}

#[async_trait]
impl ObjectStorePort for FilesystemObjectStore {
    async fn upload(&self, key: &str, bytes: Bytes, _options: PutOptions) -> ObjectStoreResult<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        fs::write(&path, bytes).await.map_err(io_err)
    }

    async fn download(&self, key: &str) -> ObjectStoreResult<Bytes> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(contents) => Ok(Bytes::from(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(ObjectStoreError::NotFound {
                key: key.to_string(),
            }),
            Err(err) => Err(io_err(err)),
        }
    }

    async fn head(&self, key: &str) -> ObjectStoreResult<HeadResult> {
        let path = self.path_for(key);
        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ObjectStoreError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(err) => return Err(io_err(err)),
        };
        Ok(HeadResult {
            content_length: metadata.len(),
            content_type: guess_content_type(&path),
            metadata: std::collections::HashMap::new(),
        })
    }

    async fn delete(&self, keys: &[String]) -> ObjectStoreResult<()> {
        for key in keys {
            let path = self.path_for(key);
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(io_err(err)),
            }
        }
        Ok(())
    }

    async fn presigned_url(&self, key: &str, _ttl: Duration) -> ObjectStoreResult<String> {
        Ok(format!("file://{}", self.path_for(key).display()))
    }
}

fn guess_content_type(path: &Path) -> Option<String> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("mp3") => Some("audio/mpeg".to_string()),
        Some("wav") => Some("audio/wav".to_string()),
        Some("m4a") => Some("audio/mp4".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_download_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path());
        store
            .upload("voices/1/sample.wav", Bytes::from_static(b"hello"), PutOptions::default())
            .await
            .unwrap();
        let data = store.download("voices/1/sample.wav").await.unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn download_missing_key_returns_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path());
        let err = store.download("nope").await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path());
        store
            .upload("a.bin", Bytes::from_static(b"x"), PutOptions::default())
            .await
            .unwrap();
        store.delete(&["a.bin".to_string()]).await.unwrap();
        store.delete(&["a.bin".to_string()]).await.unwrap();
    }
}
