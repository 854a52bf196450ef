//! Object storage port (§6). Key layouts are the caller's responsibility;
//! this port is deliberately ignorant of the `voice_samples/...` /
//! `audio_stories/...` conventions.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::ObjectStoreResult;

#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    /// Server-side encryption; AES-256 when the deployment policy flag is on.
    pub server_side_encryption: bool,
}

#[derive(Debug, Clone, Default)]
pub struct HeadResult {
    pub content_length: u64,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait ObjectStorePort: Send + Sync {
    async fn upload(&self, key: &str, bytes: Bytes, options: PutOptions) -> ObjectStoreResult<()>;
    async fn download(&self, key: &str) -> ObjectStoreResult<Bytes>;
    async fn head(&self, key: &str) -> ObjectStoreResult<HeadResult>;
    async fn delete(&self, keys: &[String]) -> ObjectStoreResult<()>;
    async fn presigned_url(&self, key: &str, ttl: Duration) -> ObjectStoreResult<String>;
}
