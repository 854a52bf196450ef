//! S3-backed object store, for production. Presigned GET URLs are how the
//! HTTP layer serves synthesized audio without proxying bytes through this
//! service.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;

use voiceslot_core::errors::{ObjectStoreError, ObjectStoreResult};
use voiceslot_core::ports::{HeadResult, ObjectStorePort, PutOptions};

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    #[must_use]
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Builds a client from the standard AWS environment/config chain.
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), bucket)
    }
}

fn request_err(message: impl std::fmt::Display) -> ObjectStoreError {
    ObjectStoreError::RequestFailed {
        message: message.to_string(),
    }
}

#[async_trait]
impl ObjectStorePort for S3ObjectStore {
    async fn upload(&self, key: &str, bytes: Bytes, options: PutOptions) -> ObjectStoreResult<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes));

        if let Some(content_type) = options.content_type {
            request = request.content_type(content_type);
        }
        if options.server_side_encryption {
            request = request.server_side_encryption(aws_sdk_s3::types::ServerSideEncryption::Aes256);
        }
        for (k, v) in options.metadata {
            request = request.metadata(k, v);
        }

        request.send().await.map_err(request_err)?;
        Ok(())
    }

    async fn download(&self, key: &str) -> ObjectStoreResult<Bytes> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    ObjectStoreError::NotFound { key: key.to_string() }
                } else {
                    request_err(err)
                }
            })?;
        let data = response.body.collect().await.map_err(request_err)?;
        Ok(data.into_bytes())
    }

    async fn head(&self, key: &str) -> ObjectStoreResult<HeadResult> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    ObjectStoreError::NotFound { key: key.to_string() }
                } else {
                    request_err(err)
                }
            })?;
        Ok(HeadResult {
            content_length: u64::try_from(response.content_length.unwrap_or(0)).unwrap_or(0),
            content_type: response.content_type,
            metadata: response.metadata.unwrap_or_default(),
        })
    }

    async fn delete(&self, keys: &[String]) -> ObjectStoreResult<()> {
        for key in keys {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(request_err)?;
        }
        Ok(())
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> ObjectStoreResult<String> {
        let presign_config = PresigningConfig::expires_in(ttl).map_err(request_err)?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(request_err)?;
        Ok(presigned.uri().to_string())
    }
}
