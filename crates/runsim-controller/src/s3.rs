//! `LogStore` backed by S3 or any S3-compatible object store.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::buffered::BufWriter;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::cluster::{LogStore, LogStream};
use crate::error::{StoreError, StoreResult};
use crate::options::LogBackupOptions;

/// Streams log uploads into an object store bucket.
///
/// Large logs are sent as multipart uploads; nothing is buffered beyond
/// the writer's part size.
#[derive(Debug, Clone)]
pub struct S3LogStore {
    store: Arc<dyn ObjectStore>,
}

impl S3LogStore {
    /// Connect to the bucket described by `options`.
    pub fn new(options: &LogBackupOptions) -> StoreResult<Self> {
        let endpoint = options.endpoint_url();
        let mut builder = AmazonS3Builder::new()
            .with_endpoint(&endpoint)
            .with_region(&options.region)
            .with_bucket_name(&options.bucket)
            .with_allow_http(endpoint.starts_with("http://"));
        if let (Some(key_id), Some(secret)) = (&options.access_key_id, &options.secret_access_key) {
            builder = builder.with_access_key_id(key_id).with_secret_access_key(secret);
        }
        Ok(Self::from_store(Arc::new(builder.build()?)))
    }

    /// Wrap an already configured store.
    pub fn from_store(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl LogStore for S3LogStore {
    async fn put_stream(&self, key: &str, mut body: LogStream, content_type: &str) -> StoreResult<u64> {
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let mut writer = BufWriter::new(self.store.clone(), Path::from(key)).with_attributes(attributes);

        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    if let Err(abort_err) = writer.abort().await {
                        warn!(key = %key, error = %abort_err, "failed to abort upload");
                    }
                    return Err(StoreError::Source {
                        key: key.to_string(),
                        message: err.to_string(),
                    });
                }
            };
            written += chunk.len() as u64;
            writer.put(chunk).await?;
        }
        writer.shutdown().await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use object_store::memory::InMemory;
    use std::io;

    #[tokio::test]
    async fn uploads_the_whole_stream() {
        let backend = Arc::new(InMemory::new());
        let store = S3LogStore::from_store(backend.clone());
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"line 1\n")),
            Ok(Bytes::from_static(b"line 2\n")),
        ])
        .boxed();

        let written = store.put_stream("sim/1/simulation.log", body, "text/plain").await.unwrap();
        assert_eq!(written, 14);

        let stored = backend
            .get(&Path::from("sim/1/simulation.log"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(stored.as_ref(), b"line 1\nline 2\n");
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_object() {
        let backend = Arc::new(InMemory::new());
        let store = S3LogStore::from_store(backend.clone());
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pod went away")),
        ])
        .boxed();

        let err = store.put_stream("sim/1/state.log", body, "text/plain").await.unwrap_err();
        assert!(matches!(err, StoreError::Source { .. }));
        assert!(backend.head(&Path::from("sim/1/state.log")).await.is_err());
    }
}
