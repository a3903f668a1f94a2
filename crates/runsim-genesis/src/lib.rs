//! runsim-genesis: Genesis metadata extraction
//!
//! Reads a genesis document exactly once and produces two results from that
//! single pass: the value of one top-level string property (the chain id)
//! and the SHA-256 digest of the complete document.
//!
//! The body is never buffered as a whole. Two consumers share it:
//!
//! - the caller digests every chunk as it arrives, and
//! - a blocking tokenizer task parses the document incrementally, stopping
//!   as soon as the property is found.
//!
//! Chunks are handed from the first to the second over a channel of
//! capacity one, so reading from the network is paced by the tokenizer until
//! it is done, after which the rest of the body is drained into the digest.

mod error;
mod remote;
mod seek;
mod tee;

use std::io;

use bytes::Bytes;
use futures::Stream;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

pub use error::GenesisError;
pub use remote::{GenesisFetcher, DEFAULT_FETCH_TIMEOUT};

use seek::seek_string_field;
use tee::{ChannelReader, TeeStream};

/// Result type for genesis operations
pub type Result<T> = std::result::Result<T, GenesisError>;

/// Top-level property holding the chain identifier.
pub const CHAIN_ID_FIELD: &str = "chain_id";

/// Chain identifier and digest of a genesis document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisMetadata {
    pub chain_id: String,
    /// Lowercase hex SHA-256 of the complete document.
    pub sha256: String,
}

/// Extract the string property `field` and the SHA-256 of the whole body.
///
/// Errors reading the body take precedence over the tokenizer's outcome.
/// Dropping the returned future releases the tokenizer task.
pub async fn extract_field<S>(body: S, field: &str) -> Result<(String, String)>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    let (chunk_tx, chunk_rx) = mpsc::channel::<Bytes>(1);
    let (result_tx, result_rx) = oneshot::channel();

    let wanted = field.to_string();
    tokio::task::spawn_blocking(move || {
        let outcome = seek_string_field(ChannelReader::new(chunk_rx), &wanted);
        // The receiver is gone when the caller failed or was cancelled.
        let _ = result_tx.send(outcome);
    });

    let mut tee = TeeStream::new(body, chunk_tx);
    let mut hasher = Sha256::new();
    let mut total = 0usize;
    while let Some(chunk) = tee.next_chunk().await {
        match chunk {
            Ok(chunk) => {
                total += chunk.len();
                hasher.update(&chunk);
            }
            Err(err) => {
                tee.close();
                return Err(GenesisError::Digest(err.to_string()));
            }
        }
    }
    tee.close();
    let digest = hex::encode(hasher.finalize());
    debug!(bytes = total, sha256 = %digest, "genesis body digested");

    let value = result_rx.await.map_err(|_| GenesisError::TokenizerAborted)??;
    Ok((value, digest))
}

/// Extract the chain id and digest of a genesis document.
pub async fn extract_chain_metadata<S>(body: S) -> Result<GenesisMetadata>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    let (chain_id, sha256) = extract_field(body, CHAIN_ID_FIELD).await?;
    Ok(GenesisMetadata { chain_id, sha256 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    fn one_chunk(doc: &'static str) -> impl Stream<Item = io::Result<Bytes>> + Unpin {
        stream::iter(vec![Ok(Bytes::from_static(doc.as_bytes()))])
    }

    #[tokio::test]
    async fn extracts_chain_id_and_digest() {
        let doc = r#"{"a":1,"chain_id":"test-1","b":[1,2,3]}"#;
        let meta = extract_chain_metadata(one_chunk(doc)).await.unwrap();
        assert_eq!(meta.chain_id, "test-1");
        assert_eq!(meta.sha256, sha256_hex(doc.as_bytes()));
    }

    #[tokio::test]
    async fn empty_body_is_invalid_json() {
        let body = stream::iter(Vec::<io::Result<Bytes>>::new());
        let err = extract_chain_metadata(body).await.unwrap_err();
        assert!(matches!(err, GenesisError::InvalidJson(_)));
    }

    #[tokio::test]
    async fn custom_field_names_are_supported() {
        let doc = r#"{"genesis_time":"2021-01-01T00:00:00Z","chain_id":"x"}"#;
        let (value, _) = extract_field(one_chunk(doc), "genesis_time").await.unwrap();
        assert_eq!(value, "2021-01-01T00:00:00Z");
    }
}
