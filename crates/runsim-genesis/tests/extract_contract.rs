//! Contract tests for streaming genesis metadata extraction.
//!
//! Bodies are fed as chunked streams so that the tokenizer and the digest
//! loop interleave the way they do against a real HTTP response.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use runsim_genesis::{extract_chain_metadata, extract_field, GenesisError};
use sha2::{Digest, Sha256};

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Split `doc` into chunks of `size` bytes.
fn chunked(doc: &str, size: usize) -> BoxStream<'static, io::Result<Bytes>> {
    let chunks: Vec<io::Result<Bytes>> = doc
        .as_bytes()
        .chunks(size)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(chunks).boxed()
}

fn large_document(chain_id_first: bool) -> String {
    let filler: Vec<String> = (0..5_000)
        .map(|i| format!(r#"{{"address":"cosmos1{i:038}","coins":[{{"denom":"stake","amount":"{i}"}}]}}"#))
        .collect();
    let accounts = format!(r#""accounts":[{}]"#, filler.join(","));
    if chain_id_first {
        format!(r#"{{"chain_id":"big-1",{accounts}}}"#)
    } else {
        format!(r#"{{{accounts},"chain_id":"big-1"}}"#)
    }
}

#[tokio::test]
async fn small_document_across_chunk_sizes() {
    let doc = r#"{"a":1,"chain_id":"test-1","b":[1,2,3]}"#;
    for size in [1, 3, 7, doc.len()] {
        let meta = extract_chain_metadata(chunked(doc, size)).await.unwrap();
        assert_eq!(meta.chain_id, "test-1");
        assert_eq!(meta.sha256, sha256_hex(doc.as_bytes()));
    }
}

#[tokio::test]
async fn digest_covers_complete_body_when_field_comes_first() {
    let doc = large_document(true);
    let meta = extract_chain_metadata(chunked(&doc, 512)).await.unwrap();
    assert_eq!(meta.chain_id, "big-1");
    assert_eq!(meta.sha256, sha256_hex(doc.as_bytes()));
}

#[tokio::test]
async fn digest_covers_complete_body_when_field_comes_last() {
    let doc = large_document(false);
    let meta = extract_chain_metadata(chunked(&doc, 512)).await.unwrap();
    assert_eq!(meta.chain_id, "big-1");
    assert_eq!(meta.sha256, sha256_hex(doc.as_bytes()));
}

#[tokio::test]
async fn missing_field_is_not_found() {
    let err = extract_chain_metadata(chunked(r#"{"a":1,"b":[1,2,3]}"#, 4))
        .await
        .unwrap_err();
    assert!(matches!(err, GenesisError::FieldNotFound { .. }));
}

#[tokio::test]
async fn array_body_is_invalid_json() {
    let err = extract_chain_metadata(chunked("[1,2]", 2)).await.unwrap_err();
    assert!(matches!(err, GenesisError::InvalidJson(_)));
}

#[tokio::test]
async fn non_string_field_is_rejected() {
    let err = extract_field(chunked(r#"{"chain_id":{"nested":true}}"#, 5), "chain_id")
        .await
        .unwrap_err();
    assert!(matches!(err, GenesisError::InvalidFieldType { .. }));
}

#[tokio::test]
async fn read_error_wins_over_a_found_field() {
    let body = stream::iter(vec![
        Ok(Bytes::from_static(br#"{"chain_id":"test-1","#)),
        Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection dropped")),
    ])
    .boxed();

    let err = extract_chain_metadata(body).await.unwrap_err();
    assert!(matches!(err, GenesisError::Digest(_)));
}

#[tokio::test]
async fn stalled_body_can_be_cancelled() {
    let body = stream::iter(vec![Ok(Bytes::from_static(br#"{"a":"#))])
        .chain(stream::pending())
        .boxed();

    let outcome = tokio::time::timeout(Duration::from_millis(200), extract_chain_metadata(body)).await;
    assert!(outcome.is_err(), "extraction should still be waiting on the body");
}
