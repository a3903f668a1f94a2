//! HTTP retrieval of genesis documents

use std::time::Duration;

use futures::TryStreamExt;
use tracing::{info, instrument};

use crate::error::GenesisError;
use crate::{extract_chain_metadata, GenesisMetadata, Result};

/// Upper bound on a whole genesis download.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetches remote genesis documents and extracts their metadata.
#[derive(Debug, Clone)]
pub struct GenesisFetcher {
    http_client: reqwest::Client,
}

impl GenesisFetcher {
    /// Create a fetcher whose requests fail after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("runsim-operator/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { http_client })
    }

    /// Download `url` and return its chain id and SHA-256.
    #[instrument(skip(self))]
    pub async fn fetch(&self, url: &str) -> Result<GenesisMetadata> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| GenesisError::Fetch(e.to_string()))?;

        let body = response.bytes_stream().map_err(std::io::Error::other);
        let metadata = extract_chain_metadata(Box::pin(body)).await?;
        info!(chain_id = %metadata.chain_id, sha256 = %metadata.sha256, "resolved genesis");
        Ok(metadata)
    }
}
