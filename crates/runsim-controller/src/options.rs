//! Process-wide controller configuration.

use std::time::Duration;

use crate::error::ControllerError;

pub const DEFAULT_S3_ENDPOINT: &str = "s3.amazonaws.com";
pub const DEFAULT_S3_REGION: &str = "us-east-1";
pub const DEFAULT_LOGS_BUCKET: &str = "simulation-logs";
pub const DEFAULT_SEED_CONCURRENCY: usize = 4;

/// Where terminal Job logs are archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBackupOptions {
    /// S3 endpoint host, or a full URL for S3-compatible stores
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl Default for LogBackupOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_S3_ENDPOINT.to_string(),
            region: DEFAULT_S3_REGION.to_string(),
            bucket: DEFAULT_LOGS_BUCKET.to_string(),
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl LogBackupOptions {
    /// Set the endpoint host or URL
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Set static credentials
    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    /// Endpoint as a URL; bare hosts are reached over HTTPS.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            format!("https://{}", self.endpoint)
        }
    }
}

/// Configuration shared by every reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Log archival; disabled when `None`
    pub log_backup: Option<LogBackupOptions>,
    /// Pull secret attached to every Job pod
    pub image_pull_secret: Option<String>,
    /// Seeds converged concurrently within one pass
    pub seed_concurrency: usize,
    /// Requeue delay after the simulation could not be read
    pub fetch_retry: Duration,
    /// Requeue delay after any other failed pass
    pub error_retry: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            log_backup: None,
            image_pull_secret: None,
            seed_concurrency: DEFAULT_SEED_CONCURRENCY,
            fetch_retry: Duration::from_secs(30),
            error_retry: Duration::from_secs(15),
        }
    }
}

impl ControllerOptions {
    pub fn with_log_backup(mut self, backup: LogBackupOptions) -> Self {
        self.log_backup = Some(backup);
        self
    }

    pub fn with_image_pull_secret(mut self, secret: impl Into<String>) -> Self {
        self.image_pull_secret = Some(secret.into());
        self
    }

    /// Set per-pass seed concurrency (at least one)
    pub fn with_seed_concurrency(mut self, concurrency: usize) -> Self {
        self.seed_concurrency = concurrency.max(1);
        self
    }

    /// Requeue delay for a failed pass.
    pub fn retry_after(&self, err: &ControllerError) -> Duration {
        match err {
            ControllerError::Fetch { .. } => self.fetch_retry,
            _ => self.error_retry,
        }
    }
}
