//! Error types for runsim-controller

use runsim_genesis::GenesisError;
use thiserror::Error;

/// Errors returned by the cluster object store
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Target object does not exist
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },

    /// An object with the same name already exists
    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// The write was based on a stale resource version
    #[error("conflict writing {kind} {name:?}: object was modified concurrently")]
    Conflict { kind: &'static str, name: String },

    /// Any other API failure
    #[error("kubernetes api error: {0}")]
    Api(String),
}

/// Errors returned by the log archive store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend rejected the write
    #[error("object store error: {0}")]
    Backend(String),

    /// The log stream being uploaded failed
    #[error("reading log stream for {key}: {message}")]
    Source { key: String, message: String },
}

impl From<object_store::Error> for StoreError {
    fn from(err: object_store::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Errors that fail a reconciliation pass
#[derive(Error, Debug)]
pub enum ControllerError {
    /// The simulation itself could not be read
    #[error("unable to fetch simulation {name}: {source}")]
    Fetch {
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("log archive failed: {0}")]
    Store(#[from] StoreError),

    #[error("could not retrieve information from genesis: {0}")]
    Genesis(#[from] GenesisError),

    /// A terminal Job without pods cannot have its logs archived
    #[error("job {job:?} has no pods")]
    NoPods { job: String },

    #[error("job {job:?} is missing the {annotation} annotation")]
    MissingAnnotation {
        job: String,
        annotation: &'static str,
    },

    /// Owner references need a persisted simulation (name and uid)
    #[error("simulation {name:?} has no uid; it must be read from the cluster first")]
    NotPersisted { name: String },
}

impl ControllerError {
    /// Whether the pass lost a compare-and-set race and must start over.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControllerError::Cluster(ClusterError::Conflict { .. }))
    }
}

/// Result type for cluster operations
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Result type for log store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;
