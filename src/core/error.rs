use thiserror::Error;

#[derive(Error, Debug)]
pub enum PerfError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Shared memory error: {0}")]
    SharedMemory(String),

    #[error("Lock contention: gave up after {attempts} attempts")]
    LockContention { attempts: u32 },

    #[error("Malformed beacon: {0}")]
    Malformed(#[from] Malformed),

    #[error("Invalid filter pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Snapshot encoding error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Reasons a beacon is rejected at the boundary.
///
/// These never reach the aggregation store or the live tail; the HTTP layer
/// maps every variant to a 400.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Malformed {
    #[error("body is not valid beacon JSON: {0}")]
    InvalidJson(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("unknown beacon type '{0}'")]
    UnknownType(String),

    #[error("resource is not a valid URL: {0}")]
    InvalidUrl(String),

    #[error("metric entry #{0} has no name")]
    UnnamedMetric(usize),

    #[error("metric '{name}' is not valid for {kind} beacons")]
    UnknownMetric { kind: &'static str, name: String },

    #[error("metric '{0}' is missing a usable value")]
    MissingValue(String),

    #[error("metric '{0}' has a negative or non-finite value")]
    InvalidValue(String),
}

/// Result type alias for perftail operations
pub type Result<T> = std::result::Result<T, PerfError>;

impl PerfError {
    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Creates a new shared memory error
    pub fn shared_memory<S: Into<String>>(msg: S) -> Self {
        Self::SharedMemory(msg.into())
    }

    /// Returns true if retrying the same operation later may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::LockContention { .. } => true,
            Self::Database(err) => matches!(
                err.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Storage(_) | Self::Database(_) => "storage",
            Self::SharedMemory(_) => "shared_memory",
            Self::LockContention { .. } => "contention",
            Self::Malformed(_) | Self::InvalidPattern(_) => "validation",
            Self::Io(_) => "io",
            Self::Serialization(_) | Self::Snapshot(_) => "serialization",
            Self::Join(_) => "async",
        }
    }
}
