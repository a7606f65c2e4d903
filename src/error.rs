use thiserror::Error;

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(e) => Self::Unavailable(format!("I/O error: {}", e)),
            sqlx::Error::PoolTimedOut => Self::Unavailable("Connection pool timed out".to_string()),
            sqlx::Error::PoolClosed => Self::Unavailable("Connection pool closed".to_string()),
            sqlx::Error::WorkerCrashed => Self::Unavailable("Database worker crashed".to_string()),
            sqlx::Error::Database(db) if is_busy_code(db.code().as_deref()) => {
                Self::Unavailable(format!("Database busy: {}", db))
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(format!("Unique constraint violated: {}", db))
            }
            other => Self::Corrupt(format!("Database error: {}", other)),
        }
    }
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended codes.
fn is_busy_code(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .map(|c| matches!(c & 0xff, 5 | 6))
        .unwrap_or(false)
}

/// Errors that a retry policy may act on.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("Cannot build Merkle root from empty input")]
    EmptyInput,

    #[error("Leaf index {index} out of range for {len} leaves")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Malformed hash: {0}")]
    MalformedHash(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store conflict: {0}")]
    Conflict(String),

    #[error("Corrupt store data: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Transient ledger failure: {0}")]
    Transient(String),

    #[error("Ledger request timed out: {0}")]
    Timeout(String),

    #[error("Ledger rejected submission: {0}")]
    Rejected(String),

    #[error("Invalid ledger response: {0}")]
    InvalidResponse(String),
}

impl Retryable for LedgerError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit event dropped after {attempts} attempts")]
    Dropped { attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Export error: {0}")]
    Export(String),
}

#[derive(Error, Debug)]
pub enum AnchorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Merkle(#[from] MerkleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl Retryable for AnchorError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Ledger(e) => e.is_retryable(),
            _ => false,
        }
    }
}
