use thiserror::Error;

/// Custom error type for the profile store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("out-of-order sample: timestamp {timestamp} is not after max time {max_time}")]
    OutOfOrder { timestamp: i64, max_time: i64 },

    #[error("schema mismatch for {what}: series has {series}, append has {append}")]
    SchemaMismatch {
        what: &'static str,
        series: String,
        append: String,
    },

    #[error("encoding failure: {0}")]
    Encoding(String),

    #[error("unexpected end of {0} iterator")]
    UnexpectedEnd(&'static str),

    #[error("wrong iteration for {column}, expected: {expected}, got: {got}")]
    IteratorDesync {
        column: &'static str,
        expected: u64,
        got: u64,
    },

    #[error("lock acquisition failed: {0}")]
    LockError(String),
}

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StoreError::LockError(format!("Mutex/RwLock poisoned: {}", err))
    }
}
