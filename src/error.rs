use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("syntax error at {line}:{column}: {message}")]
    Syntax {
        line: u32,
        column: u32,
        message: String,
    },

    #[error("unknown prefix: {0}")]
    UnknownPrefix(String),

    #[error("schema invariant violated: {0}")]
    SchemaInvariant(String),

    #[error("type error: {0}")]
    TypeError(String),

    #[error("storage full")]
    StorageFull,

    #[error("storage I/O error: {0}")]
    StorageIo(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupted data: {0}")]
    Corruption(String),

    #[error("operation canceled")]
    Canceled,

    #[error("store disposed")]
    Disposed,

    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn syntax(line: u32, column: u32, message: impl Into<String>) -> Self {
        StoreError::Syntax {
            line,
            column,
            message: message.into(),
        }
    }

    /// Expression-evaluation errors are recovered locally inside FILTER
    /// (the row is dropped); everything else aborts the query.
    pub fn is_value_error(&self) -> bool {
        matches!(self, StoreError::TypeError(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

// Error conversions for common error types

impl From<bincode::error::EncodeError> for StoreError {
    fn from(e: bincode::error::EncodeError) -> Self {
        StoreError::Corruption(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for StoreError {
    fn from(e: bincode::error::DecodeError) -> Self {
        StoreError::Corruption(e.to_string())
    }
}
