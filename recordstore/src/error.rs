//! The five error kinds the engine can raise, and their conversions.

use std::io;

use thiserror::Error;

/// Shorthand for `std::result::Result<T, EngineError>`, used throughout this crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Everything that can go wrong talking to the engine.
///
/// `RecordNotFound`, `DuplicateKey` and `TransactionError` are ordinary control flow a caller is
/// expected to handle; they never wrap an underlying OS error. `FormatError` and `FatalIO` wrap
/// one, since they originate below the engine's own invariants.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("duplicate primary key: {0:?}")]
    DuplicateKey(Vec<String>),

    #[error("transaction error on record {record}: {reason}")]
    TransactionError { record: u32, reason: &'static str },

    #[error("data file format error: {message}")]
    FormatError {
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("fatal I/O error")]
    FatalIO(#[from] io::Error),
}

impl EngineError {
    pub(crate) fn format_error(message: impl Into<String>) -> Self {
        EngineError::FormatError { message: message.into(), source: None }
    }

    pub(crate) fn format_error_with_source(message: impl Into<String>, source: io::Error) -> Self {
        EngineError::FormatError { message: message.into(), source: Some(source) }
    }

    pub(crate) fn transaction_error(record: u32, reason: &'static str) -> Self {
        EngineError::TransactionError { record, reason }
    }
}
