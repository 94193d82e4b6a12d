//! Loop-engine error types

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur while driving trade loops
#[derive(Error, Debug, Clone)]
pub enum GridError {
    #[error("invalid price point: {0}")]
    InvalidPoint(String),

    #[error("order field mismatch on {field}: known {known}, update {update}")]
    OrderMismatch {
        field: &'static str,
        known: String,
        update: String,
    },

    #[error("loop {index} inconsistent: {buys} buys / {sells} sells, holdings {holdings}")]
    Inconsistent {
        index: usize,
        buys: usize,
        sells: usize,
        holdings: Decimal,
    },

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(uuid::Uuid),

    #[error("exchange error: {0}")]
    Exchange(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<crate::store::StoreError> for GridError {
    fn from(err: crate::store::StoreError) -> Self {
        GridError::Persistence(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for GridError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        GridError::Persistence(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for GridError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        GridError::Persistence(err.to_string())
    }
}

/// Result type for loop-engine operations
pub type GridResult<T> = std::result::Result<T, GridError>;
