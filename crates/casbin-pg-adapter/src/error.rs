//! Error taxonomy for the adapter.
//!
//! # Purpose
//! Separates failures the caller can act on (bad configuration, invalid rules,
//! unsupported operations) from store failures (connectivity, schema setup,
//! statement execution).
//!
//! # Notes
//! Every public operation surfaces these as values; nothing in the adapter
//! aborts the process.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("connection failed: {0}")]
    Connection(#[source] sqlx::Error),
    #[error("connection timed out after {0}ms")]
    ConnectTimeout(u64),
    #[error("schema setup failed: {0}")]
    Schema(#[source] sqlx::Error),
    #[error("invalid policy rule: {0}")]
    Validation(String),
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

impl AdapterError {
    /// True for failures raised before any statement reached the store.
    pub fn is_rejected_input(&self) -> bool {
        matches!(
            self,
            AdapterError::Config(_) | AdapterError::Validation(_) | AdapterError::NotImplemented(_)
        )
    }
}

impl From<AdapterError> for casbin::Error {
    fn from(err: AdapterError) -> Self {
        casbin::error::AdapterError(Box::new(err)).into()
    }
}
