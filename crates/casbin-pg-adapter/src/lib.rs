//! Postgres-backed policy storage for casbin.
//!
//! # Purpose
//! Persists a casbin policy model in a single fixed-width table
//! (`ptype`, `v0`..`v5`) and reconstructs it on load.
//!
//! # Notes
//! - Every operation opens its own connection; nothing is cached between calls.
//! - Saves replace the whole table inside one transaction.
//! - Filtered removal is not supported.
pub mod adapter;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod model;
pub mod store;

pub use adapter::PgAdapter;
pub use codec::StoredRow;
pub use config::AdapterConfig;
pub use error::{AdapterError, AdapterResult};
pub use store::{PolicyStore, RuleFilter};
