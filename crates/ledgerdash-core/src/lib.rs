//! Core library for ledgerdash.
//!
//! - [`query`]: client-side query cache and synchronization engine
//! - [`api`]: REST client for the banking backend
//! - [`models`]: accounts, cards, loans and crypto holdings
//! - [`dashboard`]: typed queries and mutations wiring the two together
//! - [`config`]: on-disk configuration with environment overrides

pub mod api;
pub mod config;
pub mod dashboard;
pub mod models;
pub mod query;
pub mod utils;

// Used by `query_key!`
#[doc(hidden)]
pub use serde_json as __serde_json;
