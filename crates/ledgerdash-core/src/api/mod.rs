//! REST API client for the banking backend.
//!
//! This module provides the `ApiClient` used as the transport behind every
//! dashboard query and mutation. Requests carry an optional bearer token
//! supplied by configuration.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
