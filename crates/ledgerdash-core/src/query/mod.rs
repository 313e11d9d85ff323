//! Client-side query cache and synchronization engine.
//!
//! - [`CacheStore`]: one entry per canonical [`QueryKey`], with expiry.
//! - [`SubscriberRegistry`]: per-key change notifications.
//! - [`QueryBinding`]: one consumer's fetch/retry/cancel orchestrator.
//! - [`Mutation`]: one-shot writes with optimistic update hooks.
//! - [`QueryClient`]: owns the store and registry, offers prefetch and
//!   invalidation, and is injected into every binding and mutation.
//!
//! Writes are last-write-wins by completion time: a slow fetch started
//! earlier overwrites a faster one started later if it finishes afterwards.

pub mod binding;
pub mod client;
pub mod error;
pub mod focus;
pub mod key;
mod lock;
pub mod mutation;
pub mod observer;
pub mod options;
pub mod registry;
pub mod store;

pub use binding::{FetchReason, QueryBinding, QueryState, QueryStatus};
pub use client::{QueryClient, QueryClientBuilder};
pub use error::QueryError;
pub use focus::FocusManager;
pub use key::QueryKey;
pub use mutation::{Mutation, MutationOptions, MutationState};
pub use observer::{FetchObserver, FetchOutcome, TracingObserver};
pub use options::{QueryData, QueryDefaults, QueryOptions};
pub use registry::{SubscriberRegistry, Subscription};
pub use store::{CacheEntry, CacheStore};
