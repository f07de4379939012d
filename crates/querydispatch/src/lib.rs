//! Deduplicating, concurrency-limited dispatch of data queries.
//!
//! The [`QueryDispatcher`](crate::QueryDispatcher) is the entry point: it
//! caches successful responses for the lifetime of the process, coalesces
//! concurrent identical requests onto a single network call, and limits how
//! many queries run against the backend at once.
//!
//! The network boundary is the [`Transport`](crate::Transport) trait with a
//! reqwest-backed [`HttpTransport`](crate::HttpTransport) implementation.

pub mod config;
mod dispatcher;
mod error;
pub mod logging;
mod transport;

pub use dispatcher::{QueryDispatcher, QueryResult};
pub use error::DispatchError;
pub use transport::{ApiVersion, HttpTransport, Transport};
