use std::time::Duration;

use thiserror::Error;

/// An error produced while dispatching a query.
///
/// Errors are delivered to every caller sharing a coalesced request, so this
/// type is `Clone` and carries owned strings instead of error sources.
/// Errors are never cached; a later identical request always triggers a
/// fresh network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The transport did not produce a response within the configured timeout.
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    /// The query failed due to a network or HTTP problem, like connection
    /// loss, DNS resolution, or a non-success status code.
    ///
    /// The attached string contains the underlying failure.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The backend answered successfully, but the payload signals a logical
    /// failure.
    #[error("application failure: {0}")]
    Application(String),
    /// An unexpected error in the dispatch layer itself.
    #[error("internal error")]
    InternalError,
}
