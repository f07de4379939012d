//! Caching and admission-control primitives for the query dispatch layer.
//!
//! These primitives are independent of any transport: [`CacheKey`] derives a
//! deterministic identity for a logical request, and [`BoundedQueue`] limits
//! how many submitted tasks run at once while keeping strict FIFO admission
//! order for the rest.

#![warn(missing_docs)]

mod defer;
mod key;
mod queue;

pub use defer::*;
pub use key::*;
pub use queue::*;
