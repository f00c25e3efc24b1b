//! Backing Registry Implementations
//!
//! Concrete [`Registry`](crate::domain::Registry) stores the cache can
//! wrap.

pub mod memory;

pub use memory::{CallCounts, InMemoryRegistry};
