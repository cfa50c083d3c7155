//! A retry-and-recovery runtime: pluggable backoff strategies, a
//! per-function circuit breaker, structural error classification, durable
//! attempt tracking, and an observability sink, composed behind one
//! orchestration engine in [`wrapper::Recovery`].

pub mod breaker;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod identity;
pub mod observability;
pub mod persistence;
pub mod strategy;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod types;
pub mod wrapper;

pub use breaker::*;
pub use classifier::*;
pub use config::*;
pub use errors::*;
pub use identity::*;
pub use observability::*;
pub use persistence::*;
pub use strategy::*;
pub use types::*;
pub use wrapper::*;
