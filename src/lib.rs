//! Keyed circuit breaker registry.
//!
//! Multiplexes circuit breakers across an unbounded space of remote call
//! targets: a [`KeySelector`](resilience::KeySelector) partitions calls into
//! keys, and a [`KeyedBreakerRegistry`] lazily creates exactly one breaker per
//! key, shared by every concurrent caller.

pub mod config;
pub mod observability;
pub mod resilience;

pub use config::RegistryConfig;
pub use resilience::{BreakerMapping, KeyedBreakerRegistry};
