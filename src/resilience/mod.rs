//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outgoing call (target, options, operation, args):
//!     → key_selector.rs (derive partition key)
//!     → registry.rs (look up or lazily create the key's breaker)
//!     → caller gates the call with the breaker and reports the outcome
//! ```
//!
//! # Design Decisions
//! - One breaker per key, never per call
//! - Key granularity is the selector's choice; the registry never evicts
//! - Breaker internals are opaque; any `Send + Sync` type works

pub mod key_selector;
pub mod registry;
pub mod types;

pub use key_selector::{ByOperation, ByTarget, ByTargetAndOperation, KeySelector, KeyStrategy};
pub use registry::{BreakerMapping, KeyedBreakerRegistry};
pub use types::{BoxError, CallOptions, CallParams, CallTarget, KeyDerivationError, ResolveError, ResolveResult};
