//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! registry.rs produces:
//!     → tracing events (creation, lost races, failures)
//!     → metrics.rs (counters and a size gauge per registry)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout)
//!     → whatever `metrics` recorder the host application installs
//! ```
//!
//! # Design Decisions
//! - The library never installs a recorder or subscriber on its own
//! - Metrics describe the registry, not breaker outcomes

pub mod logging;
pub mod metrics;
