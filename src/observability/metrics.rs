//! Registry metrics.
//!
//! # Metrics
//! - `breaker_registry_breakers_created_total` (counter): breakers committed to the map
//! - `breaker_registry_creation_failures_total` (counter): factory errors
//! - `breaker_registry_race_losses_total` (counter): creations discarded after losing an insert race
//! - `breaker_registry_breakers` (gauge): current number of breakers
//!
//! All metrics carry a `registry` label. Without an installed recorder these are no-ops.
//! Each registry decides for itself whether to call these.
//! Breaker outcomes (calls permitted, rejected, tripped) are the breaker's own metrics.

/// Record a breaker committed for a new key.
pub fn record_breaker_created(registry: &str) {
    metrics::counter!("breaker_registry_breakers_created_total", "registry" => registry.to_string()).increment(1);
}

/// Record a factory failure.
pub fn record_creation_failure(registry: &str) {
    metrics::counter!("breaker_registry_creation_failures_total", "registry" => registry.to_string()).increment(1);
}

/// Record a created breaker that was dropped because another caller inserted first.
pub fn record_race_loss(registry: &str) {
    metrics::counter!("breaker_registry_race_losses_total", "registry" => registry.to_string()).increment(1);
}

/// Record the current number of breakers held by a registry.
pub fn record_registry_size(registry: &str, size: usize) {
    metrics::gauge!("breaker_registry_breakers", "registry" => registry.to_string()).set(size as f64);
}
