//! Shared utilities for registry integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use breaker_registry::resilience::{CallOptions, CallParams, CallTarget, KeyedBreakerRegistry, ResolveResult};

/// Breaker stand-in recording which key it was created for.
#[derive(Debug)]
pub struct StubBreaker {
    pub key: String,
}

/// Counts factory invocations, per registry.
#[derive(Debug, Default, Clone)]
pub struct FactoryCounter(Arc<AtomicUsize>);

impl FactoryCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Resolve a call against `target` with default options and no arguments.
pub fn resolve(
    registry: &KeyedBreakerRegistry<String, StubBreaker>,
    target: &str,
    operation: &str,
) -> ResolveResult<Arc<StubBreaker>> {
    let target = CallTarget::parse(target).expect("test target must be a valid URL");
    let options = CallOptions::default();
    registry.resolve(&CallParams::new(&target, &options, operation, &[]))
}
