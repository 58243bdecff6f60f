//! Keyed circuit breaker registry.
//!
//! # Responsibilities
//! - Map each call to a breaker through a [`KeySelector`]
//! - Create breakers lazily, on the first call for a key
//! - Keep exactly one breaker per key for the registry's lifetime
//!
//! # Resolution
//! ```text
//! resolve(call)
//!     → selector.select(call)            (error: returned as-is)
//!     → shared read of the map           (hit: return)
//!     → factory(key)                     (no map lock held)
//!     → atomic insert-if-absent          (lost race: drop ours, return winner)
//! ```
//!
//! # Design Decisions
//! - The factory runs outside every shard lock, so a slow creation never stalls other keys
//! - Under contention the factory may run more than once per key; only one result is kept
//! - Failed creations commit nothing; the next call retries
//! - No eviction: a breaker lives as long as the registry

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::config::RegistryConfig;
use crate::observability::metrics;
use crate::resilience::key_selector::KeySelector;
use crate::resilience::types::{BoxError, CallParams, ResolveError, ResolveResult};

/// Name used when a registry is not given one.
pub const DEFAULT_REGISTRY_NAME: &str = "default";

type Factory<K, B> = dyn Fn(&K) -> Result<B, BoxError> + Send + Sync;

/// Looks up the circuit breaker guarding a call.
pub trait BreakerMapping<B>: Send + Sync {
    /// Return the breaker for `call`, creating it if needed.
    fn get(&self, call: &CallParams<'_>) -> ResolveResult<Arc<B>>;
}

/// Registry binding one breaker to each key produced by a [`KeySelector`].
pub struct KeyedBreakerRegistry<K, B> {
    name: String,
    breakers: DashMap<K, Arc<B>>,
    selector: Box<dyn KeySelector<K>>,
    factory: Box<Factory<K, B>>,
    metrics_enabled: bool,
}

impl<K, B> KeyedBreakerRegistry<K, B>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    B: Send + Sync + 'static,
{
    /// Create a registry with the given key selector and breaker factory.
    ///
    /// The factory may be called concurrently, and more than once for the same
    /// key when first lookups race; all but one of those results are dropped.
    pub fn new<S, F, E>(selector: S, factory: F) -> Self
    where
        S: KeySelector<K> + 'static,
        F: Fn(&K) -> Result<B, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self {
            name: DEFAULT_REGISTRY_NAME.to_string(),
            breakers: DashMap::new(),
            selector: Box::new(selector),
            factory: Box::new(move |key: &K| factory(key).map_err(Into::into)),
            metrics_enabled: true,
        }
    }

    /// Set the name used to label this registry's logs and metrics.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Turn this registry's metrics on or off. Other registries are unaffected.
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Registry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve the breaker for a call, creating it on first use.
    pub fn resolve(&self, call: &CallParams<'_>) -> ResolveResult<Arc<B>> {
        let key = match self.selector.select(call) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!(
                    registry = %self.name,
                    call_target = %call.target,
                    operation = %call.operation,
                    error = %e,
                    "Failed to derive circuit breaker key"
                );
                return Err(ResolveError::KeyDerivation(e));
            }
        };
        self.resolve_key(key)
    }

    /// Resolve the breaker for an already-derived key.
    pub fn resolve_key(&self, key: K) -> ResolveResult<Arc<B>> {
        // Fast path: shared shard lock only.
        if let Some(breaker) = self.get(&key) {
            return Ok(breaker);
        }

        let created = match (self.factory)(&key) {
            Ok(breaker) => Arc::new(breaker),
            Err(source) => {
                tracing::warn!(registry = %self.name, key = ?key, error = %source, "Circuit breaker creation failed");
                if self.metrics_enabled {
                    metrics::record_creation_failure(&self.name);
                }
                return Err(ResolveError::BreakerCreation {
                    key: format!("{:?}", key),
                    source,
                });
            }
        };

        // Insert-if-absent under the shard's write lock; the factory already ran.
        let resolved = match self.breakers.entry(key) {
            Entry::Occupied(entry) => {
                tracing::debug!(registry = %self.name, key = ?entry.key(), "Lost breaker creation race, using existing instance");
                if self.metrics_enabled {
                    metrics::record_race_loss(&self.name);
                }
                Arc::clone(entry.get())
            }
            Entry::Vacant(entry) => {
                tracing::debug!(registry = %self.name, key = ?entry.key(), "Created circuit breaker");
                if self.metrics_enabled {
                    metrics::record_breaker_created(&self.name);
                }
                Arc::clone(entry.insert(created).value())
            }
        };

        if self.metrics_enabled {
            metrics::record_registry_size(&self.name, self.breakers.len());
        }
        Ok(resolved)
    }

    /// Return the breaker bound to `key` without creating one.
    pub fn get(&self, key: &K) -> Option<Arc<B>> {
        self.breakers.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether a breaker has been created for `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.breakers.contains_key(key)
    }

    /// Snapshot of the keys with a breaker.
    pub fn keys(&self) -> Vec<K> {
        self.breakers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of breakers created so far.
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl<B> KeyedBreakerRegistry<String, B>
where
    B: Send + Sync + 'static,
{
    /// Build a string-keyed registry from configuration.
    pub fn from_config<F, E>(config: &RegistryConfig, factory: F) -> Self
    where
        F: Fn(&String) -> Result<B, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        tracing::info!(
            registry = %config.name,
            key_selector = %config.key_selector,
            metrics_enabled = config.observability.metrics_enabled,
            "Circuit breaker registry configured"
        );
        Self::new(config.key_selector, factory)
            .with_name(config.name.clone())
            .with_metrics(config.observability.metrics_enabled)
    }
}

impl<K, B> BreakerMapping<B> for KeyedBreakerRegistry<K, B>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    B: Send + Sync + 'static,
{
    fn get(&self, call: &CallParams<'_>) -> ResolveResult<Arc<B>> {
        self.resolve(call)
    }
}

impl<K: Eq + Hash, B> fmt::Debug for KeyedBreakerRegistry<K, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedBreakerRegistry")
            .field("name", &self.name)
            .field("breakers", &self.breakers.len())
            .field("metrics_enabled", &self.metrics_enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use crate::resilience::key_selector::{ByTarget, ByTargetAndOperation, KeyStrategy};
    use crate::resilience::types::{CallOptions, CallTarget, KeyDerivationError};

    #[derive(Debug)]
    struct TestBreaker {
        key: String,
    }

    fn counting_registry(calls: Arc<AtomicUsize>) -> KeyedBreakerRegistry<String, TestBreaker> {
        KeyedBreakerRegistry::new(ByTarget, move |key: &String| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(TestBreaker { key: key.clone() })
        })
    }

    fn resolve_target<B>(registry: &KeyedBreakerRegistry<String, B>, target: &str, operation: &str) -> ResolveResult<Arc<B>>
    where
        B: Send + Sync + 'static,
    {
        let target = CallTarget::parse(target).unwrap();
        let options = CallOptions::default();
        registry.resolve(&CallParams::new(&target, &options, operation, &[]))
    }

    #[test]
    fn test_lazy_creation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(calls.clone());
        assert!(registry.is_empty());

        let breaker = resolve_target(&registry, "http://example.org:8080/", "Ping").unwrap();
        assert_eq!(breaker.key, "example.org:8080");
        assert_eq!(registry.len(), 1);
        assert!(registry.contains_key(&"example.org:8080".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_re_resolution_reuses_breaker() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(calls.clone());

        let first = resolve_target(&registry, "http://example.org:8080/", "Ping").unwrap();
        for _ in 0..10 {
            let again = resolve_target(&registry, "http://example.org:8080/", "Pong").unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_keys_get_distinct_breakers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(calls.clone());

        let a = resolve_target(&registry, "http://example.org/", "Ping").unwrap();
        let b = resolve_target(&registry, "http://example.org:8080/", "Ping").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));

        let mut keys = registry.keys();
        keys.sort();
        assert_eq!(keys, vec!["example.org".to_string(), "example.org:8080".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_factory_failure_is_not_cached() {
        let fail_first = Arc::new(AtomicBool::new(true));
        let flag = fail_first.clone();
        let registry = KeyedBreakerRegistry::new(ByTarget, move |key: &String| {
            if key == "flaky.example" && flag.load(Ordering::SeqCst) {
                return Err("breaker pool exhausted");
            }
            Ok(TestBreaker { key: key.clone() })
        });

        let err = resolve_target(&registry, "http://flaky.example/", "Ping").unwrap_err();
        assert!(matches!(err, ResolveError::BreakerCreation { .. }));
        assert!(err.to_string().contains("breaker pool exhausted"));
        assert!(!registry.contains_key(&"flaky.example".to_string()));

        // Other keys are unaffected.
        let steady = resolve_target(&registry, "http://steady.example/", "Ping").unwrap();
        assert_eq!(steady.key, "steady.example");

        fail_first.store(false, Ordering::SeqCst);
        let recovered = resolve_target(&registry, "http://flaky.example/", "Ping").unwrap();
        let cached = resolve_target(&registry, "http://flaky.example/", "Ping").unwrap();
        assert!(Arc::ptr_eq(&recovered, &cached));
        assert_eq!(registry.len(), 2);
    }

    fn reject_all(_call: &CallParams<'_>) -> Result<String, KeyDerivationError> {
        Err(KeyDerivationError::custom("target is blacklisted"))
    }

    #[test]
    fn test_selector_error_propagates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = KeyedBreakerRegistry::new(reject_all, move |key: &String| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(TestBreaker { key: key.clone() })
        });

        let err = resolve_target(&registry, "http://example.org/", "Ping").unwrap_err();
        match err {
            ResolveError::KeyDerivation(KeyDerivationError::Custom(inner)) => {
                assert_eq!(inner.to_string(), "target is blacklisted");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(registry.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_host_propagates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(calls.clone());

        let err = resolve_target(&registry, "unix:/run/app.sock", "Ping").unwrap_err();
        assert!(matches!(
            err,
            ResolveError::KeyDerivation(KeyDerivationError::MissingHost { .. })
        ));
        assert!(registry.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_mapping_trait() {
        let registry = KeyedBreakerRegistry::new(ByTargetAndOperation, |key: &String| {
            Ok::<_, BoxError>(TestBreaker { key: key.clone() })
        })
        .with_name("thrift-client");
        let mapping: &dyn BreakerMapping<TestBreaker> = &registry;

        let target = CallTarget::parse("http://example.org:8080/").unwrap();
        let options = CallOptions::default();
        let breaker = mapping.get(&CallParams::new(&target, &options, "Ping", &[])).unwrap();
        assert_eq!(breaker.key, "example.org:8080#Ping");
        assert_eq!(registry.name(), "thrift-client");
    }

    #[test]
    fn test_from_config() {
        let mut config = RegistryConfig::default();
        config.name = "rpc".to_string();
        config.key_selector = KeyStrategy::Operation;

        let registry = KeyedBreakerRegistry::from_config(&config, |key: &String| {
            Ok::<_, BoxError>(TestBreaker { key: key.clone() })
        });
        assert_eq!(registry.name(), "rpc");

        let a = resolve_target(&registry, "http://a.example/", "Ping").unwrap();
        let b = resolve_target(&registry, "http://b.example:9000/", "Ping").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.key, "Ping");
    }

    /// Counts events at WARN or above, and all events.
    struct LevelCounter {
        warnings: Arc<AtomicUsize>,
        events: Arc<AtomicUsize>,
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for LevelCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _: tracing_subscriber::layer::Context<'_, S>) {
            self.events.fetch_add(1, Ordering::SeqCst);
            if *event.metadata().level() <= tracing::Level::WARN {
                self.warnings.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_key_derivation_failure_is_not_a_warning() {
        use tracing_subscriber::layer::SubscriberExt;

        let warnings = Arc::new(AtomicUsize::new(0));
        let events = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(LevelCounter {
            warnings: warnings.clone(),
            events: events.clone(),
        });

        let registry = counting_registry(Arc::new(AtomicUsize::new(0)));
        tracing::subscriber::with_default(subscriber, || {
            for _ in 0..3 {
                assert!(resolve_target(&registry, "unix:/run/app.sock", "Ping").is_err());
            }
        });

        assert_eq!(warnings.load(Ordering::SeqCst), 0);
        assert_eq!(events.load(Ordering::SeqCst), 3);
    }

    /// Records counter values by (metric name, `registry` label).
    #[derive(Default)]
    struct CountingRecorder {
        counters: std::sync::Mutex<std::collections::HashMap<(String, String), Arc<AtomicU64>>>,
    }

    impl CountingRecorder {
        fn counter(&self, name: &str, registry: &str) -> u64 {
            self.counters
                .lock()
                .unwrap()
                .get(&(name.to_string(), registry.to_string()))
                .map(|c| c.load(Ordering::SeqCst))
                .unwrap_or(0)
        }
    }

    impl ::metrics::Recorder for CountingRecorder {
        fn describe_counter(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}
        fn describe_gauge(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}
        fn describe_histogram(&self, _: ::metrics::KeyName, _: Option<::metrics::Unit>, _: ::metrics::SharedString) {}

        fn register_counter(&self, key: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Counter {
            let registry = key
                .labels()
                .find(|label| label.key() == "registry")
                .map(|label| label.value().to_string())
                .unwrap_or_default();
            let counter = self
                .counters
                .lock()
                .unwrap()
                .entry((key.name().to_string(), registry))
                .or_default()
                .clone();
            ::metrics::Counter::from_arc(counter)
        }

        fn register_gauge(&self, _: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Gauge {
            ::metrics::Gauge::noop()
        }

        fn register_histogram(&self, _: &::metrics::Key, _: &::metrics::Metadata<'_>) -> ::metrics::Histogram {
            ::metrics::Histogram::noop()
        }
    }

    #[test]
    fn test_metrics_flag_is_per_registry() {
        let recorder = CountingRecorder::default();

        let mut metered_config = RegistryConfig::default();
        metered_config.name = "metered".to_string();
        let mut quiet_config = RegistryConfig::default();
        quiet_config.name = "quiet".to_string();
        quiet_config.observability.metrics_enabled = false;

        ::metrics::with_local_recorder(&recorder, || {
            let metered = KeyedBreakerRegistry::from_config(&metered_config, |key: &String| {
                if key == "broken.example" {
                    return Err("no breaker for you");
                }
                Ok(TestBreaker { key: key.clone() })
            });
            // Built second, and must leave the first registry's metrics on.
            let quiet = KeyedBreakerRegistry::from_config(&quiet_config, |key: &String| {
                Ok::<_, BoxError>(TestBreaker { key: key.clone() })
            });

            resolve_target(&metered, "http://a.example/", "Ping").unwrap();
            resolve_target(&metered, "http://b.example/", "Ping").unwrap();
            resolve_target(&metered, "http://a.example/", "Ping").unwrap();
            assert!(resolve_target(&metered, "http://broken.example/", "Ping").is_err());

            resolve_target(&quiet, "http://a.example/", "Ping").unwrap();
            resolve_target(&quiet, "http://c.example/", "Ping").unwrap();
        });

        assert_eq!(recorder.counter("breaker_registry_breakers_created_total", "metered"), 2);
        assert_eq!(recorder.counter("breaker_registry_creation_failures_total", "metered"), 1);
        assert_eq!(recorder.counter("breaker_registry_breakers_created_total", "quiet"), 0);
    }

    #[test]
    fn test_resolve_key_and_peek() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(calls.clone());
        let key = "cache.internal:6379".to_string();

        assert!(registry.get(&key).is_none());
        let created = registry.resolve_key(key.clone()).unwrap();
        let peeked = registry.get(&key).unwrap();
        assert!(Arc::ptr_eq(&created, &peeked));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
