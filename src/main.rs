//! Breaker registry demo.
//!
//! Resolves the circuit breaker each target would be guarded by, from many
//! concurrent tasks at once, and prints which breaker every target landed on.
//!
//! ```text
//! breaker-registry --selector target_and_operation -o Ping \
//!     http://example.org/ http://example.org:8080/
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use clap::Parser;

use breaker_registry::config::{load_config, RegistryConfig};
use breaker_registry::observability::logging::init_logging;
use breaker_registry::resilience::{BoxError, CallOptions, CallParams, CallTarget, KeyStrategy, KeyedBreakerRegistry};

static NEXT_BREAKER_ID: AtomicU64 = AtomicU64::new(1);

/// Stand-in breaker that only remembers its key and creation order.
#[derive(Debug)]
struct DemoBreaker {
    id: u64,
    key: String,
}

impl DemoBreaker {
    fn new(key: &str) -> Self {
        Self {
            id: NEXT_BREAKER_ID.fetch_add(1, Ordering::Relaxed),
            key: key.to_string(),
        }
    }
}

#[derive(Parser)]
#[command(name = "breaker-registry")]
#[command(about = "Show which circuit breaker guards each call target", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured key selector (operation, target, target_and_operation).
    #[arg(short, long)]
    selector: Option<KeyStrategy>,

    /// Operation invoked on every target.
    #[arg(short, long, default_value = "Ping")]
    operation: String,

    /// Concurrent resolutions per target.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Call targets, e.g. http://example.org:8080/
    #[arg(required = true)]
    targets: Vec<CallTarget>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RegistryConfig::default(),
    };
    if let Some(selector) = cli.selector {
        config.key_selector = selector;
    }

    init_logging(&config.observability.log_level);
    tracing::info!("breaker-registry v{} starting", env!("CARGO_PKG_VERSION"));

    let registry = Arc::new(KeyedBreakerRegistry::from_config(&config, |key: &String| {
        Ok::<_, BoxError>(DemoBreaker::new(key))
    }));

    let mut handles = Vec::new();
    for target in &cli.targets {
        for _ in 0..cli.concurrency.max(1) {
            let registry = Arc::clone(&registry);
            let target = target.clone();
            let operation = cli.operation.clone();
            handles.push(tokio::spawn(async move {
                let options = CallOptions::default();
                let result = registry.resolve(&CallParams::new(&target, &options, &operation, &[]));
                (target, result)
            }));
        }
    }

    // target -> (key, breaker id, resolutions)
    let mut resolved: BTreeMap<String, (String, u64, usize)> = BTreeMap::new();
    let mut failures: BTreeMap<String, String> = BTreeMap::new();
    for handle in handles {
        let (target, result) = handle.await?;
        match result {
            Ok(breaker) => {
                let entry = resolved
                    .entry(target.to_string())
                    .or_insert_with(|| (breaker.key.clone(), breaker.id, 0));
                if entry.1 != breaker.id {
                    tracing::error!(target_url = %target, first = entry.1, other = breaker.id, "Target resolved to two breakers");
                }
                entry.2 += 1;
            }
            Err(e) => {
                failures.insert(target.to_string(), e.to_string());
            }
        }
    }

    for (target, (key, id, count)) in &resolved {
        println!("{} -> {} -> breaker #{} ({} resolutions)", target, key, id, count);
    }
    for (target, error) in &failures {
        eprintln!("{} -> error: {}", target, error);
    }

    tracing::info!(
        registry = %registry.name(),
        breakers = registry.len(),
        breakers_created = NEXT_BREAKER_ID.load(Ordering::Relaxed) - 1,
        "Resolution complete"
    );

    ensure_resolved(&failures)
}

/// Fail the run when any target could not be resolved.
fn ensure_resolved(failures: &BTreeMap<String, String>) -> Result<(), Box<dyn std::error::Error>> {
    if failures.is_empty() {
        return Ok(());
    }
    Err(format!("{} target(s) failed to resolve", failures.len()).into())
}
