//! Adapter instances cached by `(provider, model)`.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::LlmAdapter;
use crate::cache::TtlLruCache;
use crate::error::AppResult;

/// Builds adapters on cache misses.
pub trait AdapterFactory: Send + Sync {
    /// Build an adapter for the given provider and model.
    fn create(&self, provider: &str, model: &str) -> AppResult<Arc<dyn LlmAdapter>>;
}

type AdapterCache = TtlLruCache<(String, String), Arc<dyn LlmAdapter>>;

/// Registry handing out shared adapter instances.
pub struct AdapterRegistry {
    factory: Arc<dyn AdapterFactory>,
    cache: Arc<AdapterCache>,
}

impl AdapterRegistry {
    /// Create a registry with an injected cache.
    pub fn new(factory: Arc<dyn AdapterFactory>, cache: Arc<AdapterCache>) -> Self {
        Self { factory, cache }
    }

    /// Create a registry with a fresh cache.
    pub fn with_capacity(factory: Arc<dyn AdapterFactory>, capacity: usize, ttl: Duration) -> Self {
        Self::new(factory, Arc::new(TtlLruCache::new(capacity, ttl)))
    }

    /// Cached adapter for `(provider, model)`, built on first use.
    pub fn get(&self, provider: &str, model: &str) -> AppResult<Arc<dyn LlmAdapter>> {
        let key = (provider.to_string(), model.to_string());
        if let Some(adapter) = self.cache.get(&key) {
            return Ok(adapter);
        }
        debug!(provider = %provider, model = %model, "Creating adapter");
        let adapter = self.factory.create(provider, model)?;
        self.cache.insert(key, Arc::clone(&adapter));
        Ok(adapter)
    }

    /// Number of cached adapters.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Drop every cached adapter.
    pub fn reset(&self) {
        self.cache.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockLlmAdapter;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFactory {
        built: AtomicUsize,
    }

    impl AdapterFactory for CountingFactory {
        fn create(&self, provider: &str, _model: &str) -> AppResult<Arc<dyn LlmAdapter>> {
            if provider == "broken" {
                return Err(AppError::Config {
                    message: "unknown provider".to_string(),
                });
            }
            self.built.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockLlmAdapter::new()))
        }
    }

    fn registry() -> (Arc<CountingFactory>, AdapterRegistry) {
        let factory = Arc::new(CountingFactory {
            built: AtomicUsize::new(0),
        });
        let registry = AdapterRegistry::with_capacity(factory.clone(), 4, Duration::from_secs(60));
        (factory, registry)
    }

    #[test]
    fn test_same_key_reuses_instance() {
        let (factory, registry) = registry();
        let a = registry.get("langbase", "m1").unwrap();
        let b = registry.get("langbase", "m1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.built.load(Ordering::SeqCst), 1);

        registry.get("langbase", "m2").unwrap();
        assert_eq!(factory.built.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_reset_rebuilds() {
        let (factory, registry) = registry();
        registry.get("langbase", "m1").unwrap();
        registry.reset();
        assert!(registry.is_empty());
        registry.get("langbase", "m1").unwrap();
        assert_eq!(factory.built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_factory_error_not_cached() {
        let (_, registry) = registry();
        assert!(registry.get("broken", "m1").is_err());
        assert!(registry.is_empty());
    }
}
