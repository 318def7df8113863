//! Bounded cache of live provider instances, keyed by provider-config id.
//!
//! Eviction is FIFO on insertion order, not LRU: the cache holds a
//! handful of long-lived connections and eviction is rare, so insertion
//! order is a good-enough proxy for staleness.

use crate::model::ModelId;
use crate::providers::ModelProvider;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::debug;

pub const DEFAULT_PROVIDER_CACHE_SIZE: usize = 10;

struct CacheInner {
    map: HashMap<ModelId, Arc<dyn ModelProvider>>,
    order: VecDeque<ModelId>,
}

pub struct ProviderCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl ProviderCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get(&self, id: ModelId) -> Option<Arc<dyn ModelProvider>> {
        self.inner
            .lock()
            .expect("provider cache poisoned")
            .map
            .get(&id)
            .cloned()
    }

    /// Insert, evicting the oldest entry first when at capacity.
    /// Re-inserting an existing id replaces the instance in place.
    pub fn insert(&self, id: ModelId, provider: Arc<dyn ModelProvider>) {
        let mut inner = self.inner.lock().expect("provider cache poisoned");
        if inner.map.contains_key(&id) {
            inner.map.insert(id, provider);
            return;
        }
        if inner.map.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
                debug!(evicted = oldest, "provider cache at capacity, evicted oldest");
            }
        }
        inner.order.push_back(id);
        inner.map.insert(id, provider);
    }

    pub fn remove(&self, id: ModelId) {
        let mut inner = self.inner.lock().expect("provider cache poisoned");
        inner.map.remove(&id);
        inner.order.retain(|cached| *cached != id);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("provider cache poisoned");
        inner.map.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("provider cache poisoned").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProviderCache {
    fn default() -> Self {
        Self::new(DEFAULT_PROVIDER_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::providers::{
        BatchPrediction, BatchPredictRequest, ConnectionCheck, ModelInfo, PredictRequest,
        Prediction, TrainingSpec,
    };
    use async_trait::async_trait;

    struct DummyProvider;

    #[async_trait]
    impl ModelProvider for DummyProvider {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }
        async fn test_connection(&self) -> ConnectionCheck {
            ConnectionCheck {
                ok: true,
                latency_ms: 0,
                message: None,
            }
        }
        async fn create_model(&self, _spec: &TrainingSpec) -> Result<ModelInfo> {
            unimplemented!()
        }
        async fn model_info(&self, _name: &str) -> Result<ModelInfo> {
            unimplemented!()
        }
        async fn predict(&self, _request: &PredictRequest) -> Result<Prediction> {
            unimplemented!()
        }
        async fn batch_predict(&self, _request: &BatchPredictRequest) -> Result<BatchPrediction> {
            unimplemented!()
        }
        async fn delete_model(&self, _name: &str) -> Result<()> {
            unimplemented!()
        }
        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            unimplemented!()
        }
    }

    #[test]
    fn fifo_eviction_drops_the_first_inserted() {
        let cache = ProviderCache::new(2);
        cache.insert(1, Arc::new(DummyProvider));
        cache.insert(2, Arc::new(DummyProvider));
        // touch 1 so LRU would keep it; FIFO must still evict it
        assert!(cache.get(1).is_some());
        cache.insert(3, Arc::new(DummyProvider));
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
        assert!(cache.get(3).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reinsert_replaces_without_eviction() {
        let cache = ProviderCache::new(2);
        cache.insert(1, Arc::new(DummyProvider));
        cache.insert(2, Arc::new(DummyProvider));
        cache.insert(1, Arc::new(DummyProvider));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(2).is_some());
    }

    #[test]
    fn remove_and_clear() {
        let cache = ProviderCache::new(4);
        cache.insert(1, Arc::new(DummyProvider));
        cache.insert(2, Arc::new(DummyProvider));
        cache.remove(1);
        assert!(cache.get(1).is_none());
        cache.clear();
        assert!(cache.is_empty());
    }
}
