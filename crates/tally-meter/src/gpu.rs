//! GPU model resolution
//!
//! Node → GPU product cache. A miss refreshes the whole map from the
//! inventory; there is no time-based expiry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tally_common::{ClassificationError, GpuInventory, Result};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::retry::RetryPolicy;

/// Miss-refreshed node → GPU product cache
pub struct GpuResolver {
    inventory: Arc<dyn GpuInventory>,
    retry: RetryPolicy,
    models: RwLock<Arc<HashMap<String, String>>>,
    /// Serializes refreshes
    refresh_lock: Mutex<()>,
    /// Bumped on every successful refresh
    generation: AtomicU64,
}

impl GpuResolver {
    /// Resolver with an empty cache
    pub fn new(inventory: Arc<dyn GpuInventory>, retry: RetryPolicy) -> Self {
        Self {
            inventory,
            retry,
            models: RwLock::new(Arc::new(HashMap::new())),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Resolver with the cache filled up front
    pub async fn preload(inventory: Arc<dyn GpuInventory>, retry: RetryPolicy) -> Result<Self> {
        let resolver = Self::new(inventory, retry);
        resolver.refresh().await?;
        info!(nodes = resolver.len(), "GPU model cache loaded");
        Ok(resolver)
    }

    /// Cached product for a node
    pub fn cached(&self, node: &str) -> Option<String> {
        self.models.read().get(node).cloned()
    }

    fn len(&self) -> usize {
        self.models.read().len()
    }

    /// Reload the whole map and swap it in
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<()> {
        let models = self
            .retry
            .run("gpu inventory", || self.inventory.node_gpu_models())
            .await?;
        *self.models.write() = Arc::new(models);
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Product of the GPUs on `node`, refreshing once on a miss
    pub async fn resolve(&self, node: &str) -> Result<String> {
        if let Some(product) = self.cached(node) {
            return Ok(product);
        }

        let seen = self.generation.load(Ordering::SeqCst);
        let _guard = self.refresh_lock.lock().await;
        // a concurrent miss may have refreshed while we waited
        if self.generation.load(Ordering::SeqCst) == seen {
            warn!(node, "GPU model cache miss, refreshing");
            self.refresh().await?;
        }

        self.cached(node).ok_or_else(|| {
            ClassificationError::GpuModelNotFound {
                node: node.to_string(),
            }
            .into()
        })
    }
}
