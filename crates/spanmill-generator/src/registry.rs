//! Tenant registry - race-free get-or-create.
//!
//! Double-checked creation under a reader/writer lock: a read-lock fast path
//! for the common case, then a write lock with a re-check so that two
//! concurrent first pushes construct exactly one instance. Construction
//! failures leave the map unchanged, so the next push retries cleanly.

use crate::error::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct TenantRegistry<T> {
    instances: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> TenantRegistry<T> {
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, tenant: &str) -> Option<Arc<T>> {
        self.instances.read().await.get(tenant).cloned()
    }

    /// Return the tenant's instance, constructing it if absent.
    ///
    /// `create` runs under the write lock; a second caller blocked on the
    /// lock finds the instance on its re-check instead of constructing a
    /// duplicate.
    pub async fn get_or_create<F, Fut>(&self, tenant: &str, create: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>>>,
    {
        if let Some(instance) = self.get(tenant).await {
            return Ok(instance);
        }

        let mut instances = self.instances.write().await;
        if let Some(instance) = instances.get(tenant) {
            return Ok(Arc::clone(instance));
        }

        let instance = create().await?;
        instances.insert(tenant.to_string(), Arc::clone(&instance));
        Ok(instance)
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }

    /// Remove and return every instance, for shutdown.
    pub async fn drain(&self) -> Vec<Arc<T>> {
        let mut instances = self.instances.write().await;
        instances.drain().map(|(_, instance)| instance).collect()
    }
}

impl<T> Default for TenantRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
