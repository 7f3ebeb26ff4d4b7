//! Per-tenant dynamic configuration.
//!
//! Overrides are supplied by an external provider and consulted per call;
//! the override watcher polls them to pick up changes at runtime.

use std::collections::BTreeMap;
use std::sync::RwLock;

/// Per-tenant dynamic configuration provider.
pub trait Overrides: Send + Sync {
    /// Extra headers attached to forwarded batches for this tenant.
    fn remote_write_headers(&self, tenant: &str) -> BTreeMap<String, String>;

    /// Whether to forward native histograms for this tenant.
    fn native_histograms(&self, tenant: &str) -> bool;
}

/// Overrides backed by in-process values, mutable at runtime.
///
/// Serves as the provider for deployments without an external override
/// source, and lets tests flip values between watcher polls.
#[derive(Debug, Default)]
pub struct StaticOverrides {
    headers: RwLock<BTreeMap<String, String>>,
    native_histograms: RwLock<bool>,
}

impl StaticOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_headers(&self, headers: BTreeMap<String, String>) {
        *self.headers.write().expect("overrides lock poisoned") = headers;
    }

    pub fn set_native_histograms(&self, enabled: bool) {
        *self
            .native_histograms
            .write()
            .expect("overrides lock poisoned") = enabled;
    }
}

impl Overrides for StaticOverrides {
    fn remote_write_headers(&self, _tenant: &str) -> BTreeMap<String, String> {
        self.headers.read().expect("overrides lock poisoned").clone()
    }

    fn native_histograms(&self, _tenant: &str) -> bool {
        *self
            .native_histograms
            .read()
            .expect("overrides lock poisoned")
    }
}
