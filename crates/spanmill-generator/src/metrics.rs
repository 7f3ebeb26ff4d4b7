//! Per-tenant collector registration with rollback.
//!
//! Creating a tenant's WAL twice after a half-failed construction must not
//! blow up on duplicate metric registration. Collectors are therefore built
//! detached (a temporary, isolated namespace) and merged into the shared
//! registry only once the whole instance construction succeeded; a partial
//! merge rolls itself back.

use prometheus::{IntCounter, Opts, Registry};

/// Per-tenant collectors, detached until [`InstanceMetrics::register_into`].
pub struct InstanceMetrics {
    pub spans_received: IntCounter,
    pub samples_appended: IntCounter,
}

impl InstanceMetrics {
    /// Build the collectors for a tenant. Nothing is registered yet.
    pub fn new(tenant: &str) -> prometheus::Result<Self> {
        let spans_received = IntCounter::with_opts(
            Opts::new(
                "spanmill_tenant_spans_received_total",
                "Total spans received by this tenant's metrics path",
            )
            .const_label("tenant", tenant),
        )?;
        let samples_appended = IntCounter::with_opts(
            Opts::new(
                "spanmill_tenant_samples_appended_total",
                "Total derived samples appended to this tenant's storage",
            )
            .const_label("tenant", tenant),
        )?;

        Ok(Self {
            spans_received,
            samples_appended,
        })
    }

    /// Merge into the shared registry. All-or-nothing: a failure rolls back
    /// whatever was already registered and returns the error.
    pub fn register_into(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.spans_received.clone()))?;
        if let Err(e) = registry.register(Box::new(self.samples_appended.clone())) {
            let _ = registry.unregister(Box::new(self.spans_received.clone()));
            return Err(e);
        }
        Ok(())
    }

    /// Remove this tenant's collectors from the shared registry.
    pub fn unregister_from(&self, registry: &Registry) {
        let _ = registry.unregister(Box::new(self.spans_received.clone()));
        let _ = registry.unregister(Box::new(self.samples_appended.clone()));
    }
}
