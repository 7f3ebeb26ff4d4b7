//! Storage-level Prometheus metrics.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts, Registry};

lazy_static! {
    /// Failed attempts to update the remote-forward configuration
    pub static ref FORWARD_CONFIG_UPDATE_FAILED: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "spanmill_storage_forward_config_update_failed_total",
            "Total number of times updating the remote-forward configuration failed"
        ),
        &["tenant"]
    )
    .expect("metric can be created");

    /// Samples dropped because the forward queue was full or closed
    pub static ref FORWARD_DROPPED_SAMPLES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "spanmill_storage_forward_dropped_samples_total",
            "Total number of samples dropped before reaching the remote sink"
        ),
        &["tenant"]
    )
    .expect("metric can be created");

    /// Batches abandoned after exhausting forward retries
    pub static ref FORWARD_FAILED_BATCHES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "spanmill_storage_forward_failed_batches_total",
            "Total number of batches the remote sink rejected after all retries"
        ),
        &["tenant"]
    )
    .expect("metric can be created");
}

/// Register the storage metrics with a Prometheus registry.
pub fn register_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(FORWARD_CONFIG_UPDATE_FAILED.clone()))?;
    registry.register(Box::new(FORWARD_DROPPED_SAMPLES.clone()))?;
    registry.register(Box::new(FORWARD_FAILED_BATCHES.clone()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        let registry = Registry::new();
        register_metrics(&registry).unwrap();

        FORWARD_CONFIG_UPDATE_FAILED
            .with_label_values(&["register-test"])
            .inc();
        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "spanmill_storage_forward_config_update_failed_total"));
    }
}
