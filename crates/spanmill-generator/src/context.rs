//! Per-request metric-generation suppression.
//!
//! Clients that already had span-derived metrics generated elsewhere mark
//! their requests with a `no-generate-metrics` key. The key may arrive as
//! RPC metadata or as an HTTP header; presence in either suppresses metric
//! generation for that request before it reaches the push path.

use http::HeaderMap;
use tonic::metadata::MetadataMap;

/// Key signalling that no span-derived metrics should be generated for the
/// spans in a request. The same name is used in RPC metadata and HTTP
/// headers.
pub const NO_GENERATE_METRICS_KEY: &str = "no-generate-metrics";

/// True when the RPC metadata carries the suppression key.
pub fn rpc_no_generate_metrics(metadata: &MetadataMap) -> bool {
    metadata.get(NO_GENERATE_METRICS_KEY).is_some()
}

/// True when the HTTP headers carry the suppression key.
pub fn http_no_generate_metrics(headers: &HeaderMap) -> bool {
    headers.contains_key(NO_GENERATE_METRICS_KEY)
}

/// Check both transport contexts; either suffices.
pub fn no_generate_metrics(rpc: Option<&MetadataMap>, http: Option<&HeaderMap>) -> bool {
    rpc.map(rpc_no_generate_metrics).unwrap_or(false)
        || http.map(http_no_generate_metrics).unwrap_or(false)
}
