//! Metrics for resolution, discovery and peer connections.

use iroh_metrics::{Counter, MetricsGroup};

/// Metrics of an [`Sdk`](crate::Sdk).
#[derive(Debug, Default, MetricsGroup)]
#[metrics(name = "hyper_sdk")]
#[non_exhaustive]
pub struct Metrics {
    /// Identifiers resolved to a key.
    pub resolve_key: Counter,
    /// Identifiers resolved to a name.
    pub resolve_name: Counter,
    /// `hyper://` URLs resolved.
    pub resolve_url: Counter,
    /// DNS-link lookups started.
    pub dnslink_lookups: Counter,
    /// DNS-link lookups that failed or found no record.
    pub dnslink_failures: Counter,
    /// Discovery topics joined.
    pub topics_joined: Counter,
    /// Discovery topics left.
    pub topics_left: Counter,
    /// Discovery sessions attached to a handle on open.
    pub auto_joins: Counter,
    /// Opens that waited for the first discovery flush.
    pub flush_waits: Counter,
    /// Peer connections reported by the network.
    pub peers_added: Counter,
    /// Peer connections closed.
    pub peers_removed: Counter,
}
