//! Forwarding entries and the live tunnel routing surface

use crate::forwarder::HttpForwarder;
use chrono::{DateTime, Utc};
use hostlink_router::{normalize_host, RoutingTable};
use std::sync::Arc;
use tracing::debug;

/// Routing state for one live tunnel.
///
/// Fully constructed, forwarder and throttle configuration included,
/// before it becomes visible to any request, and never mutated afterward.
/// Entries live exactly as long as their tunnel; a reconnect replaces the
/// entry wholesale.
pub struct ForwardingEntry {
    host: String,
    forward_addr: String,
    rate_limit_kbps: u32,
    registered_at: DateTime<Utc>,
    forwarder: HttpForwarder,
}

impl ForwardingEntry {
    fn new(host: String, forward_addr: String, rate_limit_kbps: u32) -> Self {
        let forwarder = HttpForwarder::new(forward_addr.clone(), rate_limit_kbps);
        Self {
            host,
            forward_addr,
            rate_limit_kbps,
            registered_at: Utc::now(),
            forwarder,
        }
    }

    /// Public hostname this entry serves, normalized.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Private address traffic is relayed to.
    pub fn forward_addr(&self) -> &str {
        &self.forward_addr
    }

    /// Bandwidth cap in KB/s; 0 means unlimited.
    pub fn rate_limit_kbps(&self) -> u32 {
        self.rate_limit_kbps
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    pub fn forwarder(&self) -> &HttpForwarder {
        &self.forwarder
    }
}

/// The host → tunnel routing surface: consulted on every inbound request,
/// written only by tunnel lifecycle events.
pub struct GatewayRoutes {
    table: RoutingTable<ForwardingEntry>,
}

impl GatewayRoutes {
    pub fn new() -> Self {
        Self {
            table: RoutingTable::new(),
        }
    }

    /// Install or replace the route for `host`.
    ///
    /// The entry, including its forwarder, is built before it is
    /// published, so concurrent lookups see either the prior entry or the
    /// complete new one. Requests already past their lookup finish under
    /// the configuration they captured.
    pub fn upsert(&self, host: &str, forward_addr: &str, rate_limit_kbps: u32) {
        let entry = ForwardingEntry::new(
            normalize_host(host),
            forward_addr.to_string(),
            rate_limit_kbps,
        );
        match self.table.upsert(host, entry) {
            Some(prior) => debug!(
                host,
                forward_addr,
                rate_limit_kbps,
                prior_addr = %prior.forward_addr(),
                prior_age_secs = (Utc::now() - prior.registered_at()).num_seconds(),
                "replaced tunnel route"
            ),
            None => debug!(host, forward_addr, rate_limit_kbps, "registered tunnel route"),
        }
    }

    /// Current entry for `host`, if a tunnel is up.
    pub fn lookup(&self, host: &str) -> Option<Arc<ForwardingEntry>> {
        self.table.lookup(host)
    }

    /// Drop the route for `host`. Idempotent.
    pub fn remove(&self, host: &str) {
        if self.table.remove(host).is_some() {
            debug!(host, "removed tunnel route");
        }
    }

    pub fn contains(&self, host: &str) -> bool {
        self.table.contains(host)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// All hostnames with a live tunnel.
    pub fn hosts(&self) -> Vec<String> {
        self.table.hosts()
    }
}

impl Default for GatewayRoutes {
    fn default() -> Self {
        Self::new()
    }
}
