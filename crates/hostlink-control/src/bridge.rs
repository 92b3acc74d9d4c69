//! Applies tunnel lifecycle events to the routing table

use crate::resolver::RateLimitResolver;
use hostlink_gateway::GatewayRoutes;
use std::sync::Arc;
use tracing::{debug, error};

/// Glue between the tunnel-control listener and the routing table.
///
/// The control side invokes `on_tunnel_up` / `on_tunnel_down` as clients
/// connect and disconnect. Both are safe to invoke concurrently for
/// different hosts, and concurrently with request-path lookups for the
/// same host.
pub struct LifecycleBridge {
    routes: Arc<GatewayRoutes>,
    resolver: Arc<dyn RateLimitResolver>,
}

impl LifecycleBridge {
    pub fn new(routes: Arc<GatewayRoutes>, resolver: Arc<dyn RateLimitResolver>) -> Self {
        Self { routes, resolver }
    }

    /// Register `host` → `forward_addr` for a tunnel owned by `owner_id`.
    ///
    /// The owner's bandwidth cap is resolved first so the entry is
    /// complete before it becomes routable. If the lookup fails the tunnel
    /// still comes up, unlimited: a storage outage degrades enforcement,
    /// not availability.
    pub async fn on_tunnel_up(&self, owner_id: i64, host: &str, forward_addr: &str) {
        let rate_limit_kbps = match self.resolver.resolve_rate_limit(owner_id).await {
            Ok(kbps) => kbps,
            Err(err) => {
                error!(
                    owner_id,
                    host, "rate limit lookup failed, tunnel comes up unlimited: {err}"
                );
                0
            }
        };

        debug!(owner_id, host, forward_addr, rate_limit_kbps, "tunnel up");
        self.routes.upsert(host, forward_addr, rate_limit_kbps);
    }

    /// Drop the route for `host`. Idempotent; a tunnel that was never
    /// registered (or already went down) is a no-op.
    pub fn on_tunnel_down(&self, host: &str) {
        debug!(host, "tunnel down");
        self.routes.remove(host);
    }
}
