//! Public HTTP entry point for a tunnel relay
//!
//! Dispatches every inbound request by its `Host` header to the matching
//! tunnel's private forward address, throttled to the tunnel's bandwidth
//! cap. Routing state is written by tunnel lifecycle events and read on
//! every request.

pub mod forwarder;
pub mod routes;
pub mod server;

pub use forwarder::{ForwardError, HttpForwarder};
pub use routes::{ForwardingEntry, GatewayRoutes};
pub use server::{BoundGateway, Gateway, GatewayConfig, GatewayError};
