//! Tunnel lifecycle wiring
//!
//! Bridges tunnel-control events (a client's tunnel coming up or going
//! away) onto the gateway's routing table, resolving each owner's
//! configured bandwidth cap on the way in.

pub mod bridge;
pub mod resolver;

pub use bridge::LifecycleBridge;
pub use resolver::{RateLimitResolver, ResolveError};
