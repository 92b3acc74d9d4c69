//! Host-based routing table for the relay data plane
//!
//! Maps public hostnames to per-tunnel routing state. Reads happen on every
//! inbound request; writes only on tunnel lifecycle events, so the table is
//! built for heavy read concurrency with rare writers.

pub mod host;
pub mod registry;

pub use host::normalize_host;
pub use registry::RoutingTable;
