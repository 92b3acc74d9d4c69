//! Per-connection bandwidth throttling
//!
//! A token-bucket budget metering both directions of a forwarded
//! connection. Each outbound connection gets its own bucket; unrelated
//! tunnels never contend on shared throttle state.

pub mod bucket;
pub mod stream;

pub use bucket::TokenBucket;
pub use stream::ThrottledStream;
