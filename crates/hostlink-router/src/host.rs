//! Hostname normalization for routing keys

/// Normalize a host value for use as a routing key.
///
/// Strips an optional `:port` suffix (bracketed IPv6 literals included) and
/// lowercases, so `Example.Com:8080` and `example.com` land on the same
/// entry. Applied to every key entering or querying the table.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let bare = if let Some(rest) = host.strip_prefix('[') {
        // IPv6 literal, e.g. "[::1]:8080"
        match rest.split_once(']') {
            Some((addr, _port)) => addr,
            None => rest,
        }
    } else {
        host.split(':').next().unwrap_or(host)
    };
    bare.to_ascii_lowercase()
}
