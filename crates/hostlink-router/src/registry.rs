//! Concurrent host → value routing table
//!
//! Backed by a sharded concurrent map so lookups never block unrelated
//! writers and a write for one host can never tear a concurrent read.
//! Values are handed out as `Arc` clones: a request that resolved its entry
//! keeps a consistent snapshot for its whole lifetime, even if the entry is
//! replaced or removed underneath it.

use crate::host::normalize_host;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

/// Concurrent map from normalized hostname to routing state.
///
/// The table owns all entries; callers only ever hold `Arc` snapshots.
pub struct RoutingTable<T> {
    routes: DashMap<String, Arc<T>>,
}

impl<T> RoutingTable<T> {
    pub fn new() -> Self {
        Self {
            routes: DashMap::new(),
        }
    }

    /// Look up the current entry for `host`.
    ///
    /// Non-blocking with respect to other readers. Returns `None` when the
    /// host has no live tunnel.
    pub fn lookup(&self, host: &str) -> Option<Arc<T>> {
        let key = normalize_host(host);
        let found = self.routes.get(&key).map(|entry| entry.value().clone());
        trace!(host = %key, found = found.is_some(), "route lookup");
        found
    }

    /// Install `value` as the current entry for `host`, replacing any prior
    /// entry atomically.
    ///
    /// The value must be fully constructed before insertion; concurrent
    /// readers observe either the prior entry or the complete new one,
    /// never a mixture. Returns the replaced entry, if any. Requests still
    /// holding the prior `Arc` finish under the old configuration.
    pub fn upsert(&self, host: &str, value: T) -> Option<Arc<T>> {
        self.routes.insert(normalize_host(host), Arc::new(value))
    }

    /// Remove the entry for `host`, if present.
    ///
    /// Idempotent: removing an absent host is a no-op returning `None`.
    pub fn remove(&self, host: &str) -> Option<Arc<T>> {
        self.routes.remove(&normalize_host(host)).map(|(_, value)| value)
    }

    /// Whether `host` currently has an entry.
    pub fn contains(&self, host: &str) -> bool {
        self.routes.contains_key(&normalize_host(host))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// All registered hostnames, in no particular order.
    pub fn hosts(&self) -> Vec<String> {
        self.routes.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.routes.clear();
    }
}

impl<T> Default for RoutingTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Target {
        addr: &'static str,
        limit: u32,
    }

    #[test]
    fn test_upsert_lookup_roundtrip() {
        let table = RoutingTable::new();
        table.upsert(
            "a.example.com",
            Target {
                addr: "127.0.0.1:9001",
                limit: 0,
            },
        );

        let entry = table.lookup("a.example.com").unwrap();
        assert_eq!(entry.addr, "127.0.0.1:9001");
        assert_eq!(entry.limit, 0);
    }

    #[test]
    fn test_lookup_miss() {
        let table = RoutingTable::<Target>::new();
        assert!(table.lookup("b.example.com").is_none());
    }

    #[test]
    fn test_upsert_replaces_and_returns_prior() {
        let table = RoutingTable::new();
        table.upsert(
            "d.example.com",
            Target {
                addr: "10.0.0.1:8080",
                limit: 100,
            },
        );
        let prior = table
            .upsert(
                "d.example.com",
                Target {
                    addr: "10.0.0.2:8080",
                    limit: 200,
                },
            )
            .unwrap();
        assert_eq!(prior.addr, "10.0.0.1:8080");
        assert_eq!(prior.limit, 100);

        let current = table.lookup("d.example.com").unwrap();
        assert_eq!(current.addr, "10.0.0.2:8080");
        assert_eq!(current.limit, 200);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_held_snapshot_survives_replacement() {
        let table = RoutingTable::new();
        table.upsert(
            "d.example.com",
            Target {
                addr: "10.0.0.1:8080",
                limit: 100,
            },
        );

        // A request mid-flight holds the entry it resolved.
        let held = table.lookup("d.example.com").unwrap();
        table.upsert(
            "d.example.com",
            Target {
                addr: "10.0.0.2:8080",
                limit: 200,
            },
        );

        // Held snapshot stays internally consistent: old address with old
        // limit, never a mixture.
        assert_eq!(held.addr, "10.0.0.1:8080");
        assert_eq!(held.limit, 100);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let table = RoutingTable::new();
        table.upsert(
            "a.example.com",
            Target {
                addr: "127.0.0.1:9001",
                limit: 0,
            },
        );

        assert!(table.remove("a.example.com").is_some());
        assert!(table.lookup("a.example.com").is_none());
        assert!(table.remove("a.example.com").is_none());
        assert!(table.remove("never-registered.example.com").is_none());
    }

    #[test]
    fn test_keys_are_normalized() {
        let table = RoutingTable::new();
        table.upsert(
            "Example.Com",
            Target {
                addr: "127.0.0.1:9001",
                limit: 0,
            },
        );

        assert!(table.lookup("example.com").is_some());
        assert!(table.lookup("example.com:8080").is_some());
        assert!(table.lookup("EXAMPLE.COM:443").is_some());
        assert!(table.remove("example.com:80").is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn test_hosts_and_clear() {
        let table = RoutingTable::new();
        table.upsert(
            "a.example.com",
            Target {
                addr: "127.0.0.1:9001",
                limit: 0,
            },
        );
        table.upsert(
            "b.example.com",
            Target {
                addr: "127.0.0.1:9002",
                limit: 0,
            },
        );

        let mut hosts = table.hosts();
        hosts.sort();
        assert_eq!(hosts, vec!["a.example.com", "b.example.com"]);

        table.clear();
        assert!(table.is_empty());
        assert!(table.lookup("a.example.com").is_none());
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let table = Arc::new(RoutingTable::new());
        table.upsert(
            "a.example.com",
            Target {
                addr: "127.0.0.1:9001",
                limit: 0,
            },
        );

        let mut handles = Vec::new();
        for _ in 0..4 {
            let table = table.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    if let Some(entry) = table.lookup("a.example.com") {
                        // Either generation is fine, torn state is not.
                        assert!(entry.addr == "127.0.0.1:9001" || entry.addr == "127.0.0.1:9002");
                    }
                }
            }));
        }

        let writer = {
            let table = table.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    let addr = if i % 2 == 0 {
                        "127.0.0.1:9002"
                    } else {
                        "127.0.0.1:9001"
                    };
                    table.upsert("a.example.com", Target { addr, limit: 0 });
                }
            })
        };

        for handle in handles {
            handle.join().unwrap();
        }
        writer.join().unwrap();
    }
}
