//! Pooled HTTP forwarder toward a tunnel's forward address
//!
//! One forwarder exists per routing entry, built when the tunnel comes up
//! and immutable afterward. It dials the private forward address, wraps
//! each connection in the entry's bandwidth throttle, and reuses idle
//! connections across requests.

use bytes::Bytes;
use hostlink_limit::ThrottledStream;
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// Maximum idle connections kept per forward address.
const MAX_POOL_SIZE: usize = 10;

/// Outbound dial timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

type Sender = http1::SendRequest<Incoming>;

/// Backend-side failures, surfaced to the client as a 502 body.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("handshake with {addr} failed: {source}")]
    Handshake {
        addr: String,
        #[source]
        source: hyper::Error,
    },

    #[error("request to {addr} failed: {source}")]
    Request {
        addr: String,
        #[source]
        source: hyper::Error,
    },
}

/// Forwards requests to a single private address, throttled to the rate
/// limit fixed at construction.
///
/// Holds no per-request mutable state beyond the idle-connection pool;
/// safe to share across any number of concurrent requests for the same
/// host.
pub struct HttpForwarder {
    forward_addr: String,
    rate_limit_kbps: u32,
    pool: Mutex<Vec<Sender>>,
}

impl HttpForwarder {
    pub fn new(forward_addr: impl Into<String>, rate_limit_kbps: u32) -> Self {
        Self {
            forward_addr: forward_addr.into(),
            rate_limit_kbps,
            pool: Mutex::new(Vec::with_capacity(MAX_POOL_SIZE)),
        }
    }

    pub fn forward_addr(&self) -> &str {
        &self.forward_addr
    }

    pub fn rate_limit_kbps(&self) -> u32 {
        self.rate_limit_kbps
    }

    /// Forward `req` to the backend and hand back its response, body
    /// streaming through as it arrives.
    ///
    /// The inbound `Host` header is passed through verbatim so backends
    /// see the public hostname the client used; only the request target is
    /// reduced to origin-form. Failures are not retried.
    pub async fn forward(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, ForwardError> {
        let req = origin_form(req);
        let mut sender = self.connect().await?;

        let response = sender
            .send_request(req)
            .await
            .map_err(|source| ForwardError::Request {
                addr: self.forward_addr.clone(),
                source,
            })?;

        self.recycle(sender).await;
        Ok(response.map(BodyExt::boxed))
    }

    /// Get a pooled connection or dial a new one.
    async fn connect(&self) -> Result<Sender, ForwardError> {
        {
            let mut pool = self.pool.lock().await;
            while let Some(sender) = pool.pop() {
                // Senders still mid-response are dropped here; the
                // connection task finishes the in-flight body on its own.
                if sender.is_ready() {
                    debug!(addr = %self.forward_addr, "reusing pooled backend connection");
                    return Ok(sender);
                }
            }
        }

        debug!(addr = %self.forward_addr, "dialing backend");
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.forward_addr))
            .await
            .map_err(|_| ForwardError::ConnectTimeout {
                addr: self.forward_addr.clone(),
            })?
            .map_err(|source| ForwardError::Connect {
                addr: self.forward_addr.clone(),
                source,
            })?;

        // One bucket per outbound connection; requests that later reuse
        // this connection share its budget.
        let stream = ThrottledStream::new(stream, self.rate_limit_kbps);

        let (sender, conn) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|source| ForwardError::Handshake {
                addr: self.forward_addr.clone(),
                source,
            })?;

        tokio::spawn(async move {
            if let Err(err) = conn.await {
                debug!("backend connection closed: {err}");
            }
        });

        Ok(sender)
    }

    async fn recycle(&self, sender: Sender) {
        // A sender still mid-response or on a closed connection would only
        // occupy a slot until the pop-side check drops it; decline it now.
        if !sender.is_ready() {
            return;
        }
        let mut pool = self.pool.lock().await;
        if pool.len() < MAX_POOL_SIZE {
            pool.push(sender);
        }
    }
}

/// Reduce an absolute-form request target to origin-form for the backend.
fn origin_form(req: Request<Incoming>) -> Request<Incoming> {
    if req.uri().scheme().is_none() && req.uri().authority().is_none() {
        return req;
    }

    let (mut parts, body) = req.into_parts();
    parts.uri = match parts.uri.path_and_query() {
        Some(pq) => pq.as_str().parse().unwrap_or_else(|_| Uri::from_static("/")),
        None => Uri::from_static("/"),
    };
    Request::from_parts(parts, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarder_is_immutable_config() {
        let forwarder = HttpForwarder::new("127.0.0.1:9001", 100);
        assert_eq!(forwarder.forward_addr(), "127.0.0.1:9001");
        assert_eq!(forwarder.rate_limit_kbps(), 100);
    }

    #[tokio::test]
    async fn test_recycle_pools_ready_sender() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            // Hold the connection open so the sender stays ready.
            std::future::pending::<()>().await;
        });

        let forwarder = HttpForwarder::new(addr.to_string(), 0);
        let sender = forwarder.connect().await.unwrap();

        // Let the spawned connection task run once; a fresh sender reports
        // ready only after that first poll.
        tokio::task::yield_now().await;

        forwarder.recycle(sender).await;
        assert_eq!(forwarder.pool.lock().await.len(), 1);

        // The pooled sender is handed back on the next connect.
        let _reused = forwarder.connect().await.unwrap();
        assert_eq!(forwarder.pool.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn test_recycle_drops_unready_sender() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and immediately hang up.
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let forwarder = HttpForwarder::new(addr.to_string(), 0);
        let sender = forwarder.connect().await.unwrap();

        // Give the connection task a moment to observe the close.
        tokio::time::sleep(Duration::from_millis(50)).await;

        forwarder.recycle(sender).await;
        assert!(forwarder.pool.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_refused_reports_address() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let forwarder = HttpForwarder::new(addr.to_string(), 0);
        let err = forwarder.connect().await.unwrap_err();
        match err {
            ForwardError::Connect { addr: reported, .. } => {
                assert_eq!(reported, addr.to_string());
            }
            other => panic!("expected Connect error, got {other:?}"),
        }
    }
}
