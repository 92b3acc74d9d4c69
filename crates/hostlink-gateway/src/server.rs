//! The public dispatcher: one wildcard route, host-based dispatch

use crate::routes::GatewayRoutes;
use bytes::Bytes;
use futures::FutureExt;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// Prefix on every synthetic response body.
const BODY_PREFIX: &str = "hostlink";

type Body = BoxBody<Bytes, hyper::Error>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 8080).into(),
        }
    }
}

/// Public-facing HTTP entry point.
///
/// Matches every path; tunnel selection is by host only. Path, method and
/// body pass through untouched.
pub struct Gateway {
    config: GatewayConfig,
    routes: Arc<GatewayRoutes>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, routes: Arc<GatewayRoutes>) -> Self {
        Self { config, routes }
    }

    /// Bind the public listener.
    ///
    /// Failing to bind is the only fatal startup error; everything after
    /// this point is handled per request.
    pub async fn bind(self) -> Result<BoundGateway, GatewayError> {
        let listener =
            TcpListener::bind(self.config.bind_addr)
                .await
                .map_err(|source| GatewayError::Bind {
                    addr: self.config.bind_addr,
                    source,
                })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "gateway listening");

        Ok(BoundGateway {
            listener,
            local_addr,
            routes: self.routes,
        })
    }
}

/// A gateway with its listener bound, ready to serve.
pub struct BoundGateway {
    listener: TcpListener,
    local_addr: SocketAddr,
    routes: Arc<GatewayRoutes>,
}

impl BoundGateway {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept loop. Each inbound connection is served on its own task;
    /// a failing connection never takes down the server.
    pub async fn serve(self) -> Result<(), GatewayError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let routes = self.routes.clone();
                    tokio::spawn(async move {
                        if let Err(err) = serve_connection(stream, routes).await {
                            debug!(%peer_addr, "connection error: {err}");
                        }
                    });
                }
                Err(err) => {
                    error!("failed to accept connection: {err}");
                }
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    routes: Arc<GatewayRoutes>,
) -> Result<(), hyper::Error> {
    http1::Builder::new()
        .serve_connection(
            TokioIo::new(stream),
            service_fn(move |req| {
                let routes = routes.clone();
                async move { Ok::<_, Infallible>(guard(dispatch(req, routes)).await) }
            }),
        )
        .await
}

/// Convert a panic during request handling into a 500 for that request
/// only; other in-flight requests, the connection, and the accept loop
/// are unaffected.
async fn guard<F>(handler: F) -> Response<Body>
where
    F: Future<Output = Response<Body>>,
{
    match AssertUnwindSafe(handler).catch_unwind().await {
        Ok(response) => response,
        Err(_) => {
            error!("request handler panicked");
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{BODY_PREFIX}: internal error"),
            )
        }
    }
}

async fn dispatch(req: Request<Incoming>, routes: Arc<GatewayRoutes>) -> Response<Body> {
    let Some(host) = request_host(&req) else {
        debug!("request without a host");
        return text_response(
            StatusCode::BAD_REQUEST,
            format!("{BODY_PREFIX}: missing Host header"),
        );
    };

    let Some(entry) = routes.lookup(&host) else {
        // A routing miss, not a backend failure; logged at debug only.
        debug!(%host, "no tunnel for host");
        return text_response(
            StatusCode::NOT_FOUND,
            format!("{BODY_PREFIX}: Tunnel {host} not found"),
        );
    };

    match entry.forwarder().forward(req).await {
        Ok(response) => response,
        Err(err) => {
            error!(%host, addr = %entry.forward_addr(), "proxy error: {err}");
            text_response(
                StatusCode::BAD_GATEWAY,
                format!("{BODY_PREFIX} proxy error: {err}"),
            )
        }
    }
}

/// The host a request is addressed to: the request target's authority when
/// present (absolute-form targets), otherwise the `Host` header.
fn request_host<B>(req: &Request<B>) -> Option<String> {
    if let Some(host) = req.uri().host() {
        return Some(host.to_string());
    }
    req.headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn text_response(status: StatusCode, message: String) -> Response<Body> {
    let body = Full::new(Bytes::from(message))
        .map_err(|never| match never {})
        .boxed();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
