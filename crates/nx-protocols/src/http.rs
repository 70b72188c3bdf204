//! HTTP collaborator
//!
//! Serves HTTP-classified connections with hyper, one connection at a time,
//! through an axum router:
//! - `CONNECT host:port` tunnels raw bytes after the upgrade
//! - `PUT` uploads into the serve directory
//! - absolute-URI requests carrying proxy headers are forwarded upstream
//! - WebDAV methods go to a `dav-server` handler
//! - everything else is static file serving

mod proxy;
mod upload;
mod webdav;

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Router};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use nx_core::{supervisor, Listener};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub use proxy::HOP_BY_HOP_HEADERS;

/// Upstream timeout for forwarded proxy requests
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP collaborator settings
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Root for file serving, uploads and WebDAV; `None` disables all three
    pub serve_dir: Option<PathBuf>,
    /// `host:port` this server is reachable at; absolute URIs naming it are served locally
    pub server_addr: String,
    /// Upstream timeout for the forward proxy
    pub proxy_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            serve_dir: None,
            server_addr: "127.0.0.1:8443".to_string(),
            proxy_timeout: DEFAULT_PROXY_TIMEOUT,
        }
    }
}

struct HttpState {
    serve_dir: Option<PathBuf>,
    server_addr: String,
    files: Option<ServeDir>,
    dav: Option<dav_server::DavHandler>,
    client: reqwest::Client,
}

/// Per-connection HTTP server
pub struct HttpService {
    router: Router,
}

impl HttpService {
    /// Build the router for `config`
    pub fn new(config: HttpConfig) -> Result<Self> {
        if let Some(dir) = &config.serve_dir {
            if !dir.is_dir() {
                return Err(Error::Configuration(format!(
                    "serve directory {} does not exist",
                    dir.display()
                )));
            }
            info!(dir = %dir.display(), "File serving enabled");
        }

        let client = reqwest::Client::builder()
            .timeout(config.proxy_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|e| Error::Configuration(format!("proxy client: {e}")))?;

        let state = Arc::new(HttpState {
            files: config.serve_dir.as_ref().map(ServeDir::new),
            dav: config.serve_dir.as_deref().map(webdav::handler),
            serve_dir: config.serve_dir,
            server_addr: config.server_addr,
            client,
        });

        let router = Router::new()
            .fallback(route)
            .layer(Extension(state))
            .layer(TraceLayer::new_for_http());

        Ok(Self { router })
    }

    /// The router behind every non-CONNECT request
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve HTTP/1.1 on one connection until the peer leaves or `token` fires
    pub async fn handle<C>(&self, conn: C, token: CancellationToken) -> Result<()>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let router = self.router.clone();
        let tunnels = token.clone();
        let service = hyper::service::service_fn(move |req: Request<Incoming>| {
            let router = router.clone();
            let tunnels = tunnels.clone();
            async move {
                if req.method() == Method::CONNECT {
                    return Ok::<_, Infallible>(proxy::tunnel(req, tunnels).await);
                }
                match router.oneshot(req.map(Body::new)).await {
                    Ok(response) => Ok(response),
                    Err(never) => match never {},
                }
            }
        });

        let connection = http1::Builder::new()
            .serve_connection(TokioIo::new(conn), service)
            .with_upgrades();

        tokio::select! {
            _ = token.cancelled() => Ok(()),
            served = connection => match served {
                Ok(()) => Ok(()),
                Err(e) if e.is_incomplete_message() || e.is_canceled() => {
                    debug!(error = %e, "HTTP connection ended early");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Accept HTTP connections from `listener` until cancelled
    pub async fn serve<L>(self: Arc<Self>, token: CancellationToken, listener: &L) -> nx_core::Result<()>
    where
        L: Listener + ?Sized,
        L::Conn: AsyncRead + AsyncWrite + Unpin,
    {
        supervisor::run(&token, listener, "http", |conn, _remote, child| {
            let service = Arc::clone(&self);
            async move { service.handle(conn, child).await }
        })
        .await
    }
}

async fn route(Extension(state): Extension<Arc<HttpState>>, req: Request) -> Response {
    if req.method() == Method::PUT {
        return match &state.serve_dir {
            Some(dir) => upload::put(dir, req).await,
            None => not_enabled(),
        };
    }

    if !serves_locally(req.uri(), req.headers(), &state.server_addr) {
        info!(method = %req.method(), uri = %req.uri(), "HTTP proxy request");
        return proxy::forward(&state.client, req).await;
    }

    let req = relative(req);
    if webdav::is_webdav_method(req.method()) {
        return match &state.dav {
            Some(dav) => webdav::serve(dav, req).await,
            None => not_enabled(),
        };
    }

    info!(method = %req.method(), path = %req.uri().path(), "HTTP file request");
    match &state.files {
        Some(files) => match files.clone().oneshot(req).await {
            Ok(response) => response.map(Body::new),
            Err(never) => match never {},
        },
        None => not_enabled(),
    }
}

/// Whether a request is for this server rather than something to proxy
pub fn serves_locally(uri: &Uri, headers: &HeaderMap, server_addr: &str) -> bool {
    let Some(authority) = uri.authority().filter(|_| uri.scheme().is_some()) else {
        return true;
    };
    if authority.as_str() == server_addr {
        return true;
    }
    let has = |name: &str| headers.get(name).is_some_and(|v| !v.is_empty());
    !has("proxy-connection") && !has(header::PROXY_AUTHORIZATION.as_str())
}

/// Strip scheme and authority so file handlers see an origin-form URI
fn relative(mut req: Request) -> Request {
    if req.uri().scheme().is_some() {
        let path = req
            .uri()
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        match path.parse::<Uri>() {
            Ok(uri) => *req.uri_mut() = uri,
            Err(e) => warn!(error = %e, "Could not rewrite absolute URI"),
        }
    }
    req
}

fn not_enabled() -> Response {
    warn!("HTTP request received but no serve directory specified");
    (StatusCode::SERVICE_UNAVAILABLE, "File serving not enabled").into_response()
}

#[cfg(test)]
mod tests;
