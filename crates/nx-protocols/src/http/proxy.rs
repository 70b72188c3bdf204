//! Forward proxy and CONNECT tunnelling

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Largest request body relayed by the forward proxy
pub const MAX_PROXY_BODY: usize = 64 * 1024 * 1024;

/// Headers that describe one hop and are never forwarded
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub(crate) fn copy_headers(src: &HeaderMap, dst: &mut HeaderMap) {
    for (name, value) in src {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        dst.append(name.clone(), value.clone());
    }
}

/// Dial the CONNECT target, answer 200 and splice both streams after the upgrade
pub(crate) async fn tunnel(req: Request<Incoming>, token: CancellationToken) -> Response {
    let Some(target) = req.uri().authority().map(|a| a.to_string()) else {
        return (StatusCode::BAD_REQUEST, "CONNECT requires host:port").into_response();
    };
    info!(target = %target, "HTTPS CONNECT request");

    let mut upstream = match TcpStream::connect(&target).await {
        Ok(stream) => stream,
        Err(e) => return (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
    };

    tokio::spawn(async move {
        let upgraded = match hyper::upgrade::on(req).await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!(target = %target, error = %e, "CONNECT upgrade failed");
                return;
            }
        };
        let mut client = TokioIo::new(upgraded);
        tokio::select! {
            _ = token.cancelled() => debug!(target = %target, "Tunnel cancelled"),
            copied = tokio::io::copy_bidirectional(&mut client, &mut upstream) => match copied {
                Ok((sent, received)) => debug!(target = %target, sent, received, "Tunnel closed"),
                Err(e) => debug!(target = %target, error = %e, "Tunnel ended with error"),
            },
        }
    });

    StatusCode::OK.into_response()
}

/// Replay an absolute-URI request upstream and stream the answer back
pub(crate) async fn forward(client: &reqwest::Client, req: Request) -> Response {
    let uri = req.uri().clone();
    if uri.scheme().is_none() || uri.authority().is_none() {
        return (StatusCode::BAD_REQUEST, "Request URL must be absolute for proxy").into_response();
    }

    let (parts, body) = req.into_parts();
    let mut headers = HeaderMap::new();
    copy_headers(&parts.headers, &mut headers);

    let has_body = parts.headers.contains_key(header::CONTENT_LENGTH)
        || parts.headers.contains_key(header::TRANSFER_ENCODING);
    let mut request = client.request(parts.method, uri.to_string()).headers(headers);
    if has_body {
        match axum::body::to_bytes(body, MAX_PROXY_BODY).await {
            Ok(bytes) => request = request.body(bytes),
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        }
    }
    let upstream = request.send().await;

    let upstream = match upstream {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!(uri = %uri, error = %e, "Proxy request failed");
            return (StatusCode::BAD_GATEWAY, e.to_string()).into_response();
        }
    };

    let status = upstream.status();
    let mut headers = HeaderMap::new();
    copy_headers(upstream.headers(), &mut headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
