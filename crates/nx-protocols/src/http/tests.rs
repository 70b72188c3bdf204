use axum::http::{HeaderValue, Request as HttpRequest};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use super::upload::{resolve, PathRejection};
use super::*;

fn service(dir: Option<&std::path::Path>) -> HttpService {
    HttpService::new(HttpConfig {
        serve_dir: dir.map(|d| d.to_path_buf()),
        server_addr: "10.0.0.1:8443".to_string(),
        proxy_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn served_dir() -> TempDir {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("hello.txt"), "hello world").unwrap();
    std::fs::create_dir(tmp.path().join("tools")).unwrap();
    tmp
}

async fn send(service: &HttpService, req: Request) -> (StatusCode, String) {
    let response = service.router().oneshot(req).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&body).into_owned())
}

fn put(path: &str, body: &'static str) -> Request {
    HttpRequest::builder()
        .method(Method::PUT)
        .uri(path)
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

#[test]
fn test_serves_locally() {
    let mut headers = HeaderMap::new();
    let addr = "10.0.0.1:8443";

    assert!(serves_locally(&"/file".parse().unwrap(), &headers, addr));
    assert!(serves_locally(&"http://example.com/".parse().unwrap(), &headers, addr));

    headers.insert("proxy-connection", HeaderValue::from_static("keep-alive"));
    assert!(!serves_locally(&"http://example.com/".parse().unwrap(), &headers, addr));
    assert!(serves_locally(&"http://10.0.0.1:8443/f".parse().unwrap(), &headers, addr));
    assert!(serves_locally(&"/file".parse().unwrap(), &headers, addr));

    let mut auth = HeaderMap::new();
    auth.insert(header::PROXY_AUTHORIZATION, HeaderValue::from_static("Basic eDp5"));
    assert!(!serves_locally(&"http://example.com/".parse().unwrap(), &auth, addr));
}

#[test]
fn test_serves_locally_ipv6_authority() {
    let mut headers = HeaderMap::new();
    headers.insert("proxy-connection", HeaderValue::from_static("keep-alive"));
    let addr: std::net::SocketAddr = "[::1]:8443".parse().unwrap();

    assert!(serves_locally(
        &"http://[::1]:8443/f".parse().unwrap(),
        &headers,
        &addr.to_string()
    ));
    assert!(!serves_locally(
        &"http://[::2]:8443/f".parse().unwrap(),
        &headers,
        &addr.to_string()
    ));
}

#[test]
fn test_resolve_upload_paths() {
    let root = std::path::Path::new("/srv");

    assert_eq!(resolve(root, "/a/b.txt").unwrap(), root.join("a").join("b.txt"));
    assert_eq!(resolve(root, "/my%20file").unwrap(), root.join("my file"));
    assert_eq!(resolve(root, "/"), Err(PathRejection::Empty));
    assert_eq!(resolve(root, "/./"), Err(PathRejection::Empty));
    assert_eq!(resolve(root, "/../etc/passwd"), Err(PathRejection::Traversal));
    assert_eq!(resolve(root, "/a/%2e%2e/%2e%2e/x"), Err(PathRejection::Traversal));
    assert_eq!(resolve(root, "//etc/passwd").unwrap(), root.join("etc").join("passwd"));
}

#[test]
fn test_missing_serve_dir_is_rejected() {
    let result = HttpService::new(HttpConfig {
        serve_dir: Some("/definitely/not/here".into()),
        ..HttpConfig::default()
    });
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[tokio::test]
async fn test_get_file() {
    let dir = served_dir();
    let service = service(Some(dir.path()));

    let req = HttpRequest::get("/hello.txt").body(Body::empty()).unwrap();
    let (status, body) = send(&service, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello world");

    let req = HttpRequest::get("/missing.txt").body(Body::empty()).unwrap();
    let (status, _) = send(&service, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_absolute_uri_without_proxy_headers_is_served_locally() {
    let dir = served_dir();
    let service = service(Some(dir.path()));

    let req = HttpRequest::get("http://somewhere.example/hello.txt")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&service, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello world");
}

#[tokio::test]
async fn test_file_serving_disabled() {
    let service = service(None);

    let req = HttpRequest::get("/hello.txt").body(Body::empty()).unwrap();
    let (status, body) = send(&service, req).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, "File serving not enabled");

    let (status, _) = send(&service, put("/x.txt", "x")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_put_creates_then_overwrites() {
    let dir = served_dir();
    let service = service(Some(dir.path()));

    let (status, _) = send(&service, put("/loot/creds.txt", "first")).await;
    assert_eq!(status, StatusCode::CREATED);
    let written = std::fs::read_to_string(dir.path().join("loot").join("creds.txt")).unwrap();
    assert_eq!(written, "first");

    let (status, _) = send(&service, put("/loot/creds.txt", "second")).await;
    assert_eq!(status, StatusCode::OK);
    let written = std::fs::read_to_string(dir.path().join("loot").join("creds.txt")).unwrap();
    assert_eq!(written, "second");
}

#[tokio::test]
async fn test_put_rejections() {
    let dir = served_dir();
    let service = service(Some(dir.path()));

    let (status, _) = send(&service, put("/", "x")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&service, put("/%2e%2e/escape.txt", "x")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(!dir.path().parent().unwrap().join("escape.txt").exists());

    let (status, _) = send(&service, put("/tools", "x")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let chunked = HttpRequest::builder()
        .method(Method::PUT)
        .uri("/chunked.txt")
        .body(Body::from("x"))
        .unwrap();
    let (status, body) = send(&service, chunked).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Content-Length required");
}

#[tokio::test]
async fn test_webdav_propfind_lists_directory() {
    let dir = served_dir();
    let service = service(Some(dir.path()));

    let req = HttpRequest::builder()
        .method("PROPFIND")
        .uri("/")
        .header("Depth", "1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&service, req).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert!(body.contains("hello.txt"));
}

#[tokio::test]
async fn test_webdav_mkcol_and_delete() {
    let dir = served_dir();
    let service = service(Some(dir.path()));

    let req = HttpRequest::builder()
        .method("MKCOL")
        .uri("/new/")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&service, req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(dir.path().join("new").is_dir());

    let req = HttpRequest::builder()
        .method(Method::DELETE)
        .uri("/hello.txt")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&service, req).await;
    assert!(status.is_success());
    assert!(!dir.path().join("hello.txt").exists());
}

#[tokio::test]
async fn test_forward_requires_absolute_uri() {
    let client = reqwest::Client::new();
    let req = HttpRequest::get("/relative").body(Body::empty()).unwrap();

    let response = proxy::forward(&client, req).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[test]
fn test_copy_headers_strips_hop_by_hop() {
    let mut src = HeaderMap::new();
    src.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    src.insert("proxy-connection", HeaderValue::from_static("keep-alive"));
    src.insert(header::PROXY_AUTHORIZATION, HeaderValue::from_static("Basic eDp5"));
    src.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    src.insert(header::USER_AGENT, HeaderValue::from_static("curl/8"));
    src.append(header::ACCEPT, HeaderValue::from_static("text/html"));
    src.append(header::ACCEPT, HeaderValue::from_static("*/*"));

    let mut dst = HeaderMap::new();
    proxy::copy_headers(&src, &mut dst);

    assert_eq!(dst.len(), 3);
    assert_eq!(dst.get_all(header::ACCEPT).iter().count(), 2);
    assert!(dst.get(header::CONNECTION).is_none());
    assert!(dst.get(header::PROXY_AUTHORIZATION).is_none());
}

#[tokio::test]
async fn test_forward_proxy_request() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    let seen = tokio::spawn(async move {
        let (mut stream, _) = upstream.accept().await.unwrap();
        let head = read_head(&mut stream).await;
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 8\r\nX-Upstream: yes\r\n\r\nupstream")
            .await
            .unwrap();
        head
    });

    let service = service(None);
    let req = HttpRequest::get(format!("http://{upstream_addr}/page"))
        .header("proxy-connection", "keep-alive")
        .header("x-client", "nx-test")
        .body(Body::empty())
        .unwrap();
    let response = service.router().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-upstream"], "yes");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"upstream");

    let head = seen.await.unwrap().to_ascii_lowercase();
    assert!(head.starts_with("get /page http/1.1"));
    assert!(head.contains("x-client: nx-test"));
    assert!(!head.contains("proxy-connection"));
}

#[tokio::test]
async fn test_forward_proxy_upstream_down_is_bad_gateway() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = closed.local_addr().unwrap();
    drop(closed);

    let service = service(None);
    let req = HttpRequest::get(format!("http://{addr}/"))
        .header("proxy-connection", "keep-alive")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&service, req).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_connect_tunnel_over_connection() {
    let echo = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let echo_addr = echo.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = echo.accept().await.unwrap();
        let (mut reader, mut writer) = stream.split();
        let _ = tokio::io::copy(&mut reader, &mut writer).await;
    });

    let service = service(None);
    let (conn, mut client) = tokio::io::duplex(4096);
    let token = CancellationToken::new();
    let serving = tokio::spawn({
        let token = token.clone();
        async move { service.handle(conn, token).await }
    });

    client
        .write_all(format!("CONNECT {echo_addr} HTTP/1.1\r\nHost: {echo_addr}\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let head = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 200"));

    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    token.cancel();
    tokio::time::timeout(Duration::from_secs(1), serving)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_connect_unreachable_is_bad_gateway() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = closed.local_addr().unwrap();
    drop(closed);

    let service = service(None);
    let (conn, mut client) = tokio::io::duplex(4096);
    tokio::spawn(async move { service.handle(conn, CancellationToken::new()).await });

    client
        .write_all(format!("CONNECT {addr} HTTP/1.1\r\nHost: {addr}\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let head = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 502"));
}

#[tokio::test]
async fn test_handle_serves_keep_alive_requests() {
    let dir = served_dir();
    let service = service(Some(dir.path()));
    let (conn, mut client) = tokio::io::duplex(4096);
    let serving = tokio::spawn(async move { service.handle(conn, CancellationToken::new()).await });

    for _ in 0..2 {
        client
            .write_all(b"GET /hello.txt HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let head = read_head(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 200"));
        let mut body = [0u8; 11];
        client.read_exact(&mut body).await.unwrap();
        assert_eq!(&body, b"hello world");
    }

    drop(client);
    tokio::time::timeout(Duration::from_secs(1), serving)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
