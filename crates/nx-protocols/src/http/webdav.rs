use std::path::Path;

use axum::body::Body;
use axum::extract::Request;
use axum::http::Method;
use axum::response::Response;
use dav_server::localfs::LocalFs;
use dav_server::memls::MemLs;
use dav_server::DavHandler;
use tracing::debug;

const WEBDAV_METHODS: &[&str] = &[
    "OPTIONS", "PROPFIND", "PROPPATCH", "MKCOL", "COPY", "MOVE", "LOCK", "UNLOCK", "DELETE",
];

pub(crate) fn is_webdav_method(method: &Method) -> bool {
    WEBDAV_METHODS.contains(&method.as_str())
}

/// WebDAV over `root` with in-memory locks
pub(crate) fn handler(root: &Path) -> DavHandler {
    DavHandler::builder()
        .filesystem(LocalFs::new(root, false, false, false))
        .locksystem(MemLs::new())
        .build_handler()
}

pub(crate) async fn serve(dav: &DavHandler, req: Request) -> Response {
    debug!(method = %req.method(), path = %req.uri().path(), "WebDAV request");
    dav.handle(req).await.map(Body::new)
}
