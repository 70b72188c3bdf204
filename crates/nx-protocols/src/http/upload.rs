//! PUT uploads into the serve directory

use std::path::{Component, Path, PathBuf};

use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

/// Why an upload path was refused
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PathRejection {
    Empty,
    Traversal,
}

/// Resolve a request path to a location under `root`
pub(crate) fn resolve(root: &Path, raw: &str) -> Result<PathBuf, PathRejection> {
    let decoded = urlencoding::decode(raw).map_err(|_| PathRejection::Traversal)?;
    let relative = decoded.trim_start_matches('/');

    let mut target = root.to_path_buf();
    let mut parts = 0;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                target.push(part);
                parts += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PathRejection::Traversal)
            }
        }
    }

    if parts == 0 {
        return Err(PathRejection::Empty);
    }
    Ok(target)
}

pub(crate) async fn put(root: &Path, req: Request) -> Response {
    if !req.headers().contains_key(header::CONTENT_LENGTH) {
        return (StatusCode::BAD_REQUEST, "Content-Length required").into_response();
    }

    let target = match resolve(root, req.uri().path()) {
        Ok(target) => target,
        Err(PathRejection::Empty) => {
            return (StatusCode::BAD_REQUEST, "Empty filename not allowed").into_response()
        }
        Err(PathRejection::Traversal) => {
            return (StatusCode::FORBIDDEN, "Path traversal not allowed").into_response()
        }
    };

    let existed = match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => {
            return (StatusCode::CONFLICT, "Cannot overwrite directory").into_response()
        }
        Ok(_) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            error!(path = %target.display(), error = %e, "Failed to stat upload target");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to stat file").into_response();
        }
    };

    if let Some(parent) = target.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            error!(path = %parent.display(), error = %e, "Failed to create upload directory");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Could not create directory").into_response();
        }
    }

    let mut file = match tokio::fs::File::create(&target).await {
        Ok(file) => file,
        Err(e) => {
            error!(path = %target.display(), error = %e, "Failed to create file");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create file").into_response();
        }
    };

    let mut written = 0u64;
    let mut body = req.into_body().into_data_stream();
    while let Some(chunk) = body.next().await {
        let result = match chunk {
            Ok(chunk) => {
                written += chunk.len() as u64;
                file.write_all(&chunk).await
            }
            Err(e) => Err(std::io::Error::other(e)),
        };
        if let Err(e) = result {
            error!(path = %target.display(), error = %e, "Failed to write file");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to write file").into_response();
        }
    }
    if let Err(e) = file.flush().await {
        error!(path = %target.display(), error = %e, "Failed to flush file");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to write file").into_response();
    }

    info!(path = %target.display(), bytes = written, overwrite = existed, "File uploaded");
    if existed {
        StatusCode::OK.into_response()
    } else {
        StatusCode::CREATED.into_response()
    }
}
