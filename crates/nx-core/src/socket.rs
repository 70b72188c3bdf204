//! Local-socket manager
//!
//! Every shell session gets its own Unix socket inside a private runtime
//! directory. The pane's bridging client connects to it and the session's
//! bridge accepts exactly one peer from it.

use std::io;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info};

use crate::error::{closed_listener_error, Error, Result};

/// `sun_path` is 104 bytes on macOS and 108 on Linux
const MAX_SOCKET_PATH: usize = 104;

/// Owns the private socket directory and hands out socket paths
#[derive(Debug, Clone)]
pub struct SocketManager {
    dir: PathBuf,
}

impl SocketManager {
    /// Manage sockets under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Manage sockets under `$XDG_RUNTIME_DIR/nx`, falling back to the
    /// system temp directory when no runtime directory exists
    #[must_use]
    pub fn with_default_dir() -> Self {
        let base = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
        Self::new(base.join("nx"))
    }

    /// Directory holding the session sockets
    #[must_use]
    pub fn socket_dir(&self) -> &Path {
        &self.dir
    }

    /// Create the private directory if it does not exist yet
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            Error::io(
                format!("failed to create socket directory {}", self.dir.display()),
                e,
            )
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| Error::io("failed to restrict socket directory", e))?;
        }

        debug!(dir = %self.dir.display(), "Socket directory ready");
        Ok(())
    }

    /// Claim a fresh socket path inside the private directory
    ///
    /// The name is reserved by creating a placeholder file and removing it
    /// straight away, so concurrent callers never receive the same path.
    pub fn generate_temp_path(&self) -> Result<PathBuf> {
        let placeholder = tempfile::Builder::new()
            .prefix("nx-")
            .suffix(".sock")
            .tempfile_in(&self.dir)
            .map_err(|e| Error::io("failed to allocate socket path", e))?;

        let path = placeholder.path().to_path_buf();
        placeholder
            .close()
            .map_err(|e| Error::io("failed to release socket placeholder", e))?;
        Ok(path)
    }

    /// Bind a listener at `path`, replacing any stale file left there
    pub fn create_listener(&self, path: &Path) -> Result<LocalSocket> {
        let path_len = path.as_os_str().len();
        if path_len >= MAX_SOCKET_PATH {
            return Err(Error::Configuration(format!(
                "socket path too long ({path_len} bytes, max {}): {}",
                MAX_SOCKET_PATH - 1,
                path.display()
            )));
        }

        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(socket = %path.display(), error = %e, "Could not remove stale socket");
            }
        }

        let listener = UnixListener::bind(path)
            .map_err(|e| Error::io(format!("failed to bind {}", path.display()), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| Error::io("failed to restrict socket permissions", e))?;
        }

        debug!(socket = %path.display(), "Local socket listening");
        Ok(LocalSocket {
            path: path.to_path_buf(),
            listener: Some(listener),
        })
    }

    /// Remove the private directory and everything in it
    ///
    /// Calling this when the directory is already gone succeeds.
    pub fn cleanup(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                info!(dir = %self.dir.display(), "Removed socket directory");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(
                format!("failed to remove socket directory {}", self.dir.display()),
                e,
            )),
        }
    }
}

/// A bound local socket that yields at most one peer
///
/// The listener is dropped and the socket file removed once a peer has been
/// accepted, on [`close`](Self::close), or on drop.
#[derive(Debug)]
pub struct LocalSocket {
    path: PathBuf,
    listener: Option<UnixListener>,
}

impl LocalSocket {
    /// Filesystem path of the socket
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the single peer
    ///
    /// Cancel-safe: dropping the future leaves the listener open. After a
    /// peer is accepted the listener is closed, so later connects are refused.
    pub async fn accept(&mut self) -> io::Result<UnixStream> {
        let listener = self.listener.as_ref().ok_or_else(closed_listener_error)?;
        let (stream, _) = listener.accept().await?;
        self.close();
        Ok(stream)
    }

    /// Stop listening and remove the socket file; safe to call repeatedly
    pub fn close(&mut self) {
        if self.listener.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(socket = %self.path.display(), error = %e, "Could not remove socket file");
                }
            }
        }
    }
}

impl Drop for LocalSocket {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests;
