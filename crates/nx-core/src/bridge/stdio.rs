//! Pane-side end of a shell bridge

use std::path::Path;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::BridgeSession;
use crate::error::{Error, Result};

/// Connect to the session socket at `path` and relay it to `input`/`output`
///
/// Runs inside a terminal pane with the process's stdin and stdout. Returns
/// when either direction finishes or `token` fires; the socket is closed
/// exactly once on every path.
pub async fn bridge_stdio<I, O>(
    token: &CancellationToken,
    path: &Path,
    input: I,
    output: O,
) -> Result<()>
where
    I: AsyncRead + Send + 'static,
    O: AsyncWrite + Send + 'static,
{
    let stream = UnixStream::connect(path)
        .await
        .map_err(|e| Error::io(format!("failed to connect to {}", path.display()), e))?;
    debug!(socket = %path.display(), "Connected to session socket");

    let mut session = BridgeSession::start(token, stream, tokio::io::join(input, output));
    session.wait().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::socket::SocketManager;

    #[tokio::test]
    async fn test_stdio_relays_socket_traffic() {
        let tmp = TempDir::new().unwrap();
        let manager = SocketManager::new(tmp.path());
        let path = manager.generate_temp_path().unwrap();
        let mut socket = manager.create_listener(&path).unwrap();

        let (mut stdin_writer, stdin) = duplex(64);
        let (stdout, mut stdout_reader) = duplex(64);
        let token = CancellationToken::new();

        let client_path = path.clone();
        let client =
            tokio::spawn(async move { bridge_stdio(&token, &client_path, stdin, stdout).await });

        let mut shell = socket.accept().await.unwrap();
        shell.write_all(b"$ ").await.unwrap();
        let mut prompt = [0u8; 2];
        stdout_reader.read_exact(&mut prompt).await.unwrap();
        assert_eq!(&prompt, b"$ ");

        stdin_writer.write_all(b"id\n").await.unwrap();
        let mut typed = [0u8; 3];
        shell.read_exact(&mut typed).await.unwrap();
        assert_eq!(&typed, b"id\n");

        drop(shell);
        let result = tokio::time::timeout(Duration::from_secs(2), client)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stdio_missing_socket() {
        let tmp = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let (_w, stdin) = duplex(8);
        let (stdout, _r) = duplex(8);

        let err = bridge_stdio(&token, &tmp.path().join("gone.sock"), stdin, stdout)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to connect"));
    }

    #[tokio::test]
    async fn test_stdio_interrupted() {
        let tmp = TempDir::new().unwrap();
        let manager = SocketManager::new(tmp.path());
        let path = manager.generate_temp_path().unwrap();
        let _socket = manager.create_listener(&path).unwrap();

        let token = CancellationToken::new();
        let (_w, stdin) = duplex(8);
        let (stdout, _r) = duplex(8);

        let child = token.clone();
        let client =
            tokio::spawn(async move { bridge_stdio(&child, &path, stdin, stdout).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), client)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
