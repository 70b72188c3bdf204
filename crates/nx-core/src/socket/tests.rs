use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::*;
use crate::error::is_shutdown_error;

fn manager() -> (TempDir, SocketManager) {
    let tmp = TempDir::new().unwrap();
    let manager = SocketManager::new(tmp.path().join("nx"));
    manager.init().unwrap();
    (tmp, manager)
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, manager) = manager();
    manager.init().unwrap();
    assert!(manager.socket_dir().is_dir());
}

#[cfg(unix)]
#[test]
fn test_init_restricts_directory() {
    use std::os::unix::fs::PermissionsExt;

    let (_tmp, manager) = manager();
    let mode = std::fs::metadata(manager.socket_dir())
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o700);
}

#[test]
fn test_generated_paths_differ_and_do_not_exist() {
    let (_tmp, manager) = manager();

    let first = manager.generate_temp_path().unwrap();
    let second = manager.generate_temp_path().unwrap();

    assert_ne!(first, second);
    assert!(!first.exists());
    assert!(!second.exists());
    assert!(first.starts_with(manager.socket_dir()));
    assert_eq!(first.extension().and_then(|e| e.to_str()), Some("sock"));
}

#[test]
fn test_generate_fails_without_directory() {
    let tmp = TempDir::new().unwrap();
    let manager = SocketManager::new(tmp.path().join("missing"));

    let err = manager.generate_temp_path().unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
}

#[tokio::test]
async fn test_create_listener_replaces_stale_file() {
    let (_tmp, manager) = manager();
    let path = manager.generate_temp_path().unwrap();
    std::fs::write(&path, b"stale").unwrap();

    let socket = manager.create_listener(&path).unwrap();
    assert_eq!(socket.path(), path.as_path());
    assert!(UnixStream::connect(&path).await.is_ok());
}

#[tokio::test]
async fn test_create_listener_under_missing_parent_fails() {
    let (_tmp, manager) = manager();
    let path = manager.socket_dir().join("nope").join("a.sock");

    let err = manager.create_listener(&path).unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
    assert!(err.to_string().contains("failed to bind"));
}

#[tokio::test]
async fn test_create_listener_rejects_long_path() {
    let (_tmp, manager) = manager();
    let path = manager.socket_dir().join("x".repeat(MAX_SOCKET_PATH));

    let err = manager.create_listener(&path).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[tokio::test]
async fn test_accepts_at_most_one_peer() {
    let (_tmp, manager) = manager();
    let path = manager.generate_temp_path().unwrap();
    let mut socket = manager.create_listener(&path).unwrap();

    let mut client = UnixStream::connect(&path).await.unwrap();
    let mut peer = socket.accept().await.unwrap();

    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    peer.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    assert!(!path.exists());
    assert!(UnixStream::connect(&path).await.is_err());

    let second = tokio::time::timeout(Duration::from_millis(200), socket.accept()).await;
    let err = second.unwrap().unwrap_err();
    assert!(is_shutdown_error(&err));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (_tmp, manager) = manager();
    let path = manager.generate_temp_path().unwrap();
    let mut socket = manager.create_listener(&path).unwrap();
    assert!(path.exists());

    socket.close();
    socket.close();

    assert!(!path.exists());
}

#[tokio::test]
async fn test_drop_removes_socket_file() {
    let (_tmp, manager) = manager();
    let path = manager.generate_temp_path().unwrap();
    {
        let _socket = manager.create_listener(&path).unwrap();
        assert!(path.exists());
    }
    assert!(!path.exists());
}

#[test]
fn test_cleanup_twice() {
    let (_tmp, manager) = manager();
    manager.generate_temp_path().unwrap();

    manager.cleanup().unwrap();
    manager.cleanup().unwrap();

    assert!(!manager.socket_dir().exists());
}
