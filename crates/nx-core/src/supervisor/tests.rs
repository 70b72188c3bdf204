use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use super::*;
use crate::error::closed_listener_error;

/// Scripted listener: pops outcomes, then parks until notified
struct ScriptedListener {
    script: Mutex<VecDeque<io::Result<u32>>>,
    idle: Notify,
}

impl ScriptedListener {
    fn new(script: Vec<io::Result<u32>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            idle: Notify::new(),
        }
    }

    fn push(&self, item: io::Result<u32>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(item);
        self.idle.notify_one();
    }
}

#[async_trait]
impl Listener for ScriptedListener {
    type Conn = u32;

    async fn accept(&self) -> io::Result<(u32, SocketAddr)> {
        loop {
            let next = self
                .script
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            match next {
                Some(item) => return item.map(|id| (id, addr())),
                None => self.idle.notified().await,
            }
        }
    }
}

fn addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 4444))
}

#[tokio::test]
async fn test_failing_handler_does_not_stop_loop() {
    let listener = Arc::new(ScriptedListener::new(vec![Ok(1), Ok(2), Ok(3)]));
    let calls = Arc::new(AtomicUsize::new(0));
    let token = CancellationToken::new();

    let loop_listener = Arc::clone(&listener);
    let loop_calls = Arc::clone(&calls);
    let loop_token = token.clone();
    let task = tokio::spawn(async move {
        run(&loop_token, loop_listener.as_ref(), "test", move |_conn, _remote, _token| {
            let calls = Arc::clone(&loop_calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Configuration("handler always fails".into()))
            }
        })
        .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(!task.is_finished());

    listener.push(Ok(4));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    token.cancel();
    let result = task.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn test_transient_error_is_retried() {
    let listener = ScriptedListener::new(vec![
        Err(io::Error::new(io::ErrorKind::Other, "too many open files")),
        Ok(7),
        Err(closed_listener_error()),
    ]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let token = CancellationToken::new();

    let handler_seen = Arc::clone(&seen);
    let started = tokio::time::Instant::now();
    let result = run(&token, &listener, "test", move |conn, _remote, _token| {
        let seen = Arc::clone(&handler_seen);
        async move {
            seen.lock().unwrap().push(conn);
            Ok::<(), Error>(())
        }
    })
    .await;

    assert!(matches!(result, Err(Error::ListenerClosed)));
    assert!(result.unwrap_err().is_shutdown());
    assert!(started.elapsed() >= ACCEPT_BACKOFF);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*seen.lock().unwrap(), vec![7]);
}

#[tokio::test]
async fn test_handler_receives_child_token() {
    let listener = ScriptedListener::new(vec![Ok(1)]);
    let token = CancellationToken::new();
    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = Mutex::new(Some(tx));

    let loop_token = token.clone();
    let run_loop = run(&loop_token, &listener, "test", move |_conn, _remote, child| {
        if let Some(tx) = tx.lock().unwrap().take() {
            let _ = tx.send(child);
        }
        async { Ok::<(), Error>(()) }
    });

    let checker = async {
        let child = rx.await.unwrap();
        assert!(!child.is_cancelled());
        token.cancel();
        child.cancelled().await;
    };

    let (result, ()) = tokio::join!(run_loop, checker);
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn test_tcp_listener_accepts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local = listener.local_addr().unwrap();
    let token = CancellationToken::new();
    let (tx, mut rx) = tokio::sync::mpsc::channel(4);

    let loop_token = token.clone();
    let task = tokio::spawn(async move {
        run(&loop_token, &listener, "tcp", move |conn: TcpStream, remote, _token| {
            let tx = tx.clone();
            async move {
                assert_eq!(conn.peer_addr().unwrap(), remote);
                tx.send(remote)
                    .await
                    .map_err(|e| Error::Configuration(e.to_string()))
            }
        })
        .await
    });

    let client = TcpStream::connect(local).await.unwrap();
    let remote = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remote, client.local_addr().unwrap());

    token.cancel();
    assert!(task.await.unwrap().unwrap_err().is_shutdown());
}

/// `io::Write` sink shared with the test for captured log output
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    fn lines_containing(&self, needle: &str) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

#[tokio::test]
async fn test_shutdown_handler_errors_are_not_logged_as_errors() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _default = tracing::subscriber::set_default(subscriber);

    let listener = ScriptedListener::new(vec![Ok(1), Ok(2), Err(closed_listener_error())]);
    let token = CancellationToken::new();
    let result = run(&token, &listener, "test", |conn, _remote, _token| async move {
        match conn {
            1 => Err(Error::Cancelled),
            _ => Err(Error::Configuration("pane vanished".into())),
        }
    })
    .await;
    assert!(matches!(result, Err(Error::ListenerClosed)));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let stopped = logs.lines_containing("stopped by shutdown");
    assert_eq!(stopped.len(), 1);
    assert!(stopped[0].contains("DEBUG"));

    let failed = logs.lines_containing("Connection handler failed");
    assert_eq!(failed.len(), 1);
    assert!(failed[0].contains("ERROR"));
    assert!(failed[0].contains("pane vanished"));
}
