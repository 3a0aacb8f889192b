/// Common utilities for integration tests
use async_trait::async_trait;
use forward_proxy::h1::{RequestHead, ResponseHead};
use forward_proxy::{
    ConnectionHandler, Dialer, HandlerOptions, ProxyConfig, ProxyError, ProxyListener,
    ProxyObserver, ProxyServer, ShutdownHandle,
};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Default timeout for a single test step
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Generate temporary certificate files for testing
pub fn generate_test_certs() -> (PathBuf, PathBuf) {
    use forward_proxy::tls;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let temp_dir = std::env::temp_dir();
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);
    let unique_id = format!("{}-{}-{}", timestamp, counter, std::process::id());

    let cert_path = temp_dir.join(format!("proxy-test-cert-{}.pem", unique_id));
    let key_path = temp_dir.join(format!("proxy-test-key-{}.pem", unique_id));

    tls::generate_self_signed_cert(
        "localhost",
        &["127.0.0.1".to_string(), "localhost".to_string()],
        &cert_path,
        &key_path,
    )
    .expect("Failed to generate test certificates");

    (cert_path, key_path)
}

/// Cleanup function for test resources
pub struct TestCleanup {
    paths: Vec<PathBuf>,
}

impl TestCleanup {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl Drop for TestCleanup {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Observer that records the events the proxy reports
#[derive(Default)]
pub struct RecordingObserver {
    pub requests: Mutex<Vec<(String, String)>>,
    pub responses: Mutex<Vec<u16>>,
    pub handler_errors: Mutex<Vec<String>>,
    pub malformed_requests: Mutex<usize>,
    pub tunnels_closed: Mutex<Vec<(String, u64, u64)>>,
}

impl ProxyObserver for RecordingObserver {
    fn request(&self, _peer: SocketAddr, head: &RequestHead) {
        self.requests
            .lock()
            .unwrap()
            .push((head.method.to_string(), head.target.clone()));
    }

    fn response(&self, _peer: SocketAddr, head: &ResponseHead) {
        self.responses.lock().unwrap().push(head.status.as_u16());
    }

    fn tunnel_closed(&self, _peer: SocketAddr, target: &str, sent: u64, received: u64) {
        self.tunnels_closed
            .lock()
            .unwrap()
            .push((target.to_string(), sent, received));
    }

    fn handler_error(&self, _peer: SocketAddr, err: &ProxyError) {
        if err.is_malformed_request() {
            *self.malformed_requests.lock().unwrap() += 1;
        }
        self.handler_errors.lock().unwrap().push(err.to_string());
    }
}

/// Dialer that records every target and routes known targets to local servers
#[derive(Default)]
pub struct RecordingDialer {
    routes: HashMap<String, SocketAddr>,
    dialed: Mutex<Vec<String>>,
}

impl RecordingDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `target` to a local address; unrouted targets are refused
    pub fn route(mut self, target: &str, addr: SocketAddr) -> Self {
        self.routes.insert(target.to_string(), addr);
        self
    }

    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dialer for RecordingDialer {
    async fn dial(&self, addr: &str) -> io::Result<TcpStream> {
        self.dialed.lock().unwrap().push(addr.to_string());
        match self.routes.get(addr) {
            Some(local) => TcpStream::connect(local).await,
            None => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("no route to {}", addr),
            )),
        }
    }
}

/// A running proxy under test
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: ShutdownHandle,
    pub task: JoinHandle<forward_proxy::Result<()>>,
}

/// Bind a proxy on a random local port and run its accept loop
pub async fn start_proxy(
    mut config: ProxyConfig,
    dialer: Arc<RecordingDialer>,
    observer: Arc<RecordingObserver>,
) -> TestProxy {
    config.listen_addr = "127.0.0.1:0".to_string();

    let listener = ProxyListener::bind(&config)
        .await
        .expect("Failed to bind proxy listener");
    let handler = ConnectionHandler::new(HandlerOptions::from(&config), observer)
        .with_dialer(dialer);
    let server = ProxyServer::from_parts(listener, handler);

    let addr = server.local_addr().expect("Failed to get proxy address");
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(server.run());

    TestProxy {
        addr,
        shutdown,
        task,
    }
}

/// Create a simple echo server for testing
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind echo server");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
                let _ = writer.shutdown().await;
            });
        }
    });

    addr
}

/// Start a server that writes `greeting` and then closes its write side
///
/// It keeps reading until the peer closes as well.
pub async fn start_closing_server(greeting: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind closing server");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket.write_all(greeting).await.unwrap();
        socket.shutdown().await.unwrap();
        let mut rest = Vec::new();
        let _ = socket.read_to_end(&mut rest).await;
    });

    addr
}

/// Start a one-shot origin server
///
/// Reads a request head plus `body_len` bytes, replies with `response`,
/// then closes. The join handle yields the exact bytes it received.
pub async fn start_origin_server(
    body_len: usize,
    response: &'static [u8],
) -> (SocketAddr, JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind origin server");
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            if let Some(end) = find_head_end(&received) {
                if received.len() >= end + body_len {
                    break;
                }
            }
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }

        socket.write_all(response).await.unwrap();
        let _ = socket.shutdown().await;
        received
    });

    (addr, handle)
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// Read until EOF, treating a reset as EOF
pub async fn read_until_closed<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match timeout(STEP_TIMEOUT, stream.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) => break,
            Ok(Ok(n)) => out.extend_from_slice(&buf[..n]),
            Err(_) => panic!("Timeout waiting for connection to close"),
        }
    }
    out
}

/// Poll `condition` until it holds or the step timeout expires
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
