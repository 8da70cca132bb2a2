use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use clipforge_aria2::config::Aria2Config;
use clipforge_aria2::retry::RetryPolicy;

/// Reply produced by a [`FakeRpcServer`] route for one call: either the
/// JSON-RPC result value or an (error code, message) pair.
pub type RouteReply = Result<Value, (i64, String)>;

/// Minimal JSON-RPC-over-HTTP daemon stand-in.
///
/// Each connection carries one request and is closed afterwards, so a
/// pooled HTTP client reconnects per call. Every call is routed through
/// the supplied closure and recorded for later assertions.
pub struct FakeRpcServer {
    pub port: u16,
    pub endpoint: String,
    received: Arc<Mutex<Vec<(String, Value)>>>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl FakeRpcServer {
    pub async fn start<F>(route: F) -> Self
    where
        F: Fn(&str, &Value) -> RouteReply + Send + Sync + 'static,
    {
        Self::bind_and_serve(0, route).await
    }

    /// Bind a specific port, retrying briefly so a restarted server can
    /// reclaim a port whose previous listener is still tearing down.
    pub async fn start_on<F>(port: u16, route: F) -> Self
    where
        F: Fn(&str, &Value) -> RouteReply + Send + Sync + 'static,
    {
        Self::bind_and_serve(port, route).await
    }

    async fn bind_and_serve<F>(port: u16, route: F) -> Self
    where
        F: Fn(&str, &Value) -> RouteReply + Send + Sync + 'static,
    {
        let addr = format!("127.0.0.1:{port}");
        let mut listener = TcpListener::bind(&addr).await;
        for _ in 0..20 {
            if listener.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            listener = TcpListener::bind(&addr).await;
        }
        let listener = listener.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
        let route: Arc<dyn Fn(&str, &Value) -> RouteReply + Send + Sync> = Arc::new(route);

        let calls = received.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let route = route.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    serve_one(socket, route, calls).await;
                });
            }
        });

        Self {
            port,
            endpoint: format!("http://127.0.0.1:{port}/jsonrpc"),
            received,
            accept_task,
        }
    }

    /// Drop the listener, releasing the port.
    pub fn stop(self) {
        self.accept_task.abort();
    }

    /// Every recorded (method, params) pair, in arrival order.
    pub fn received(&self) -> Vec<(String, Value)> {
        self.received.lock().unwrap().clone()
    }

    /// Params of every call to `method`, in arrival order.
    pub fn calls_of(&self, method: &str) -> Vec<Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == method)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

async fn serve_one(
    mut socket: TcpStream,
    route: Arc<dyn Fn(&str, &Value) -> RouteReply + Send + Sync>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
) {
    let Some(request) = read_request(&mut socket).await else {
        return;
    };
    let method = request["method"].as_str().unwrap_or_default().to_string();
    let params = request["params"].clone();
    let id = request["id"].clone();
    calls.lock().unwrap().push((method.clone(), params.clone()));

    let body = match route(&method, &params) {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err((code, message)) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message }
        }),
    }
    .to_string();

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Read one HTTP request off the socket and parse its JSON body.
async fn read_request(socket: &mut TcpStream) -> Option<Value> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
        let Some(header_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let headers = String::from_utf8_lossy(&buffer[..header_end]);
        let content_length = headers
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        let body_start = header_end + 4;
        if buffer.len() >= body_start + content_length {
            return serde_json::from_slice(&buffer[body_start..body_start + content_length]).ok();
        }
    }
}

/// Write an executable stand-in for aria2c that just stays alive.
///
/// The supervisor only needs a long-lived pid from the spawn; RPC
/// readiness comes from a [`FakeRpcServer`] bound to the configured port.
pub fn write_fake_daemon(dir: &Path) -> PathBuf {
    let path = dir.join("fake-aria2c");
    std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Build an [`Aria2Config`] rooted in `dir` with test-friendly timings.
pub fn test_config(dir: &Path, port: u16) -> Aria2Config {
    Aria2Config {
        binary: PathBuf::from("aria2c"),
        rpc_port: port,
        rpc_secret: None,
        state_dir: dir.join("state"),
        download_dir: dir.join("downloads"),
        max_concurrent_downloads: 5,
        startup_probe_attempts: 10,
        startup_probe_interval_ms: 50,
        lock_timeout_secs: 1,
        stop_grace_secs: 1,
        health_check_interval_secs: 1,
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        },
        transfer_restart_cap: 2,
    }
}
