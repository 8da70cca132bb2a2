//! JSON-RPC 2.0 transport for the aria2 control endpoint.
//!
//! [`RpcClient`] speaks aria2's JSON-RPC-over-HTTP dialect: requests are
//! POSTed as `{jsonrpc, id, method, params}` envelopes with the secret
//! token (when configured) prepended to `params`. Responses carry either
//! a `result` value or an `error` object; malformed bodies, HTTP-level
//! failures and RPC-level failures all map onto distinct [`RpcError`]
//! variants so callers branch on structure, not message text.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use uuid::Uuid;

/// HTTP request timeout for a single RPC call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Errors from the aria2 JSON-RPC layer.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The HTTP request never produced a usable response (connection
    /// refused/reset, DNS failure, timeout). Retryable.
    #[error("Daemon unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    /// The daemon answered with a non-success HTTP status and no
    /// JSON-RPC envelope in the body.
    #[error("Daemon returned HTTP {status}: {body}")]
    Protocol {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body was not a valid JSON-RPC envelope.
    #[error("Malformed RPC response: {0}")]
    MalformedResponse(String),

    /// The daemon reported an RPC-level error.
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Daemon-supplied error message.
        message: String,
    },
}

impl RpcError {
    /// Whether this error is connectivity-class and worth retrying.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }

    /// Whether the daemon rejected the call because the gid is unknown.
    ///
    /// aria2 has no dedicated error code for this; it reports code 1 with
    /// a "GID ... is not found" message. This predicate is the single
    /// place that fact is encoded.
    pub fn is_unknown_gid(&self) -> bool {
        matches!(self, Self::Rpc { code: 1, message } if message.contains("not found"))
    }
}

// ---------------------------------------------------------------------------
// RpcClient
// ---------------------------------------------------------------------------

/// HTTP client for a single aria2 RPC endpoint.
#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    endpoint: String,
    secret: Option<String>,
}

impl RpcClient {
    /// Create a client for an RPC endpoint, e.g. `http://127.0.0.1:6800/jsonrpc`.
    pub fn new(endpoint: String, secret: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self {
            http,
            endpoint,
            secret,
        }
    }

    /// The endpoint URL this client talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Invoke one RPC method, deserializing the `result` field into `T`.
    ///
    /// The secret token is prepended to `params` when configured, per
    /// aria2's `token:<secret>` convention.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        mut params: Vec<Value>,
    ) -> Result<T, RpcError> {
        if let Some(secret) = &self.secret {
            params.insert(0, json!(format!("token:{secret}")));
        }
        let body = json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": method,
            "params": params,
        });

        let response = self.http.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        let payload: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) if !status.is_success() => {
                return Err(RpcError::Protocol {
                    status: status.as_u16(),
                    body: text,
                });
            }
            Err(e) => return Err(RpcError::MalformedResponse(format!("invalid JSON: {e}"))),
        };

        // aria2 wraps failures in the envelope even for non-2xx statuses,
        // so the error object takes precedence over the HTTP status.
        if let Some(err) = payload.get("error") {
            let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("<missing message>")
                .to_string();
            return Err(RpcError::Rpc { code, message });
        }

        let result = payload
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::MalformedResponse("missing result field".to_string()))?;

        serde_json::from_value(result)
            .map_err(|e| RpcError::MalformedResponse(format!("unexpected result shape: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    /// Read one HTTP request off the stream: headers plus a
    /// `Content-Length` body.
    async fn read_request(stream: &mut TcpStream) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.expect("read request");
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..header_end]);
                let content_length: usize = headers
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse().ok())
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        buf
    }

    /// Single-connection HTTP responder standing in for the daemon.
    ///
    /// Returns the endpoint URL and a receiver yielding the raw request.
    async fn spawn_responder(status_line: &'static str, body: String) -> (String, oneshot::Receiver<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind responder");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let request = read_request(&mut stream).await;
            let response = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len(),
            );
            stream.write_all(response.as_bytes()).await.expect("write response");
            stream.shutdown().await.ok();
            let _ = tx.send(request);
        });

        (format!("http://{addr}"), rx)
    }

    // -- call ----------------------------------------------------------------

    #[tokio::test]
    async fn call_deserializes_result_and_prepends_token() {
        let (endpoint, request_rx) = spawn_responder(
            "HTTP/1.1 200 OK",
            r#"{"jsonrpc":"2.0","id":"1","result":"2089b05ecca3d829"}"#.to_string(),
        )
        .await;

        let client = RpcClient::new(endpoint, Some("s3cret".to_string()));
        let gid: String = client
            .call("aria2.addUri", vec![json!(["https://example.com/a.mp4"])])
            .await
            .expect("call should succeed");

        assert_eq!(gid, "2089b05ecca3d829");

        let request = String::from_utf8(request_rx.await.expect("request captured")).unwrap();
        assert!(request.contains(r#""method":"aria2.addUri""#));
        assert!(request.contains("token:s3cret"));
    }

    #[tokio::test]
    async fn call_without_secret_sends_bare_params() {
        let (endpoint, request_rx) = spawn_responder(
            "HTTP/1.1 200 OK",
            r#"{"jsonrpc":"2.0","id":"1","result":{"version":"1.37.0"}}"#.to_string(),
        )
        .await;

        let client = RpcClient::new(endpoint, None);
        let _version: Value = client.call("aria2.getVersion", vec![]).await.unwrap();

        let request = String::from_utf8(request_rx.await.unwrap()).unwrap();
        assert!(!request.contains("token:"));
    }

    #[tokio::test]
    async fn rpc_error_envelope_maps_to_rpc_variant() {
        let (endpoint, _rx) = spawn_responder(
            "HTTP/1.1 200 OK",
            r#"{"jsonrpc":"2.0","id":"1","error":{"code":1,"message":"GID deadbeef is not found"}}"#
                .to_string(),
        )
        .await;

        let client = RpcClient::new(endpoint, None);
        let err = client
            .call::<Value>("aria2.tellStatus", vec![json!("deadbeef")])
            .await
            .unwrap_err();

        assert_matches!(err, RpcError::Rpc { code: 1, .. });
        assert!(err.is_unknown_gid());
        assert!(!err.is_connectivity());
    }

    #[tokio::test]
    async fn non_json_body_maps_to_malformed() {
        let (endpoint, _rx) =
            spawn_responder("HTTP/1.1 200 OK", "definitely not json".to_string()).await;

        let client = RpcClient::new(endpoint, None);
        let err = client.call::<Value>("aria2.getVersion", vec![]).await.unwrap_err();
        assert_matches!(err, RpcError::MalformedResponse(_));
    }

    #[tokio::test]
    async fn missing_result_maps_to_malformed() {
        let (endpoint, _rx) = spawn_responder(
            "HTTP/1.1 200 OK",
            r#"{"jsonrpc":"2.0","id":"1"}"#.to_string(),
        )
        .await;

        let client = RpcClient::new(endpoint, None);
        let err = client.call::<Value>("aria2.getVersion", vec![]).await.unwrap_err();
        assert_matches!(err, RpcError::MalformedResponse(_));
    }

    #[tokio::test]
    async fn http_error_with_non_json_body_maps_to_protocol() {
        let (endpoint, _rx) = spawn_responder(
            "HTTP/1.1 503 Service Unavailable",
            "daemon is overloaded".to_string(),
        )
        .await;

        let client = RpcClient::new(endpoint, None);
        let err = client.call::<Value>("aria2.getVersion", vec![]).await.unwrap_err();
        assert_matches!(err, RpcError::Protocol { status: 503, .. });
    }

    #[tokio::test]
    async fn connection_refused_maps_to_unreachable() {
        // Bind then drop to find a port nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = RpcClient::new(format!("http://{addr}"), None);
        let err = client.call::<Value>("aria2.getVersion", vec![]).await.unwrap_err();
        assert!(err.is_connectivity());
        assert_matches!(err, RpcError::Unreachable(_));
    }
}
