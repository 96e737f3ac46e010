//! Line-delimited JSON-RPC 2.0 framing over an async byte stream (spec
//! §4.8 "Framing"), plus the address→scripthash transform ElectrumX keys
//! its UTXO/history/balance queries by.

use bitcoin::hashes::sha256;
use bitcoin::hashes::Hash;
use bitcoin::ScriptBuf;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// A request id, method name, and params tuple sent to the server.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Monotonically increasing per-connection id.
    pub id: u64,
    /// JSON-RPC method name, e.g. `blockchain.scripthash.listunspent`.
    pub method: String,
    /// Positional parameters.
    pub params: Vec<Value>,
}

/// A server's reply: either `result` or `error`, matched by `id`.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    /// Echoes the request id this responds to. Absent on unsolicited
    /// notifications (e.g. `blockchain.headers.subscribe` pushes).
    pub id: Option<u64>,
    /// The method name, present on notifications.
    #[serde(default)]
    pub method: Option<String>,
    /// Success payload.
    #[serde(default)]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object: `{code, message, data?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional extra structured data.
    #[serde(default)]
    pub data: Option<Value>,
}

impl Request {
    /// New request with an empty params list.
    pub fn new(id: u64, method: impl Into<String>) -> Self {
        Self {
            id,
            method: method.into(),
            params: Vec::new(),
        }
    }

    /// New request with the given positional params.
    pub fn with_params(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).expect("Request always serializes");
        line.push('\n');
        line
    }
}

/// A transport capable of sending one line-framed JSON-RPC request and
/// receiving line-framed responses. Implemented for any `AsyncRead +
/// AsyncWrite` pair (`TcpStream`, `tokio_rustls::TlsStream`); the WS/WSS
/// variant uses whole-frame JSON instead, via [`WsFrame`].
pub trait Frame: Send {
    /// Serialize and send `request`, followed by the line terminator.
    fn send(&mut self, request: &Request) -> impl std::future::Future<Output = std::io::Result<()>> + Send;

    /// Read and parse the next complete frame.
    fn recv(&mut self) -> impl std::future::Future<Output = std::io::Result<Response>> + Send;
}

/// Line-delimited JSON-RPC framing over any `AsyncRead + AsyncWrite` stream.
pub struct LineFrame<S> {
    stream: BufReader<S>,
    buffer: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> LineFrame<S> {
    /// Wrap a raw stream in line-delimited JSON-RPC framing.
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            buffer: Vec::new(),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Frame for LineFrame<S> {
    async fn send(&mut self, request: &Request) -> std::io::Result<()> {
        let line = request.to_line();
        self.stream.get_mut().write_all(line.as_bytes()).await?;
        self.stream.get_mut().flush().await
    }

    async fn recv(&mut self) -> std::io::Result<Response> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                let line = &line[..line.len() - 1];
                let response: Response = serde_json::from_slice(line).map_err(|e| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
                })?;
                return Ok(response);
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                ));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Whole-frame JSON transport over a `ws`/`wss` WebSocket stream (spec
/// §4.8: "framing changes to whole-frame JSON"): one JSON-RPC message per
/// WebSocket text frame, no newline terminator needed.
pub struct WsFrame<S> {
    inner: tokio_tungstenite::WebSocketStream<S>,
}

impl<S> WsFrame<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    /// Wrap an already-handshaken WebSocket stream in JSON-RPC framing.
    pub fn new(inner: tokio_tungstenite::WebSocketStream<S>) -> Self {
        Self { inner }
    }

    /// Unwrap back to the underlying WebSocket stream.
    pub fn into_inner(self) -> tokio_tungstenite::WebSocketStream<S> {
        self.inner
    }
}

impl<S> Frame for WsFrame<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, request: &Request) -> std::io::Result<()> {
        use futures_util::SinkExt;
        let text = serde_json::to_string(request)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        self.inner
            .send(tokio_tungstenite::tungstenite::Message::Text(text.into()))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }

    async fn recv(&mut self) -> std::io::Result<Response> {
        use futures_util::StreamExt;
        loop {
            let message = self.inner.next().await.ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "websocket closed")
            })?;
            let message = message
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
            match message {
                tokio_tungstenite::tungstenite::Message::Text(text) => {
                    return serde_json::from_str(&text).map_err(|e| {
                        std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
                    });
                }
                tokio_tungstenite::tungstenite::Message::Close(_) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "websocket closed by peer",
                    ));
                }
                _ => continue,
            }
        }
    }
}

/// Encode the scripthash ElectrumX keys a script pubkey's UTXOs/balance/
/// history by: SHA-256 the script, reverse the 32 bytes, hex-encode.
pub fn scripthash(script: &ScriptBuf) -> String {
    let digest = sha256::Hash::hash(script.as_bytes());
    let mut bytes = *digest.as_byte_array();
    bytes.reverse();
    bitcoin::hex::DisplayHex::to_lower_hex_string(bytes.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash as _;
    use bitcoin::WPubkeyHash;

    /// Spec §8 property 10: scripthash is a pure function of the script
    /// bytes, independent of anything else.
    #[test]
    fn scripthash_is_deterministic() {
        let script = ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([3u8; 20]));
        let a = scripthash(&script);
        let b = scripthash(&script);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn scripthash_differs_across_scripts() {
        let a = scripthash(&ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([1u8; 20])));
        let b = scripthash(&ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([2u8; 20])));
        assert_ne!(a, b);
    }

    #[test]
    fn request_serializes_with_params() {
        let req = Request::with_params(7, "server.version", vec![Value::from("tx-builder")]);
        let line = req.to_line();
        assert!(line.ends_with('\n'));
        assert!(line.contains("\"id\":7"));
    }
}
