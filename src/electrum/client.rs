//! ElectrumX client connection (spec §4.8): owns one socket, its
//! pending-request map, heartbeat, and auto-reconnect loop.
//!
//! Each connection is a small actor: a single `tokio::task` owns the
//! [`Frame`] exclusively (per §5 "per-connection socket I/O happens only
//! from the task that owns the connection") and callers talk to it over an
//! `mpsc` command channel, matched back to a `oneshot` reply by request id.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::codec::{Frame, LineFrame, Request};
use super::NetworkError;

/// A freshly (re)established [`Frame`], or why establishing one failed.
type ReconnectFuture<F> = Pin<Box<dyn Future<Output = Result<F, NetworkError>> + Send>>;

/// Client-side tuning knobs (spec §4.8/§6).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How often to probe the connection when idle.
    pub heartbeat_interval: Duration,
    /// Consecutive missed heartbeats before the connection is declared dead.
    pub max_missed_heartbeats: u32,
    /// Per-request deadline.
    pub request_timeout: Duration,
    /// Base reconnect delay; doubled per attempt up to a cap.
    pub base_reconnect_delay: Duration,
    /// Reconnect delay cap.
    pub max_reconnect_delay: Duration,
    /// Give up after this many reconnect attempts.
    pub max_reconnect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            max_missed_heartbeats: 3,
            request_timeout: Duration::from_secs(10),
            base_reconnect_delay: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_secs(30),
            max_reconnect_attempts: 8,
        }
    }
}

enum Command {
    Call {
        id: u64,
        method: String,
        params: Vec<Value>,
        respond_to: oneshot::Sender<Result<Value, NetworkError>>,
    },
    /// Sent when a caller's [`ClientConfig::request_timeout`] elapses
    /// before a response arrived (spec §5 "Cancellation": discards the
    /// pending entry so a late response has nowhere to go).
    Cancel { id: u64 },
}

/// A single ElectrumX connection, running its reader/writer actor on a
/// spawned task. Cheap to clone: every clone shares the same actor and
/// command channel.
#[derive(Clone)]
pub struct Client {
    command_tx: mpsc::UnboundedSender<Command>,
    alive: Arc<AtomicBool>,
    server: String,
    next_id: Arc<AtomicU64>,
    request_timeout: Duration,
}

impl Client {
    /// Open a plaintext TCP connection to `host:port`, handshake with
    /// `server.version`, and start its background actor. Unexpected closes
    /// are retried against the same `host:port` with exponential backoff
    /// (spec §4.8 "auto-reconnect") rather than tearing the client down.
    pub async fn connect_tcp(
        host: &str,
        port: u16,
        config: ClientConfig,
    ) -> Result<Self, NetworkError> {
        let server = format!("{host}:{port}");
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| NetworkError::ConnectionRefused(format!("{server}: {e}")))?;
        let frame = LineFrame::new(stream);
        let host = host.to_string();
        let reconnect_server = server.clone();
        let reconnect = move || -> ReconnectFuture<LineFrame<TcpStream>> {
            let host = host.clone();
            let server = reconnect_server.clone();
            Box::pin(async move {
                let stream = TcpStream::connect((host.as_str(), port))
                    .await
                    .map_err(|e| NetworkError::ConnectionRefused(format!("{server}: {e}")))?;
                Ok(LineFrame::new(stream))
            })
        };
        Ok(Self::spawn(frame, server, config, reconnect))
    }

    fn spawn<F: Frame + 'static>(
        frame: F,
        server: String,
        config: ClientConfig,
        reconnect: impl Fn() -> ReconnectFuture<F> + Send + Sync + 'static,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        let request_timeout = config.request_timeout;
        let actor = Actor {
            frame,
            pending: HashMap::new(),
            config,
            server: server.clone(),
            alive: alive.clone(),
            reconnect: Box::new(reconnect),
        };
        tokio::spawn(actor.run(command_rx));
        Self {
            command_tx,
            alive,
            server,
            next_id: Arc::new(AtomicU64::new(1)),
            request_timeout,
        }
    }

    /// This connection's server identifier (`host:port`), for diagnostics.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Whether the background actor believes the connection is still up.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Issue a JSON-RPC call and await its result, enforcing
    /// [`ClientConfig::request_timeout`] (spec §5 "Cancellation"): on
    /// expiry the pending entry is discarded and [`NetworkError::Timeout`]
    /// is surfaced unchanged, per spec §7.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, NetworkError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (respond_to, response) = oneshot::channel();
        self.command_tx
            .send(Command::Call {
                id,
                method: method.to_string(),
                params,
                respond_to,
            })
            .map_err(|_| NetworkError::Disconnected(self.server.clone()))?;

        match tokio::time::timeout(self.request_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NetworkError::Disconnected(self.server.clone())),
            Err(_) => {
                let _ = self.command_tx.send(Command::Cancel { id });
                Err(NetworkError::Timeout)
            }
        }
    }

    /// `blockchain.scripthash.listunspent(scripthash)`.
    pub async fn scripthash_listunspent(&self, scripthash: &str) -> Result<Value, NetworkError> {
        self.call(
            "blockchain.scripthash.listunspent",
            vec![Value::from(scripthash)],
        )
        .await
    }

    /// `blockchain.scripthash.get_balance(scripthash)`.
    pub async fn scripthash_get_balance(&self, scripthash: &str) -> Result<Value, NetworkError> {
        self.call(
            "blockchain.scripthash.get_balance",
            vec![Value::from(scripthash)],
        )
        .await
    }

    /// `blockchain.scripthash.get_history(scripthash)`.
    pub async fn scripthash_get_history(&self, scripthash: &str) -> Result<Value, NetworkError> {
        self.call(
            "blockchain.scripthash.get_history",
            vec![Value::from(scripthash)],
        )
        .await
    }

    /// `blockchain.transaction.get(txid, verbose)`.
    pub async fn transaction_get(&self, txid: &str, verbose: bool) -> Result<Value, NetworkError> {
        self.call(
            "blockchain.transaction.get",
            vec![Value::from(txid), Value::from(verbose)],
        )
        .await
    }

    /// `blockchain.transaction.broadcast(raw_tx_hex)`.
    pub async fn transaction_broadcast(&self, raw_tx_hex: &str) -> Result<Value, NetworkError> {
        self.call(
            "blockchain.transaction.broadcast",
            vec![Value::from(raw_tx_hex)],
        )
        .await
    }

    /// `blockchain.estimatefee(target)`, BTC/kB.
    pub async fn estimate_fee(&self, target: u32) -> Result<Value, NetworkError> {
        self.call("blockchain.estimatefee", vec![Value::from(target)])
            .await
    }

    /// `blockchain.headers.subscribe()`.
    pub async fn headers_subscribe(&self) -> Result<Value, NetworkError> {
        self.call("blockchain.headers.subscribe", Vec::new()).await
    }
}

struct Actor<F: Frame> {
    frame: F,
    pending: HashMap<u64, oneshot::Sender<Result<Value, NetworkError>>>,
    config: ClientConfig,
    server: String,
    alive: Arc<AtomicBool>,
    reconnect: Box<dyn Fn() -> ReconnectFuture<F> + Send + Sync>,
}

/// Why a connection's serve loop returned.
enum Disconnect {
    /// The command channel closed: every [`Client`] clone was dropped.
    ClientGone,
    /// The socket or heartbeat failed; reconnect should be attempted.
    ConnectionLost,
}

impl<F: Frame> Actor<F> {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        if let Err(e) = self.handshake().await {
            warn!(server = %self.server, error = %e, "initial handshake failed");
        }

        loop {
            match self.serve_connection(&mut command_rx).await {
                Disconnect::ClientGone => break,
                Disconnect::ConnectionLost => {
                    self.fail_pending(NetworkError::Disconnected(self.server.clone()));
                    self.alive.store(false, Ordering::Relaxed);
                    if self.reconnect_with_backoff().await.is_err() {
                        warn!(
                            server = %self.server,
                            attempts = self.config.max_reconnect_attempts,
                            "giving up after exhausting reconnect attempts"
                        );
                        self.fail_pending(NetworkError::ConnectionLost(self.server.clone()));
                        self.drain_commands(&mut command_rx, NetworkError::ConnectionLost(self.server.clone()));
                        return;
                    }
                    self.alive.store(true, Ordering::Relaxed);
                    if let Err(e) = self.handshake().await {
                        warn!(server = %self.server, error = %e, "post-reconnect handshake failed");
                    }
                }
            }
        }

        self.alive.store(false, Ordering::Relaxed);
        self.fail_pending(NetworkError::Disconnected(self.server.clone()));
    }

    async fn handshake(&mut self) -> std::io::Result<()> {
        self.frame
            .send(&Request::with_params(
                0,
                "server.version",
                vec![Value::from("tx-builder"), Value::from("1.4")],
            ))
            .await
    }

    /// Serve one physical connection until it fails or the client is
    /// dropped. Does not itself reconnect; the caller decides that.
    async fn serve_connection(
        &mut self,
        command_rx: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Disconnect {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut missed: u32 = 0;
        let mut traffic_since_tick = false;

        loop {
            tokio::select! {
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(Command::Call { id, method, params, respond_to }) => {
                            let request = Request::with_params(id, method.clone(), params);
                            if let Err(e) = self.frame.send(&request).await {
                                let _ = respond_to.send(Err(NetworkError::Disconnected(self.server.clone())));
                                warn!(server = %self.server, %method, error = %e, "send failed");
                                return Disconnect::ConnectionLost;
                            }
                            self.pending.insert(id, respond_to);
                        }
                        Some(Command::Cancel { id }) => {
                            self.pending.remove(&id);
                        }
                        None => return Disconnect::ClientGone,
                    }
                }
                received = self.frame.recv() => {
                    match received {
                        Ok(response) => {
                            traffic_since_tick = true;
                            missed = 0;
                            self.dispatch(response);
                        }
                        Err(e) => {
                            warn!(server = %self.server, error = %e, "connection closed");
                            return Disconnect::ConnectionLost;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if traffic_since_tick {
                        traffic_since_tick = false;
                        continue;
                    }
                    missed += 1;
                    debug!(server = %self.server, missed, "sending heartbeat ping");
                    if self
                        .frame
                        .send(&Request::new(0, "server.ping"))
                        .await
                        .is_err()
                        || missed >= self.config.max_missed_heartbeats
                    {
                        warn!(server = %self.server, "heartbeat failed, declaring connection dead");
                        return Disconnect::ConnectionLost;
                    }
                }
            }
        }
    }

    /// Reconnect with delay `base * 2^attempt`, capped at
    /// `max_reconnect_delay`, giving up after `max_reconnect_attempts`
    /// (spec §4.8 "auto-reconnect").
    async fn reconnect_with_backoff(&mut self) -> Result<(), ()> {
        let mut delay = self.config.base_reconnect_delay;
        for attempt in 1..=self.config.max_reconnect_attempts {
            debug!(server = %self.server, attempt, "attempting reconnect");
            match (self.reconnect)().await {
                Ok(frame) => {
                    self.frame = frame;
                    return Ok(());
                }
                Err(e) => {
                    warn!(server = %self.server, attempt, error = %e, "reconnect attempt failed");
                }
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.config.max_reconnect_delay);
        }
        Err(())
    }

    fn fail_pending(&mut self, error: NetworkError) {
        for (_, respond_to) in self.pending.drain() {
            let _ = respond_to.send(Err(error.clone()));
        }
    }

    fn drain_commands(&self, command_rx: &mut mpsc::UnboundedReceiver<Command>, error: NetworkError) {
        while let Ok(cmd) = command_rx.try_recv() {
            if let Command::Call { respond_to, .. } = cmd {
                let _ = respond_to.send(Err(error.clone()));
            }
        }
    }

    fn dispatch(&mut self, response: super::codec::Response) {
        let Some(id) = response.id else {
            debug!(server = %self.server, method = ?response.method, "ignoring notification");
            return;
        };
        let Some(respond_to) = self.pending.remove(&id) else {
            debug!(server = %self.server, id, "response for unknown/expired request id");
            return;
        };
        let result = match (response.result, response.error) {
            (_, Some(err)) => Err(NetworkError::ServerError {
                code: err.code,
                message: err.message,
            }),
            (Some(value), None) => Ok(value),
            (None, None) => Ok(Value::Null),
        };
        let _ = respond_to.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.max_missed_heartbeats, 3);
    }
}
