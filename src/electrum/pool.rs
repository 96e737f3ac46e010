//! Connection pool, health scoring, circuit breaker, and load balancing
//! across multiple ElectrumX servers (spec §4.9).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::client::{Client, ClientConfig};
use super::PoolError;

/// Load-balancing strategy used to pick among healthy servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalanceStrategy {
    RoundRobin,
    Weighted,
    LeastConnections,
    #[default]
    HealthBased,
}

/// Per-server pool sizing and weighting.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub host: String,
    pub port: u16,
    pub min_connections: usize,
    pub max_connections: usize,
    pub weight: f64,
}

/// Pool-wide tuning (spec §4.9/§6).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_pool_size: usize,
    pub strategy: LoadBalanceStrategy,
    pub breaker_threshold: u32,
    pub breaker_timeout: Duration,
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_retry_delay: Duration,
    pub acquire_timeout: Duration,
    pub health_alpha: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 32,
            strategy: LoadBalanceStrategy::HealthBased,
            breaker_threshold: 5,
            breaker_timeout: Duration::from_secs(60),
            retry_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_retry_delay: Duration::from_secs(10),
            acquire_timeout: Duration::from_secs(5),
            health_alpha: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Rolling health statistics for one server, feeding the circuit breaker
/// and [`LoadBalanceStrategy::HealthBased`] scoring.
#[derive(Debug, Clone)]
pub struct ServerHealth {
    success_rate: f64,
    avg_response_time: Duration,
    consecutive_failures: u32,
    breaker: BreakerState,
    opened_at: Option<Instant>,
    in_use: usize,
    total: usize,
}

impl ServerHealth {
    fn new() -> Self {
        Self {
            success_rate: 1.0,
            avg_response_time: Duration::from_millis(100),
            consecutive_failures: 0,
            breaker: BreakerState::Closed,
            opened_at: None,
            in_use: 0,
            total: 0,
        }
    }

    fn record_success(&mut self, elapsed: Duration, alpha: f64) {
        self.success_rate = self.success_rate * (1.0 - alpha) + alpha;
        let elapsed_ms = elapsed.as_millis() as f64;
        let avg_ms = self.avg_response_time.as_millis() as f64;
        self.avg_response_time =
            Duration::from_millis((avg_ms * (1.0 - alpha) + elapsed_ms * alpha) as u64);
        self.consecutive_failures = 0;
        if self.breaker == BreakerState::HalfOpen {
            self.breaker = BreakerState::Closed;
        }
    }

    fn record_failure(&mut self, alpha: f64, threshold: u32) {
        self.success_rate *= 1.0 - alpha;
        self.consecutive_failures += 1;
        if self.consecutive_failures >= threshold {
            self.breaker = BreakerState::Open;
            self.opened_at = Some(Instant::now());
        }
    }

    fn maybe_half_open(&mut self, timeout: Duration) {
        if self.breaker == BreakerState::Open {
            if let Some(opened_at) = self.opened_at {
                if opened_at.elapsed() >= timeout {
                    self.breaker = BreakerState::HalfOpen;
                }
            }
        }
    }

    fn is_available(&self) -> bool {
        self.breaker != BreakerState::Open
    }

    /// `0.5*success_rate + 0.3*response_time_factor + 0.2*recent_failure_factor`.
    fn score(&self) -> f64 {
        let response_time_factor = 1.0 / (1.0 + self.avg_response_time.as_secs_f64());
        let recent_failure_factor = 1.0 / (1.0 + self.consecutive_failures as f64);
        0.5 * self.success_rate + 0.3 * response_time_factor + 0.2 * recent_failure_factor
    }
}

struct Slot {
    spec: ServerSpec,
    health: ServerHealth,
    clients: Vec<Client>,
}

struct PoolState {
    slots: Vec<Slot>,
    round_robin_cursor: usize,
}

/// A multi-server connection pool: picks a healthy server per
/// [`LoadBalanceStrategy`], scales connections with load, and isolates
/// failing servers behind a circuit breaker.
pub struct ConnectionPool {
    config: PoolConfig,
    state: Mutex<PoolState>,
    client_config: ClientConfig,
}

impl ConnectionPool {
    /// New pool over `servers`, with no connections opened yet.
    pub fn new(servers: Vec<ServerSpec>, config: PoolConfig, client_config: ClientConfig) -> Self {
        let slots = servers
            .into_iter()
            .map(|spec| Slot {
                spec,
                health: ServerHealth::new(),
                clients: Vec::new(),
            })
            .collect();
        Self {
            config,
            state: Mutex::new(PoolState {
                slots,
                round_robin_cursor: 0,
            }),
            client_config,
        }
    }

    fn total_connections(state: &PoolState) -> usize {
        state.slots.iter().map(|s| s.clients.len()).sum()
    }

    /// Pick the best available slot index per the configured strategy.
    fn choose_slot(&self, state: &mut PoolState) -> Option<usize> {
        let timeout = self.config.breaker_timeout;
        for slot in state.slots.iter_mut() {
            slot.health.maybe_half_open(timeout);
        }
        let candidates: Vec<usize> = state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.health.is_available())
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        match self.config.strategy {
            LoadBalanceStrategy::RoundRobin => {
                let idx = candidates[state.round_robin_cursor % candidates.len()];
                state.round_robin_cursor = state.round_robin_cursor.wrapping_add(1);
                Some(idx)
            }
            LoadBalanceStrategy::LeastConnections => candidates
                .into_iter()
                .min_by_key(|&i| state.slots[i].health.in_use),
            LoadBalanceStrategy::Weighted => candidates.into_iter().max_by(|&a, &b| {
                let wa = state.slots[a].health.score() * state.slots[a].spec.weight;
                let wb = state.slots[b].health.score() * state.slots[b].spec.weight;
                wa.partial_cmp(&wb).unwrap_or(std::cmp::Ordering::Equal)
            }),
            LoadBalanceStrategy::HealthBased => candidates.into_iter().max_by(|&a, &b| {
                let sa = state.slots[a].health.score() * state.slots[a].spec.weight.max(1.0);
                let sb = state.slots[b].health.score() * state.slots[b].spec.weight.max(1.0);
                sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
            }),
        }
    }

    /// Acquire a connection to the best available server, connecting lazily
    /// and scaling the slot's pool size with observed load (spec §4.9
    /// "dynamic scaling": `in_use/total > 0.8` eagerly opens another
    /// connection; `< 0.2` retires an idle one down to `min_connections`).
    pub async fn acquire(&self) -> Result<PooledConnection<'_>, PoolError> {
        let deadline = Instant::now() + self.config.acquire_timeout;
        loop {
            let slot_idx = {
                let mut state = self.state.lock().expect("pool state poisoned");
                self.choose_slot(&mut state)
            };
            let Some(slot_idx) = slot_idx else {
                return Err(PoolError::NoServersAvailable);
            };

            let needs_connect = {
                let state = self.state.lock().expect("pool state poisoned");
                let slot = &state.slots[slot_idx];
                let utilization = if slot.clients.is_empty() {
                    1.0
                } else {
                    slot.health.in_use as f64 / slot.clients.len() as f64
                };
                slot.clients.len() < slot.spec.min_connections
                    || (utilization > 0.8
                        && slot.clients.len() < slot.spec.max_connections
                        && Self::total_connections(&state) < self.config.max_pool_size)
            };

            if needs_connect {
                let (host, port) = {
                    let state = self.state.lock().expect("pool state poisoned");
                    let spec = &state.slots[slot_idx].spec;
                    (spec.host.clone(), spec.port)
                };
                match Client::connect_tcp(&host, port, self.client_config.clone()).await {
                    Ok(client) => {
                        let mut state = self.state.lock().expect("pool state poisoned");
                        state.slots[slot_idx].clients.push(client);
                    }
                    Err(e) => {
                        warn!(host, port, error = %e, "failed to open pooled connection");
                        let mut state = self.state.lock().expect("pool state poisoned");
                        state.slots[slot_idx]
                            .health
                            .record_failure(self.config.health_alpha, self.config.breaker_threshold);
                    }
                }
            }

            {
                let mut state = self.state.lock().expect("pool state poisoned");
                let slot = &mut state.slots[slot_idx];
                let dead = slot.clients.len() - slot.clients.iter().filter(|c| c.is_alive()).count();
                if dead > 0 {
                    slot.clients.retain(|c| c.is_alive());
                    debug!(host = %slot.spec.host, port = slot.spec.port, dead, "evicted dead pooled connections");
                }
                let picked = slot.clients.first().cloned();
                if let Some(client) = picked {
                    slot.health.in_use += 1;
                    slot.health.total = slot.clients.len();
                    debug!(host = %slot.spec.host, port = slot.spec.port, "acquired pooled connection");
                    return Ok(PooledConnection {
                        pool: self,
                        slot_idx,
                        started: Instant::now(),
                        client: Some(client),
                    });
                }
            }

            if Instant::now() >= deadline {
                return Err(PoolError::PoolExhausted);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn release(&self, slot_idx: usize, elapsed: Duration, success: bool) {
        let mut state = self.state.lock().expect("pool state poisoned");
        let slot = &mut state.slots[slot_idx];
        slot.health.in_use = slot.health.in_use.saturating_sub(1);
        if success {
            slot.health.record_success(elapsed, self.config.health_alpha);
        } else {
            slot.health
                .record_failure(self.config.health_alpha, self.config.breaker_threshold);
        }
        let utilization = if slot.clients.is_empty() {
            0.0
        } else {
            slot.health.in_use as f64 / slot.clients.len() as f64
        };
        if utilization < 0.2 && slot.clients.len() > slot.spec.min_connections {
            slot.clients.pop();
        }
    }

    /// Retry a unit of work across up to `min(2*servers, 2*retries)`
    /// attempts, backing off `retry_delay * backoff_multiplier^attempt`
    /// capped at `max_retry_delay`, until it succeeds or every server fails.
    pub async fn with_retry<T, E, F, Fut>(&self, mut work: F) -> Result<T, PoolError>
    where
        F: FnMut(&Client) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let servers = self.state.lock().expect("pool state poisoned").slots.len();
        let max_attempts = (2 * servers).max(2).min(2 * 5);
        let mut attempt = 0u32;
        let mut failures = 0usize;
        loop {
            let conn = self.acquire().await?;
            let start = Instant::now();
            match work(conn.client()).await {
                Ok(value) => {
                    conn.finish(true);
                    return Ok(value);
                }
                Err(_) => {
                    conn.finish(false);
                    failures += 1;
                    attempt += 1;
                    if attempt as usize >= max_attempts {
                        return Err(PoolError::AllServersFailed(failures));
                    }
                    let delay = self
                        .config
                        .retry_delay
                        .mul_f64(self.config.backoff_multiplier.powi(attempt as i32))
                        .min(self.config.max_retry_delay);
                    tokio::time::sleep(delay).await;
                    let _ = start;
                }
            }
        }
    }
}

/// A leased connection; reports its outcome back to the pool's health
/// tracker on [`PooledConnection::finish`] (or as a failure, implicitly, if
/// dropped without one).
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    slot_idx: usize,
    started: Instant,
    client: Option<Client>,
}

impl<'a> PooledConnection<'a> {
    /// The leased connection.
    pub fn client(&self) -> &Client {
        self.client.as_ref().expect("client taken")
    }

    /// Report the outcome of using this connection, releasing it back to
    /// the pool and updating the server's health score.
    pub fn finish(mut self, success: bool) {
        self.client.take();
        let elapsed = self.started.elapsed();
        self.pool.release(self.slot_idx, elapsed, success);
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if self.client.take().is_some() {
            self.pool.release(self.slot_idx, self.started.elapsed(), false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_score_favors_fewer_failures() {
        let mut healthy = ServerHealth::new();
        let mut unhealthy = ServerHealth::new();
        for _ in 0..3 {
            unhealthy.record_failure(0.1, 5);
        }
        assert!(healthy.score() > unhealthy.score());
        let _ = &mut healthy;
    }

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let mut health = ServerHealth::new();
        for _ in 0..5 {
            health.record_failure(0.1, 5);
        }
        assert!(!health.is_available());
    }

    #[test]
    fn breaker_half_opens_after_timeout() {
        let mut health = ServerHealth::new();
        for _ in 0..5 {
            health.record_failure(0.1, 5);
        }
        assert!(!health.is_available());
        health.maybe_half_open(Duration::from_millis(0));
        assert!(health.is_available());
    }
}
