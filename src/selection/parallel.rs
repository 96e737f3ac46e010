//! Parallel/racing meta-selector (spec §4.3): runs up to `max_concurrency`
//! algorithms concurrently, each under a per-algorithm timeout, and picks
//! the best `Success` outcome by a weighted quality score.

use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::types::{SelectionOutcome, SelectionRequest, SelectionSuccess, Utxo};

use super::SelectorKind;

/// How the parallel selector decides when to stop waiting on siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Return the first `Success`, but keep collecting for a brief grace
    /// period to compare against siblings that finish shortly after.
    Race {
        /// How long to keep collecting after the first success.
        grace: Duration,
    },
    /// Wait for every algorithm (or its timeout) before picking a winner.
    All,
}

/// Configuration for [`ParallelSelector`].
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Algorithms to race. Defaults to [`SelectorKind::ALL`].
    pub candidates: Vec<SelectorKind>,
    /// Max number of algorithms running concurrently.
    pub max_concurrency: usize,
    /// Per-algorithm timeout.
    pub per_algorithm_timeout: Duration,
    /// Race vs. all-then-pick.
    pub mode: Mode,
    /// If every algorithm fails or times out, fall back to running
    /// [`super::Accumulative`] sequentially.
    pub enable_fallback: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            candidates: SelectorKind::ALL.to_vec(),
            max_concurrency: 4,
            per_algorithm_timeout: Duration::from_millis(500),
            mode: Mode::Race {
                grace: Duration::from_millis(50),
            },
            enable_fallback: true,
        }
    }
}

/// Runs several [`SelectorKind`]s concurrently and scores their results.
#[derive(Debug, Clone, Default)]
pub struct ParallelSelector {
    config: ParallelConfig,
}

impl ParallelSelector {
    /// New selector with the given config.
    pub fn new(config: ParallelConfig) -> Self {
        Self { config }
    }

    /// Run the configured candidates against `utxos`/`request` and return
    /// the best outcome found, or a failure if every candidate failed.
    pub async fn select(&self, utxos: Vec<Utxo>, request: SelectionRequest) -> SelectionOutcome {
        let mut join_set: JoinSet<(SelectorKind, Option<SelectionOutcome>)> = JoinSet::new();
        let mut pending: Vec<SelectorKind> = self.config.candidates.clone();
        let mut in_flight = 0usize;
        let mut successes: Vec<(SelectorKind, SelectionSuccess)> = Vec::new();
        let mut any_success_seen = false;

        let spawn_next = |join_set: &mut JoinSet<(SelectorKind, Option<SelectionOutcome>)>,
                           pending: &mut Vec<SelectorKind>,
                           in_flight: &mut usize| {
            if let Some(kind) = pending.pop() {
                let utxos = utxos.clone();
                let request = request.clone();
                let per_algo_timeout = self.config.per_algorithm_timeout;
                join_set.spawn(async move {
                    let outcome = timeout(per_algo_timeout, async { kind.select(&utxos, &request) })
                        .await
                        .ok();
                    (kind, outcome)
                });
                *in_flight += 1;
            }
        };

        while in_flight < self.config.max_concurrency {
            spawn_next(&mut join_set, &mut pending, &mut in_flight);
            if pending.is_empty() {
                break;
            }
        }

        let mut grace_deadline: Option<tokio::time::Instant> = None;

        loop {
            let next = if let Some(deadline) = grace_deadline {
                tokio::select! {
                    res = join_set.join_next() => res,
                    _ = tokio::time::sleep_until(deadline) => break,
                }
            } else {
                join_set.join_next().await
            };

            let Some(joined) = next else { break };
            in_flight -= 1;
            spawn_next(&mut join_set, &mut pending, &mut in_flight);

            match joined {
                Ok((kind, Some(SelectionOutcome::Success(s)))) => {
                    debug!(?kind, waste = s.waste_metric, "selector succeeded");
                    any_success_seen = true;
                    if let Mode::Race { grace } = self.config.mode {
                        if grace_deadline.is_none() {
                            grace_deadline = Some(tokio::time::Instant::now() + grace);
                        }
                    }
                    successes.push((kind, s));
                }
                Ok((kind, Some(SelectionOutcome::Failure { reason, .. }))) => {
                    debug!(?kind, %reason, "selector failed");
                }
                Ok((kind, None)) => {
                    warn!(?kind, "selector timed out");
                }
                Err(e) => {
                    warn!(error = %e, "selector task panicked");
                }
            }

            if join_set.is_empty() {
                break;
            }
        }

        if let Some(best) = pick_best(&successes) {
            return SelectionOutcome::Success(best);
        }

        if !any_success_seen && self.config.enable_fallback {
            warn!("all parallel selectors failed; falling back to accumulative");
            return super::Accumulative.select(&utxos, &request);
        }

        SelectionOutcome::Failure {
            reason: crate::types::SelectionFailureReason::NoCombinationFound,
            details: "every parallel selector candidate failed or timed out".into(),
        }
    }
}

/// Score a candidate outcome per spec §4.3:
/// `quality = (normalize(waste) * (0.9 if change_kept else 1.0) + efficiency) / 2`,
/// `final = 0.4*quality + 0.3*efficiency + 0.3/(1+waste)`.
fn score(success: &SelectionSuccess, available_value: f64) -> f64 {
    let total = success.total_value.to_sat() as f64;
    let input_count = success.input_count.max(1) as f64;
    let efficiency = (total / available_value.max(1.0) + 1.0 / input_count) / 2.0;

    let waste = success.waste_metric.unwrap_or(0.0).max(0.0);
    let normalized_waste = waste / (waste + total.max(1.0));
    let change_penalty = if success.change_kept() { 0.9 } else { 1.0 };
    let quality = (normalized_waste * change_penalty + efficiency) / 2.0;

    0.4 * quality + 0.3 * efficiency + 0.3 / (1.0 + waste)
}

fn pick_best(successes: &[(SelectorKind, SelectionSuccess)]) -> Option<SelectionSuccess> {
    let available_value: f64 = successes
        .iter()
        .map(|(_, s)| s.total_value.to_sat() as f64)
        .fold(0.0, f64::max);

    successes
        .iter()
        .max_by(|(_, a), (_, b)| {
            score(a, available_value)
                .partial_cmp(&score(b, available_value))
                .unwrap_or(core::cmp::Ordering::Equal)
        })
        .map(|(_, s)| s.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{request, utxo};

    #[tokio::test]
    async fn race_mode_returns_a_success() {
        let utxos = vec![utxo(100_000, 0), utxo(60_000, 1), utxo(40_000, 2)];
        let req = request(120_000, 10.0, 546);
        let selector = ParallelSelector::new(ParallelConfig {
            max_concurrency: 4,
            ..Default::default()
        });
        match selector.select(utxos, req).await {
            SelectionOutcome::Success(_) => {}
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn falls_back_on_total_failure() {
        let utxos = vec![utxo(10_000, 0)];
        let req = request(50_000, 1.0, 546);
        let selector = ParallelSelector::new(ParallelConfig {
            candidates: vec![SelectorKind::Accumulative, SelectorKind::BranchAndBound],
            ..Default::default()
        });
        match selector.select(utxos, req).await {
            SelectionOutcome::Failure { .. } => {}
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
