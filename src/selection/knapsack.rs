//! Knapsack: a bounded-iteration heuristic subset search minimising excess
//! over the target, used when the candidate set is too large for
//! branch-and-bound to explore exhaustively.

use bitcoin::Amount;

use crate::types::{SelectionOutcome, SelectionRequest, Utxo};

use super::{finish_selection, Selector};

const MAX_ITERATIONS: usize = 1_000;

/// See module docs.
#[derive(Debug, Default, Clone, Copy)]
pub struct Knapsack;

impl Selector for Knapsack {
    fn select(&self, utxos: &[Utxo], request: &SelectionRequest) -> SelectionOutcome {
        let vsize_guess = super::estimate_vsize(utxos, 1).max(1);
        let fee_guess = Amount::from_sat((vsize_guess as f64 * request.fee_rate).ceil() as u64);
        let target_with_fee = request.target_value + fee_guess;

        let mut best: Option<Vec<Utxo>> = None;
        let mut best_excess = Amount::from_sat(u64::MAX);

        // Deterministic pseudo-randomized restarts: rotate the starting
        // offset each iteration to sample different subsets cheaply
        // without pulling in a full combinatorial search.
        let n = utxos.len().min(4096);
        let iterations = MAX_ITERATIONS.min(n.max(1));

        for offset in 0..iterations {
            let mut order: Vec<&Utxo> = utxos.iter().collect();
            order.rotate_left(offset % order.len().max(1));

            let mut sum = Amount::ZERO;
            let mut chosen = Vec::new();
            for utxo in order {
                if let Some(cap) = request.max_inputs {
                    if chosen.len() >= cap {
                        break;
                    }
                }
                if sum >= target_with_fee {
                    break;
                }
                sum += utxo.value;
                chosen.push(utxo.clone());
            }

            if sum >= target_with_fee {
                let excess = sum - target_with_fee;
                if excess < best_excess {
                    best_excess = excess;
                    best = Some(chosen);
                }
            }
        }

        match best {
            Some(chosen) => finish_selection(chosen, request, 0),
            None => super::Accumulative.select(utxos, request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{request, utxo};

    #[test]
    fn selects_minimal_excess() {
        let utxos: Vec<_> = (0..20).map(|i| utxo(10_000 + i * 1000, i as u32)).collect();
        let req = request(45_000, 2.0, 546);
        match Knapsack.select(&utxos, &req) {
            SelectionOutcome::Success(_) => {}
            other => panic!("expected success, got {other:?}"),
        }
    }
}
