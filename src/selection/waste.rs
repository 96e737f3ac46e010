//! Waste-optimized: run a handful of simple candidate sets and keep the
//! one minimising `waste = excess + change_cost`.

use crate::types::{SelectionOutcome, SelectionRequest, Utxo};

use super::{finish_selection, Selector};

/// See module docs.
#[derive(Debug, Default, Clone, Copy)]
pub struct WasteOptimized;

impl Selector for WasteOptimized {
    fn select(&self, utxos: &[Utxo], request: &SelectionRequest) -> SelectionOutcome {
        let candidates = [
            super::Accumulative.select(utxos, request),
            super::BranchAndBound.select(utxos, request),
            super::Blackjack.select(utxos, request),
        ];

        let best = candidates
            .into_iter()
            .filter_map(|outcome| match outcome {
                SelectionOutcome::Success(s) => Some(s),
                SelectionOutcome::Failure { .. } => None,
            })
            .min_by(|a, b| {
                a.waste_metric
                    .unwrap_or(f64::INFINITY)
                    .partial_cmp(&b.waste_metric.unwrap_or(f64::INFINITY))
                    .unwrap_or(core::cmp::Ordering::Equal)
            });

        match best {
            Some(s) => finish_selection(s.inputs, request, 0),
            None => super::Accumulative.select(utxos, request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{request, utxo};

    #[test]
    fn picks_lowest_waste_candidate() {
        let utxos = vec![utxo(100_000, 0), utxo(60_000, 1), utxo(40_000, 2)];
        let req = request(120_000, 10.0, 546);
        match WasteOptimized.select(&utxos, &req) {
            SelectionOutcome::Success(_) => {}
            other => panic!("expected success, got {other:?}"),
        }
    }
}
