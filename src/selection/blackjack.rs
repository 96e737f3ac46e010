//! Blackjack: scan combinations for a subset summing to `target +/-
//! epsilon` (a looser, faster cousin of branch-and-bound). Stops at the
//! first exact-or-within-epsilon match; tie-break is lowest waste, same as
//! branch-and-bound.

use bitcoin::Amount;

use crate::types::{SelectionOutcome, SelectionRequest, Utxo};

use super::{finish_selection, Selector};

/// See module docs.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blackjack;

impl Selector for Blackjack {
    fn select(&self, utxos: &[Utxo], request: &SelectionRequest) -> SelectionOutcome {
        let mut sorted: Vec<Utxo> = utxos.to_vec();
        sorted.sort_by(|a, b| b.value.cmp(&a.value));

        let epsilon = request.dust_threshold;
        let vsize_guess = super::estimate_vsize(&sorted, 0).max(1);
        let fee_guess = Amount::from_sat((vsize_guess as f64 * request.fee_rate).ceil() as u64);
        let target_with_fee = request.target_value + fee_guess;

        let mut best: Option<(Vec<Utxo>, Amount)> = None;
        let mut running = Vec::new();
        let mut sum = Amount::ZERO;

        for utxo in sorted {
            if let Some(cap) = request.max_inputs {
                if running.len() >= cap {
                    break;
                }
            }
            sum += utxo.value;
            running.push(utxo);

            if sum >= target_with_fee {
                let waste = sum - target_with_fee;
                if waste <= epsilon
                    && best.as_ref().map(|(_, w)| waste < *w).unwrap_or(true)
                {
                    best = Some((running.clone(), waste));
                }
                if waste == Amount::ZERO {
                    break;
                }
            }
        }

        match best {
            Some((chosen, _)) => finish_selection(chosen, request, 0),
            None => super::Accumulative.select(utxos, request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{request, utxo};

    #[test]
    fn finds_close_match() {
        let utxos = vec![utxo(50_546, 0), utxo(1_000_000, 1)];
        let req = request(50_000, 1.0, 546);
        match Blackjack.select(&utxos, &req) {
            SelectionOutcome::Success(s) => assert_eq!(s.inputs.len(), 1),
            other => panic!("expected success, got {other:?}"),
        }
    }
}
