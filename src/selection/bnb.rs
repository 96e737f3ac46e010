//! Branch-and-bound: exact changeless search (Bitcoin Core's BnB).
//!
//! Explores subsets depth-first, pruning whenever the running sum exceeds
//! `target + cost_of_change`. Stops on an exact match within
//! `cost_of_change`, tie-breaking on lowest waste. Falls through to
//! [`super::Accumulative`] if no changeless match is found within the
//! search budget, since BnB is only guaranteed to find a changeless
//! solution when one exists cheaply.

use bitcoin::Amount;

use crate::types::{SelectionOutcome, SelectionRequest, Utxo};

use super::{finish_selection, Selector};

const MAX_TRIES: usize = 100_000;

/// See module docs.
#[derive(Debug, Default, Clone, Copy)]
pub struct BranchAndBound;

impl Selector for BranchAndBound {
    fn select(&self, utxos: &[Utxo], request: &SelectionRequest) -> SelectionOutcome {
        let mut sorted: Vec<Utxo> = utxos.to_vec();
        sorted.sort_by(|a, b| b.value.cmp(&a.value));

        let vsize_guess = super::estimate_vsize(&sorted, 0).max(1);
        let fee_guess = Amount::from_sat((vsize_guess as f64 * request.fee_rate).ceil() as u64);
        let target_with_fee = request.target_value + fee_guess;
        let cost_of_change = request.dust_threshold;

        let mut best: Option<(Vec<usize>, Amount)> = None;
        let mut tries = 0usize;

        bnb_search(
            &sorted,
            0,
            Amount::ZERO,
            &mut Vec::new(),
            target_with_fee,
            cost_of_change,
            &mut best,
            &mut tries,
        );

        match best {
            Some((indices, _waste)) => {
                let chosen: Vec<Utxo> = indices.into_iter().map(|i| sorted[i].clone()).collect();
                finish_selection(chosen, request, 0)
            }
            None => super::Accumulative.select(utxos, request),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn bnb_search(
    utxos: &[Utxo],
    index: usize,
    current_sum: Amount,
    current_set: &mut Vec<usize>,
    target_with_fee: Amount,
    cost_of_change: Amount,
    best: &mut Option<(Vec<usize>, Amount)>,
    tries: &mut usize,
) {
    *tries += 1;
    if *tries > MAX_TRIES {
        return;
    }

    if current_sum >= target_with_fee {
        let waste = current_sum - target_with_fee;
        if waste <= cost_of_change {
            if best.as_ref().map(|(_, w)| waste < *w).unwrap_or(true) {
                *best = Some((current_set.clone(), waste));
            }
        }
        return;
    }

    if index >= utxos.len() {
        return;
    }

    // Prune: even adding every remaining UTXO can't reach the target.
    let remaining: Amount = utxos[index..].iter().map(|u| u.value).sum();
    if current_sum + remaining < target_with_fee {
        return;
    }

    // Include utxos[index].
    current_set.push(index);
    bnb_search(
        utxos,
        index + 1,
        current_sum + utxos[index].value,
        current_set,
        target_with_fee,
        cost_of_change,
        best,
        tries,
    );
    current_set.pop();

    // Exclude utxos[index].
    bnb_search(
        utxos,
        index + 1,
        current_sum,
        current_set,
        target_with_fee,
        cost_of_change,
        best,
        tries,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{request, utxo};

    #[test]
    fn finds_exact_changeless_match() {
        let utxos = vec![utxo(50_000, 0), utxo(30_000, 1), utxo(21_000, 2)];
        let req = request(50_000, 1.0, 546);
        match BranchAndBound.select(&utxos, &req) {
            SelectionOutcome::Success(s) => assert_eq!(s.change, Amount::ZERO),
            other => panic!("expected changeless success, got {other:?}"),
        }
    }

    #[test]
    fn falls_back_when_no_changeless_match() {
        let utxos = vec![utxo(123_456, 0)];
        let req = request(50_000, 5.0, 546);
        match BranchAndBound.select(&utxos, &req) {
            SelectionOutcome::Success(_) => {}
            other => panic!("expected fallback success, got {other:?}"),
        }
    }
}
