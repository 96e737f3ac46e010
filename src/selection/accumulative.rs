//! Accumulative selection: iterate candidates descending by value, adding
//! until `sum >= target + fee`. Tie-break: fewest inputs (descending order
//! already minimises input count for a given target).

use bitcoin::Amount;

use crate::types::{SelectionFailureReason, SelectionOutcome, SelectionRequest, Utxo};

use super::{finish_selection, Selector};

/// See module docs.
#[derive(Debug, Default, Clone, Copy)]
pub struct Accumulative;

impl Selector for Accumulative {
    fn select(&self, utxos: &[Utxo], request: &SelectionRequest) -> SelectionOutcome {
        let mut sorted: Vec<Utxo> = utxos.to_vec();
        sorted.sort_by(|a, b| b.value.cmp(&a.value));

        let mut chosen = Vec::new();
        let mut sum = Amount::ZERO;

        for utxo in sorted {
            if let Some(cap) = request.max_inputs {
                if chosen.len() >= cap {
                    break;
                }
            }
            sum += utxo.value;
            chosen.push(utxo);

            let vsize = super::estimate_vsize(&chosen, 1);
            let fee = Amount::from_sat((vsize as f64 * request.fee_rate).ceil() as u64);
            if sum >= request.target_value + fee {
                return finish_selection(chosen, request, 0);
            }
        }

        if let Some(cap) = request.max_inputs {
            if chosen.len() >= cap {
                return SelectionOutcome::Failure {
                    reason: SelectionFailureReason::MaxInputsExceeded { max_inputs: cap },
                    details: "exhausted max_inputs before reaching target + fee".into(),
                };
            }
        }

        SelectionOutcome::Failure {
            reason: SelectionFailureReason::InsufficientFunds {
                needed: request.target_value.to_sat(),
                available: sum.to_sat(),
            },
            details: "accumulated all eligible UTXOs without reaching target".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{request, utxo};

    /// Spec §8 S1: UTXOs [100_000, 60_000, 40_000, 10_000], target=120_000,
    /// fee_rate=10, dust=546.
    #[test]
    fn happy_path_selects_two_largest() {
        let utxos = vec![
            utxo(100_000, 0),
            utxo(60_000, 1),
            utxo(40_000, 2),
            utxo(10_000, 3),
        ];
        let req = request(120_000, 10.0, 546);
        match Accumulative.select(&utxos, &req) {
            SelectionOutcome::Success(s) => {
                assert!(s.inputs.iter().any(|u| u.value.to_sat() == 100_000));
                assert!(s.inputs.iter().any(|u| u.value.to_sat() == 60_000));
                assert!(s.check_conservation(Amount::from_sat(120_000)));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    /// Spec §8 S2: UTXOs [10_000], target=50_000, fee_rate=1.
    #[test]
    fn insufficient_funds() {
        let utxos = vec![utxo(10_000, 0)];
        let req = request(50_000, 1.0, 546);
        match Accumulative.select(&utxos, &req) {
            SelectionOutcome::Failure {
                reason: SelectionFailureReason::InsufficientFunds { .. },
                ..
            } => {}
            other => panic!("expected insufficient funds, got {other:?}"),
        }
    }
}
