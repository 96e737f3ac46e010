//! Single-random-draw: shuffle candidates, then accumulate. Improves
//! privacy by not preferring any particular UTXO ordering.

use rand_core::RngCore;

use crate::types::{SelectionOutcome, SelectionRequest, Utxo};
use crate::util::shuffle_slice;

use super::{accumulate_in_order, Selector};

/// See module docs. Holds no RNG state itself (an RNG is supplied per
/// call); `new` exists only so [`SelectorKind`](super::SelectorKind) can
/// construct one uniformly alongside the zero-sized selectors.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleRandomDraw;

impl SingleRandomDraw {
    /// Construct with a caller-owned RNG reference, threaded through
    /// `select_with_rng` rather than stored (it may not be `Clone`/`'static`).
    pub fn new(_rng: &mut impl RngCore) -> Self {
        Self
    }

    /// Select using the supplied RNG for shuffling.
    pub fn select_with_rng(&self, utxos: &[Utxo], request: &SelectionRequest, rng: &mut impl RngCore) -> SelectionOutcome {
        let mut shuffled: Vec<Utxo> = utxos.to_vec();
        shuffle_slice(&mut shuffled, rng);
        accumulate_in_order(shuffled, request)
    }
}

impl Selector for SingleRandomDraw {
    fn select(&self, utxos: &[Utxo], request: &SelectionRequest) -> SelectionOutcome {
        self.select_with_rng(utxos, request, &mut rand::thread_rng())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{request, utxo};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn finds_a_selection_deterministically_with_seed() {
        let utxos = vec![utxo(100_000, 0), utxo(60_000, 1), utxo(40_000, 2)];
        let req = request(120_000, 5.0, 546);
        let mut rng: StdRng = SeedableRng::from_seed([7; 32]);
        match SingleRandomDraw.select_with_rng(&utxos, &req, &mut rng) {
            SelectionOutcome::Success(_) => {}
            other => panic!("expected success, got {other:?}"),
        }
    }
}
