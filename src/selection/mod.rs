//! UTXO selection algorithms and the dispatcher (spec §4.2).
//!
//! Every algorithm implements [`Selector`], a pure `select(utxos, request)
//! -> SelectionOutcome` contract mirroring the teacher crate's
//! `CoinSelectionAlgorithm` trait shape. The set of algorithms is closed and
//! bounded, so [`SelectorKind`] is a tagged enum rather than a trait object
//! (see DESIGN NOTES, spec §9).

mod accumulative;
mod blackjack;
mod bnb;
mod fifo_lifo;
mod knapsack;
pub mod parallel;
mod srd;
mod waste;

pub use accumulative::Accumulative;
pub use blackjack::Blackjack;
pub use bnb::BranchAndBound;
pub use fifo_lifo::{Fifo, Lifo};
pub use knapsack::Knapsack;
pub use srd::SingleRandomDraw;
pub use waste::WasteOptimized;

use bitcoin::Amount;
use rand_core::RngCore;

use crate::types::{
    FilterStrategy, SelectionFailureReason, SelectionOutcome, SelectionRequest, SelectionSuccess,
    ScriptType, Utxo,
};

/// Errors internal to the selection subsystem that are not selection
/// *failures* (those are carried in [`SelectionOutcome::Failure`]) but
/// programming/contract violations surfaced to the dispatcher.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SelectionError {
    /// An individual algorithm failed unexpectedly; the dispatcher falls
    /// back to [`Accumulative`] when this occurs.
    #[error("internal selector error: {0}")]
    Internal(String),
}

/// Pure contract implemented by every UTXO selection algorithm.
pub trait Selector {
    /// Select a subset of `utxos` (already filtered by the dispatcher)
    /// sufficient to satisfy `request`.
    fn select(&self, utxos: &[Utxo], request: &SelectionRequest) -> SelectionOutcome;
}

/// The closed set of selection algorithms, as a dispatchable tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    /// Iterate descending by value, add until `sum >= target + fee`.
    Accumulative,
    /// Exact changeless search (Bitcoin Core branch-and-bound).
    BranchAndBound,
    /// Scan for a subset summing to `target +/- epsilon`.
    Blackjack,
    /// Bounded-iteration subset minimising excess.
    Knapsack,
    /// Random shuffle, then accumulative.
    SingleRandomDraw,
    /// Oldest-first, accumulative.
    Fifo,
    /// Newest-first, accumulative.
    Lifo,
    /// Minimise `waste = excess + change_cost` over several candidates.
    WasteOptimized,
}

impl SelectorKind {
    /// All algorithms, in a stable order (used by the parallel selector to
    /// fan out, and by [`dispatch`]'s fallback).
    pub const ALL: [SelectorKind; 8] = [
        SelectorKind::Accumulative,
        SelectorKind::BranchAndBound,
        SelectorKind::Blackjack,
        SelectorKind::Knapsack,
        SelectorKind::SingleRandomDraw,
        SelectorKind::Fifo,
        SelectorKind::Lifo,
        SelectorKind::WasteOptimized,
    ];

    /// Run this algorithm with the default thread RNG.
    pub fn select(&self, utxos: &[Utxo], request: &SelectionRequest) -> SelectionOutcome {
        self.select_with_rng(utxos, request, &mut rand::thread_rng())
    }

    /// Run this algorithm with a caller-supplied RNG (used by
    /// [`SingleRandomDraw`] and by tests wanting determinism).
    pub fn select_with_rng(
        &self,
        utxos: &[Utxo],
        request: &SelectionRequest,
        rng: &mut impl RngCore,
    ) -> SelectionOutcome {
        match self {
            SelectorKind::Accumulative => Accumulative.select(utxos, request),
            SelectorKind::BranchAndBound => BranchAndBound.select(utxos, request),
            SelectorKind::Blackjack => Blackjack.select(utxos, request),
            SelectorKind::Knapsack => Knapsack.select(utxos, request),
            SelectorKind::SingleRandomDraw => SingleRandomDraw::new(rng).select(utxos, request),
            SelectorKind::Fifo => Fifo.select(utxos, request),
            SelectorKind::Lifo => Lifo.select(utxos, request),
            SelectorKind::WasteOptimized => WasteOptimized.select(utxos, request),
        }
    }
}

/// Default thread-RNG-backed selector kind, used when no algorithm has
/// been chosen by the caller or the dispatcher.
pub type DefaultSelector = Accumulative;

/// Pre-filter applied before any algorithm runs (spec §4.2): drop UTXOs
/// below `min_confirmations`, drop dust, and optionally drop below a
/// policy floor depending on `filter_strategy`.
pub fn prefilter(utxos: &[Utxo], request: &SelectionRequest) -> Vec<Utxo> {
    let min_conf = request.min_confirmations.unwrap_or(0);
    let policy_floor = match request.filter_strategy {
        FilterStrategy::Aggressive => Amount::ZERO,
        FilterStrategy::Moderate => request.dust_threshold,
        FilterStrategy::Conservative => request.dust_threshold * 2,
    };
    utxos
        .iter()
        .filter(|u| u.confirmations >= min_conf)
        .filter(|u| u.value > request.dust_threshold)
        .filter(|u| u.value > policy_floor || policy_floor == Amount::ZERO)
        .cloned()
        .collect()
}

/// Estimate the virtual size of a transaction spending `inputs` (classified
/// by script type) and producing `output_count` outputs, per the default
/// fee model in spec §4.2: `10 + 148*#P2PKH_in + 68*#segwit_in + 34*#out`.
pub fn estimate_vsize(inputs: &[Utxo], output_count: usize) -> u64 {
    let mut vsize = 10u64;
    for utxo in inputs {
        vsize += match utxo.script_type() {
            ScriptType::P2pkh => 148,
            ScriptType::P2wpkh
            | ScriptType::P2wsh
            | ScriptType::P2tr
            | ScriptType::P2shP2wpkh => 68,
            ScriptType::P2sh => 148,
            ScriptType::OpReturn => 0,
            ScriptType::Unknown => 148,
        };
    }
    vsize += 34 * output_count as u64;
    vsize
}

/// Sum of `inputs`' values.
pub fn total_value(inputs: &[Utxo]) -> Amount {
    inputs.iter().map(|u| u.value).sum()
}

/// Shared accumulative loop used by [`Fifo`], [`Lifo`], and
/// [`SingleRandomDraw`]: walk `ordered` in the given order, adding until
/// `sum >= target + fee`, stopping at the first sufficient set.
pub(crate) fn accumulate_in_order(ordered: Vec<Utxo>, request: &SelectionRequest) -> SelectionOutcome {
    let mut chosen = Vec::new();
    let mut sum = Amount::ZERO;

    for utxo in ordered {
        if let Some(cap) = request.max_inputs {
            if chosen.len() >= cap {
                break;
            }
        }
        sum += utxo.value;
        chosen.push(utxo);

        let vsize = estimate_vsize(&chosen, 1);
        let fee = Amount::from_sat((vsize as f64 * request.fee_rate).ceil() as u64);
        if sum >= request.target_value + fee {
            return finish_selection(chosen, request, 0);
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

/// Build a [`SelectionSuccess`] from a chosen subset of inputs, folding
/// change into the fee if it would be dust (spec §3 `SelectionOutcome`
/// invariants).
///
/// `extra_outputs` is the number of non-change recipient outputs already
/// accounted for in `request.target_value`.
pub fn finish_selection(
    inputs: Vec<Utxo>,
    request: &SelectionRequest,
    extra_outputs: usize,
) -> SelectionOutcome {
    let total = total_value(&inputs);

    // First pass: assume a change output exists.
    let vsize_with_change = estimate_vsize(&inputs, extra_outputs + 1);
    let fee_with_change = Amount::from_sat((vsize_with_change as f64 * request.fee_rate).ceil() as u64);

    let available_for_change = match total.checked_sub(request.target_value + fee_with_change) {
        Some(v) => v,
        None => {
            return SelectionOutcome::Failure {
                reason: SelectionFailureReason::InsufficientFunds {
                    needed: (request.target_value + fee_with_change).to_sat(),
                    available: total.to_sat(),
                },
                details: format!("{} inputs summed to {total}", inputs.len()),
            };
        }
    };

    let (fee, change, output_count, vsize) = if available_for_change > request.dust_threshold {
        (fee_with_change, available_for_change, extra_outputs + 1, vsize_with_change)
    } else {
        // Changeless: fold the excess into the fee.
        let vsize_no_change = estimate_vsize(&inputs, extra_outputs);
        let fee_no_change = total - request.target_value;
        (fee_no_change, Amount::ZERO, extra_outputs, vsize_no_change)
    };

    let input_count = inputs.len();
    let effective_fee_rate = fee.to_sat() as f64 / vsize.max(1) as f64;
    let waste = waste_metric(total, request.target_value, fee, change, request.fee_rate);

    SelectionOutcome::Success(SelectionSuccess {
        inputs,
        fee,
        change,
        total_value: total,
        input_count,
        output_count,
        estimated_vsize: vsize,
        effective_fee_rate,
        waste_metric: Some(waste),
    })
}

/// `waste = excess + change_cost` (spec §4.2/§4.3), where `excess` is the
/// amount left over beyond target+fee before folding into change, and
/// `change_cost` is the fee to spend the change output later (zero if
/// changeless).
pub fn waste_metric(
    total: Amount,
    target: Amount,
    fee: Amount,
    change: Amount,
    fee_rate: f64,
) -> f64 {
    let excess = total.to_sat() as f64 - target.to_sat() as f64 - fee.to_sat() as f64;
    let change_cost = if change > Amount::ZERO {
        crate::dust::spend_input_vsize(ScriptType::P2wpkh) as f64 * fee_rate
    } else {
        0.0
    };
    excess.max(0.0) + change_cost
}

/// Scenario -> algorithm dispatcher (spec §4.2): chooses an algorithm based
/// on UTXO count, target/total ratio, and fee-rate regime, falling back to
/// [`Accumulative`] on any internal failure.
pub fn dispatch(utxos: &[Utxo], request: &SelectionRequest) -> SelectionOutcome {
    dispatch_with_rng(utxos, request, &mut rand::thread_rng())
}

/// As [`dispatch`] but with an explicit RNG, for deterministic tests.
pub fn dispatch_with_rng(
    utxos: &[Utxo],
    request: &SelectionRequest,
    rng: &mut impl RngCore,
) -> SelectionOutcome {
    let filtered = prefilter(utxos, request);
    if filtered.is_empty() && !utxos.is_empty() {
        return SelectionOutcome::Failure {
            reason: SelectionFailureReason::DustOnly,
            details: "every candidate UTXO was filtered out as dust".into(),
        };
    }

    let total: Amount = total_value(&filtered);
    let kind = choose_kind(filtered.len(), total, request);

    match kind.select_with_rng(&filtered, request, rng) {
        SelectionOutcome::Success(s) => SelectionOutcome::Success(s),
        SelectionOutcome::Failure { reason, .. } if kind != SelectorKind::Accumulative => {
            // Fall back to accumulative on any algorithm-specific failure
            // other than a hard insufficient-funds (which accumulative
            // would also hit).
            match reason {
                SelectionFailureReason::InsufficientFunds { .. } => SelectionOutcome::Failure {
                    reason,
                    details: "insufficient funds".into(),
                },
                _ => Accumulative.select(&filtered, request),
            }
        }
        other => other,
    }
}

fn choose_kind(utxo_count: usize, total: Amount, request: &SelectionRequest) -> SelectorKind {
    if request.max_inputs.map(|m| utxo_count > m * 4).unwrap_or(false) {
        // Huge UTXO set relative to the input cap: knapsack bounds its
        // iteration count well.
        return SelectorKind::Knapsack;
    }
    let ratio = if total > Amount::ZERO {
        request.target_value.to_sat() as f64 / total.to_sat() as f64
    } else {
        1.0
    };
    if ratio > 0.9 {
        // Nearly draining the wallet: branch-and-bound's changeless search
        // shines here.
        SelectorKind::BranchAndBound
    } else if request.fee_rate >= 20.0 {
        // High fee-rate regime: minimise waste aggressively.
        SelectorKind::WasteOptimized
    } else if utxo_count <= 12 {
        SelectorKind::Blackjack
    } else {
        SelectorKind::Accumulative
    }
}
