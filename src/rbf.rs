//! Replace-By-Fee builder (spec §4.5, BIP-125).
//!
//! Grounded on the teacher's `rbf::RbfSet` (original-tx bookkeeping,
//! largest-input-per-original-tx selection) but reworked around this
//! crate's raw-UTXO data model instead of `CanonicalUnspents`/`Input`.

use std::collections::HashMap;

use bitcoin::{Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxOut};

use crate::psbt::{PsbtBuilder, PsbtError};
use crate::selection::{estimate_vsize, total_value};
use crate::types::Utxo;

/// Errors raised constructing or validating an RBF replacement.
#[derive(Debug, thiserror::Error)]
pub enum RbfError {
    /// The original transaction has no input signaling RBF
    /// (`sequence < 0xFFFFFFFE` on at least one input, BIP-125 rule 1).
    #[error("original transaction does not signal replaceability")]
    NotRbfSignaled,
    /// `target_fee_rate` (or the computed requirement) is below
    /// `original_fee_rate + min_fee_rate_increase`.
    #[error("insufficient fee bump: need >= {required} sat/vB, target is {target} sat/vB")]
    InsufficientFeeBump {
        /// The minimum acceptable replacement fee rate.
        required: f64,
        /// What was actually requested or computed.
        target: f64,
    },
    /// Not enough value available across kept + additional UTXOs to reach
    /// the required replacement fee.
    #[error("insufficient funds to cover the replacement fee bump")]
    InsufficientFundsForBump,
    /// Neither the original UTXOs nor an explicit `original_fee_rate` was
    /// available to establish the original transaction's fee (Open
    /// Question resolution: this crate never guesses a fallback rate).
    #[error("original transaction's fee could not be resolved; supply original_fee_rate")]
    UnresolvableOriginalFee,
    /// PSBT assembly of the replacement failed.
    #[error("psbt assembly failed: {0}")]
    Psbt(#[from] PsbtError),
}

/// Sequence value used on every input of a BIP-125 replacement, per
/// spec §4.5 step 3.
pub const RBF_SEQUENCE: Sequence = Sequence::ENABLE_RBF_NO_LOCKTIME;

/// Parameters for a single RBF replacement attempt.
#[derive(Debug, Clone)]
pub struct RbfConfig {
    /// Txid of the transaction being replaced (diagnostics only).
    pub original_txid: bitcoin::Txid,
    /// Minimum fee-rate increase over the original, in sat/vB.
    pub min_fee_rate_increase: f64,
    /// Upper bound the computed requirement is clamped to, if set.
    pub max_fee_rate: Option<f64>,
    /// Caller's desired replacement fee rate. Validated against the
    /// computed requirement; if omitted, the requirement itself is used.
    pub target_fee_rate: Option<f64>,
    /// Replace every input with a fresh selection, rather than keeping the
    /// original inputs and topping up.
    pub replace_all_inputs: bool,
    /// Extra UTXOs available to fund the fee bump (or the entire
    /// replacement, if `replace_all_inputs`).
    pub additional_utxos: Vec<Utxo>,
    /// Where to send any residual change.
    pub change_script: ScriptBuf,
    /// Explicit original fee rate, required when the original transaction's
    /// inputs cannot be resolved to known UTXO values.
    pub original_fee_rate: Option<f64>,
    /// Network, for dust-threshold floors on the change output.
    pub network: Network,
    /// Dust threshold for the change output.
    pub dust_threshold: Amount,
}

/// A validated RBF replacement.
#[derive(Debug, Clone)]
pub struct RbfReplacement {
    /// The assembled (unsigned) replacement PSBT.
    pub psbt: bitcoin::Psbt,
    /// Inputs the replacement spends.
    pub inputs: Vec<Utxo>,
    /// Replacement's absolute fee.
    pub fee: Amount,
    /// Replacement's fee rate, sat/vB.
    pub fee_rate: f64,
    /// The original transaction's fee, for comparison/diagnostics.
    pub original_fee: Amount,
    /// The original transaction's fee rate, for comparison/diagnostics.
    pub original_fee_rate: f64,
}

/// Builds a BIP-125 replacement for `original_tx`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RbfBuilder;

impl RbfBuilder {
    /// Build and validate a replacement.
    ///
    /// `original_input_utxos`, if provided, lets the builder resolve the
    /// original transaction's actual fee from known UTXO values; otherwise
    /// `config.original_fee_rate` must be set.
    pub fn build(
        original_tx: &Transaction,
        original_input_utxos: Option<&[Utxo]>,
        config: &RbfConfig,
    ) -> Result<RbfReplacement, RbfError> {
        if !original_tx.input.iter().any(|txin| txin.sequence.is_rbf()) {
            return Err(RbfError::NotRbfSignaled);
        }

        let original_vsize = original_tx.vsize() as u64;
        let (original_fee, original_fee_rate) =
            resolve_original_fee(original_tx, original_input_utxos, config, original_vsize)?;

        let mut required_fee_rate = original_fee_rate + config.min_fee_rate_increase;
        if let Some(max_rate) = config.max_fee_rate {
            required_fee_rate = required_fee_rate.min(max_rate);
        }
        let effective_fee_rate = config.target_fee_rate.unwrap_or(required_fee_rate);
        if config
            .target_fee_rate
            .is_some_and(|t| t < required_fee_rate)
        {
            return Err(RbfError::InsufficientFeeBump {
                required: required_fee_rate,
                target: effective_fee_rate,
            });
        }

        let total_output_value: Amount = original_tx.output.iter().map(|o| o.value).sum();

        let kept_inputs: Vec<Utxo> = if config.replace_all_inputs {
            Vec::new()
        } else {
            let resolved = original_input_utxos.ok_or(RbfError::UnresolvableOriginalFee)?;
            resolved.to_vec()
        };

        let mut pool: Vec<Utxo> = config.additional_utxos.clone();
        pool.sort_by(|a, b| b.value.cmp(&a.value));

        let chosen_inputs =
            gather_replacement_inputs(kept_inputs, &pool, total_output_value, effective_fee_rate)?;

        let final_vsize = estimate_vsize(&chosen_inputs, original_tx.output.len() + 1);
        let total_in = total_value(&chosen_inputs);
        let fee_with_change =
            Amount::from_sat((final_vsize as f64 * effective_fee_rate).ceil() as u64);
        let residual = total_in
            .checked_sub(total_output_value + fee_with_change)
            .ok_or(RbfError::InsufficientFundsForBump)?;

        let (fee, change) = if residual > config.dust_threshold {
            (fee_with_change, residual)
        } else {
            (total_in - total_output_value, Amount::ZERO)
        };
        let vsize = if change > Amount::ZERO {
            final_vsize
        } else {
            estimate_vsize(&chosen_inputs, original_tx.output.len())
        };
        let fee_rate = fee.to_sat() as f64 / vsize.max(1) as f64;

        if fee <= original_fee || fee_rate <= original_fee_rate {
            return Err(RbfError::InsufficientFeeBump {
                required: required_fee_rate,
                target: fee_rate,
            });
        }

        let mut builder = PsbtBuilder::new(0);
        for utxo in &chosen_inputs {
            builder.add_input_with_sequence(utxo.clone(), RBF_SEQUENCE);
        }
        for txout in replacement_outputs(original_tx, config, change) {
            builder.add_output(crate::types::Output::to_script(
                txout.script_pubkey,
                txout.value,
            ));
        }

        let psbt = builder.build()?;

        Ok(RbfReplacement {
            psbt,
            inputs: chosen_inputs,
            fee,
            fee_rate,
            original_fee,
            original_fee_rate,
        })
    }
}

/// Copy the original outputs, adjusting a trailing change-like output (one
/// whose script matches `config.change_script`) toward the new residual, or
/// appending a fresh change output when none matched and `change > 0`.
fn replacement_outputs(
    original_tx: &Transaction,
    config: &RbfConfig,
    change: Amount,
) -> Vec<TxOut> {
    let mut outputs = original_tx.output.clone();
    if let Some(existing) = outputs
        .iter_mut()
        .find(|o| o.script_pubkey == config.change_script)
    {
        existing.value = change;
        if change == Amount::ZERO {
            let script = config.change_script.clone();
            outputs.retain(|o| o.script_pubkey != script || o.value != Amount::ZERO);
        }
        return outputs;
    }
    if change > Amount::ZERO {
        outputs.push(TxOut {
            value: change,
            script_pubkey: config.change_script.clone(),
        });
    }
    outputs
}

fn resolve_original_fee(
    original_tx: &Transaction,
    original_input_utxos: Option<&[Utxo]>,
    config: &RbfConfig,
    vsize: u64,
) -> Result<(Amount, f64), RbfError> {
    if let Some(utxos) = original_input_utxos {
        let by_outpoint: HashMap<OutPoint, Amount> =
            utxos.iter().map(|u| (u.outpoint(), u.value)).collect();
        let resolvable = original_tx
            .input
            .iter()
            .all(|txin| by_outpoint.contains_key(&txin.previous_output));
        if resolvable {
            let total_in: Amount = original_tx
                .input
                .iter()
                .map(|txin| by_outpoint[&txin.previous_output])
                .sum();
            let total_out: Amount = original_tx.output.iter().map(|o| o.value).sum();
            let fee = total_in
                .checked_sub(total_out)
                .ok_or(RbfError::UnresolvableOriginalFee)?;
            let fee_rate = fee.to_sat() as f64 / vsize as f64;
            return Ok((fee, fee_rate));
        }
    }

    let fee_rate = config
        .original_fee_rate
        .ok_or(RbfError::UnresolvableOriginalFee)?;
    let fee = Amount::from_sat((fee_rate * vsize as f64).ceil() as u64);
    Ok((fee, fee_rate))
}

fn gather_replacement_inputs(
    mut chosen: Vec<Utxo>,
    pool: &[Utxo],
    total_output_value: Amount,
    fee_rate: f64,
) -> Result<Vec<Utxo>, RbfError> {
    let mut pool_iter = pool.iter().cloned();
    loop {
        let vsize = estimate_vsize(&chosen, 1);
        let fee = Amount::from_sat((vsize as f64 * fee_rate).ceil() as u64);
        let sum = total_value(&chosen);
        if sum >= total_output_value + fee {
            return Ok(chosen);
        }
        match pool_iter.next() {
            Some(utxo) => chosen.push(utxo),
            None => return Err(RbfError::InsufficientFundsForBump),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::utxo;
    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::transaction::Version;
    use bitcoin::{ScriptBuf, Sequence, TxIn, Txid, WPubkeyHash};

    fn change_script() -> ScriptBuf {
        ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([9u8; 20]))
    }

    /// Spec §8 S4: original tx with every input sequence=0xFFFFFFFF must be
    /// rejected as not RBF-signaled.
    #[test]
    fn rejects_non_signaling_original() {
        let original_input = utxo(140_000, 0);
        let original_tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: original_input.outpoint(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: bitcoin::Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(138_600),
                script_pubkey: change_script(),
            }],
        };

        let config = RbfConfig {
            original_txid: original_tx.compute_txid(),
            min_fee_rate_increase: 2.0,
            max_fee_rate: None,
            target_fee_rate: Some(15.0),
            replace_all_inputs: false,
            additional_utxos: vec![],
            change_script: change_script(),
            original_fee_rate: Some(10.0),
            network: Network::Bitcoin,
            dust_threshold: Amount::from_sat(546),
        };

        match RbfBuilder::build(&original_tx, Some(&[original_input]), &config) {
            Err(RbfError::NotRbfSignaled) => {}
            other => panic!("expected NotRbfSignaled, got {other:?}"),
        }
    }

    /// Spec §8 S5: original vsize=140, fee=1400 (10 sat/vB); config
    /// min_fee_rate_increase=2, target_fee_rate=15. Expect fee_rate >= 15
    /// and new_fee > 1400.
    #[test]
    fn accepts_sufficient_bump() {
        let original_input = utxo(140_000, 0);
        let original_tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: original_input.outpoint(),
                script_sig: ScriptBuf::new(),
                sequence: RBF_SEQUENCE,
                witness: bitcoin::Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(138_600),
                script_pubkey: change_script(),
            }],
        };

        let config = RbfConfig {
            original_txid: original_tx.compute_txid(),
            min_fee_rate_increase: 2.0,
            max_fee_rate: None,
            target_fee_rate: Some(15.0),
            replace_all_inputs: false,
            additional_utxos: vec![utxo(200_000, 1)],
            change_script: change_script(),
            original_fee_rate: Some(10.0),
            network: Network::Bitcoin,
            dust_threshold: Amount::from_sat(546),
        };

        let replacement = RbfBuilder::build(&original_tx, Some(&[original_input]), &config)
            .expect("replacement should succeed");
        assert!(replacement.fee_rate >= 15.0);
        assert!(replacement.fee > Amount::from_sat(1_400));
    }

    #[test]
    fn fee_rate_below_requirement_is_rejected() {
        let original_input = utxo(140_000, 0);
        let original_tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: original_input.outpoint(),
                script_sig: ScriptBuf::new(),
                sequence: RBF_SEQUENCE,
                witness: bitcoin::Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(138_600),
                script_pubkey: change_script(),
            }],
        };

        let config = RbfConfig {
            original_txid: Txid::from_byte_array([0u8; 32]),
            min_fee_rate_increase: 2.0,
            max_fee_rate: None,
            target_fee_rate: Some(11.0),
            replace_all_inputs: false,
            additional_utxos: vec![utxo(200_000, 1)],
            change_script: change_script(),
            original_fee_rate: Some(10.0),
            network: Network::Bitcoin,
            dust_threshold: Amount::from_sat(546),
        };

        match RbfBuilder::build(&original_tx, Some(&[original_input]), &config) {
            Err(RbfError::InsufficientFeeBump { .. }) => {}
            other => panic!("expected InsufficientFeeBump, got {other:?}"),
        }
    }
}
