//! Child-Pays-For-Parent builder (spec §4.6).
//!
//! Grounded on the teacher's `CPFPSet` (ancestor walk, `must_select_largest_
//! input_of_each_parent`, package fee/weight aggregation) but reworked
//! around raw [`Transaction`]/[`Utxo`] inputs instead of `bdk_chain::TxGraph`
//! ancestor traversal, since this crate has no chain-source abstraction.

use std::collections::HashSet;

use bitcoin::{Amount, Network, OutPoint, ScriptBuf, Transaction, Txid};

use crate::psbt::{PsbtBuilder, PsbtError};
use crate::selection::estimate_vsize;
use crate::types::{Output, ScriptType, Utxo};

/// Mempool package size limit (mirrors Bitcoin Core's unconfirmed-ancestor
/// cap) used as this crate's `PackageTooLarge` threshold.
pub const MAX_PACKAGE_SIZE: usize = 25;

/// Errors raised constructing or validating a CPFP package.
#[derive(Debug, thiserror::Error)]
pub enum CpfpError {
    /// Residual output value would fall below `min_output_value` or the
    /// destination's dust threshold.
    #[error("insufficient value for cpfp child output: {available} available, need >= {required}")]
    InsufficientValue {
        /// What remains after the required child fee.
        available: Amount,
        /// The floor the output must clear.
        required: Amount,
    },
    /// The dependency graph among parent transactions contains a cycle.
    #[error("circular dependency detected among parent transactions")]
    CircularDependency,
    /// A `parent_output` does not belong to any supplied parent transaction.
    #[error("outpoint {0} does not reference any parent transaction in the package")]
    NoParentLink(OutPoint),
    /// More parent transactions than [`MAX_PACKAGE_SIZE`] were supplied.
    #[error("package of {0} parents exceeds the maximum of {MAX_PACKAGE_SIZE}")]
    PackageTooLarge(usize),
    /// PSBT assembly of the child failed.
    #[error("psbt assembly failed: {0}")]
    Psbt(#[from] PsbtError),
}

/// A parent transaction plus the fee rate it confirmed (or was broadcast)
/// at, used to recover its absolute fee for package-rate accounting.
#[derive(Debug, Clone)]
pub struct ParentTx {
    /// The parent transaction.
    pub transaction: Transaction,
    /// Its fee rate, sat/vB.
    pub fee_rate: f64,
}

impl ParentTx {
    fn vsize(&self) -> u64 {
        self.transaction.vsize() as u64
    }

    fn fee(&self) -> Amount {
        Amount::from_sat((self.vsize() as f64 * self.fee_rate).round() as u64)
    }

    fn txid(&self) -> Txid {
        self.transaction.compute_txid()
    }
}

/// Parameters for building a CPFP child.
#[derive(Debug, Clone)]
pub struct CpfpConfig {
    /// Parent transactions in the package, each with its own fee rate.
    pub parents: Vec<ParentTx>,
    /// Which parent outputs the child spends.
    pub parent_outputs: Vec<Utxo>,
    /// Desired combined (parent + child) fee rate, sat/vB.
    pub target_package_fee_rate: f64,
    /// Where the child's single output goes.
    pub destination: ScriptBuf,
    /// Floor below which the child output is rejected, in addition to the
    /// destination's own dust threshold.
    pub min_output_value: Amount,
    /// Network, for the destination's dust floor.
    pub network: Network,
}

/// A validated CPFP package.
#[derive(Debug, Clone)]
pub struct CpfpPackage {
    /// The assembled (unsigned) child PSBT.
    pub psbt: bitcoin::Psbt,
    /// Combined parent + child vsize.
    pub total_vsize: u64,
    /// Combined parent + child fee.
    pub total_fee: Amount,
    /// `total_fee / total_vsize`.
    pub effective_fee_rate: f64,
    /// The child's own computed fee.
    pub child_fee: Amount,
    /// Non-fatal observations (oversized package, sub-1-sat/vB rate).
    pub warnings: Vec<String>,
}

/// Builds a CPFP child transaction for a package of parents.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpfpBuilder;

impl CpfpBuilder {
    /// Build and validate a CPFP package per spec §4.6's 7-step procedure.
    pub fn build(config: &CpfpConfig) -> Result<CpfpPackage, CpfpError> {
        if config.parents.len() > MAX_PACKAGE_SIZE {
            return Err(CpfpError::PackageTooLarge(config.parents.len()));
        }

        validate_acyclic(&config.parents)?;

        let parent_txids: HashSet<Txid> = config.parents.iter().map(ParentTx::txid).collect();
        for utxo in &config.parent_outputs {
            if !parent_txids.contains(&utxo.txid) {
                return Err(CpfpError::NoParentLink(utxo.outpoint()));
            }
        }

        // Step 1: aggregate the parent package.
        let parent_package_vsize: u64 = config.parents.iter().map(ParentTx::vsize).sum();
        let parent_package_fee: Amount = config.parents.iter().map(ParentTx::fee).sum();

        // Step 2: estimate the child spending every parent output with one
        // output to the destination.
        let child_vsize = estimate_vsize(&config.parent_outputs, 1);

        // Step 3 + 4: required total package fee, then required child fee.
        let required_total = Amount::from_sat(
            ((parent_package_vsize + child_vsize) as f64 * config.target_package_fee_rate).ceil()
                as u64,
        );
        let floor_child_fee = Amount::from_sat((child_vsize as f64).ceil() as u64);
        let required_child_fee = required_total
            .checked_sub(parent_package_fee)
            .unwrap_or(Amount::ZERO)
            .max(floor_child_fee);

        // Step 5: residual output value, checked against dust.
        let total_parent_output_value: Amount =
            config.parent_outputs.iter().map(|u| u.value).sum();
        let destination_dust = Amount::from_sat(crate::dust::dust_threshold(
            ScriptType::from_script(&config.destination),
            config.target_package_fee_rate,
            config.destination.len(),
            config.network,
        ));
        let required_floor = config.min_output_value.max(destination_dust);

        let output_value = total_parent_output_value
            .checked_sub(required_child_fee)
            .unwrap_or(Amount::ZERO);
        if output_value < required_floor {
            return Err(CpfpError::InsufficientValue {
                available: output_value,
                required: required_floor,
            });
        }

        // Step 6: assemble the child PSBT.
        let mut builder = PsbtBuilder::new(0);
        for utxo in &config.parent_outputs {
            builder.add_input(utxo.clone());
        }
        builder.add_output(Output::to_script(config.destination.clone(), output_value));
        let psbt = builder.build()?;

        let total_vsize = parent_package_vsize + child_vsize;
        let total_fee = parent_package_fee + required_child_fee;
        let effective_fee_rate = total_fee.to_sat() as f64 / total_vsize.max(1) as f64;

        let mut warnings = Vec::new();
        if total_vsize > 100_000 {
            warnings.push(format!(
                "package vsize {total_vsize} exceeds the 100,000 vbyte advisory limit"
            ));
        }
        if effective_fee_rate < 1.0 {
            warnings.push(format!(
                "effective package fee rate {effective_fee_rate:.3} sat/vB is below 1 sat/vB"
            ));
        }

        Ok(CpfpPackage {
            psbt,
            total_vsize,
            total_fee,
            effective_fee_rate,
            child_fee: required_child_fee,
            warnings,
        })
    }
}

/// Step 7: detect a cycle in the parent dependency graph (an edge `A -> B`
/// exists when `A` spends one of `B`'s outputs) via DFS with an explicit
/// recursion stack.
fn validate_acyclic(parents: &[ParentTx]) -> Result<(), CpfpError> {
    let index_by_txid: std::collections::HashMap<Txid, usize> = parents
        .iter()
        .enumerate()
        .map(|(i, p)| (p.txid(), i))
        .collect();

    let mut visited = vec![false; parents.len()];
    let mut on_stack = vec![false; parents.len()];

    for start in 0..parents.len() {
        if !visited[start] && dfs_has_cycle(start, parents, &index_by_txid, &mut visited, &mut on_stack) {
            return Err(CpfpError::CircularDependency);
        }
    }
    Ok(())
}

fn dfs_has_cycle(
    node: usize,
    parents: &[ParentTx],
    index_by_txid: &std::collections::HashMap<Txid, usize>,
    visited: &mut [bool],
    on_stack: &mut [bool],
) -> bool {
    visited[node] = true;
    on_stack[node] = true;

    for txin in &parents[node].transaction.input {
        if let Some(&dep) = index_by_txid.get(&txin.previous_output.txid) {
            if on_stack[dep] {
                return true;
            }
            if !visited[dep] && dfs_has_cycle(dep, parents, index_by_txid, visited, on_stack) {
                return true;
            }
        }
    }

    on_stack[node] = false;
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::utxo;
    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::transaction::Version;
    use bitcoin::{ScriptBuf, Sequence, TxIn, TxOut, WPubkeyHash};

    fn destination_script() -> ScriptBuf {
        ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([7u8; 20]))
    }

    fn parent_tx(spend: Option<OutPoint>, output_value: u64) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: spend.unwrap_or(OutPoint::new(
                    Txid::from_byte_array([0xffu8; 32]),
                    0,
                )),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: bitcoin::Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(output_value),
                script_pubkey: destination_script(),
            }],
        }
    }

    /// Spec §8 S6: parent vsize=200, fee=400 (2 sat/vB); child spends one
    /// parent output of 50_000 sat; target_package_fee_rate=10. Expect
    /// package fee rate >= 10 - 1.
    #[test]
    fn meets_target_package_rate() {
        let parent = parent_tx(None, 50_000);
        let parent_txid = parent.compute_txid();
        let parent_output = Utxo {
            txid: parent_txid,
            vout: 0,
            value: Amount::from_sat(50_000),
            script_pubkey: destination_script(),
            confirmations: 0,
            height: None,
        };

        let config = CpfpConfig {
            parents: vec![ParentTx {
                transaction: parent,
                fee_rate: 2.0,
            }],
            parent_outputs: vec![parent_output],
            target_package_fee_rate: 10.0,
            destination: destination_script(),
            min_output_value: Amount::from_sat(546),
            network: Network::Bitcoin,
        };

        let package = CpfpBuilder::build(&config).expect("package should build");
        assert!(package.effective_fee_rate >= 9.0);
    }

    #[test]
    fn rejects_output_below_dust() {
        let parent = parent_tx(None, 1_000);
        let parent_txid = parent.compute_txid();
        let parent_output = Utxo {
            txid: parent_txid,
            vout: 0,
            value: Amount::from_sat(1_000),
            script_pubkey: destination_script(),
            confirmations: 0,
            height: None,
        };

        let config = CpfpConfig {
            parents: vec![ParentTx {
                transaction: parent,
                fee_rate: 2.0,
            }],
            parent_outputs: vec![parent_output],
            target_package_fee_rate: 50.0,
            destination: destination_script(),
            min_output_value: Amount::from_sat(546),
            network: Network::Bitcoin,
        };

        match CpfpBuilder::build(&config) {
            Err(CpfpError::InsufficientValue { .. }) => {}
            other => panic!("expected InsufficientValue, got {other:?}"),
        }
    }

    #[test]
    fn detects_cycle_between_parents() {
        let other_placeholder_txid = Txid::from_byte_array([1u8; 32]);
        let mut parent_a = parent_tx(Some(OutPoint::new(other_placeholder_txid, 0)), 50_000);
        let mut parent_b = parent_tx(None, 50_000);

        // Wire parent_b to spend parent_a's output, then rewrite parent_a to
        // spend parent_b's output, forming a 2-cycle.
        let a_txid = parent_a.compute_txid();
        parent_b.input[0].previous_output = OutPoint::new(a_txid, 0);
        let b_txid = parent_b.compute_txid();
        parent_a.input[0].previous_output = OutPoint::new(b_txid, 0);

        let parent_output = utxo(50_000, 0);
        let config = CpfpConfig {
            parents: vec![
                ParentTx {
                    transaction: parent_a,
                    fee_rate: 2.0,
                },
                ParentTx {
                    transaction: parent_b,
                    fee_rate: 2.0,
                },
            ],
            parent_outputs: vec![parent_output],
            target_package_fee_rate: 10.0,
            destination: destination_script(),
            min_output_value: Amount::from_sat(546),
            network: Network::Bitcoin,
        };

        match CpfpBuilder::build(&config) {
            Err(CpfpError::CircularDependency) => {}
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }
}
