//! PSBT assembly (BIP-174) atop [`bitcoin::psbt::Psbt`].
//!
//! Unlike the teacher's descriptor/`Plan`-keyed [`PsbtUpdater`], this
//! builder works directly from the crate's raw [`crate::types::Utxo`] /
//! [`crate::types::Output`] data model: callers supply scripts and
//! signatures/derivation paths externally, this crate never touches a key.
//!
//! [`PsbtUpdater`]: https://docs.rs/bdk_tx (teacher reference, not vendored)

pub mod finalizer;

use std::fmt;

use base64::Engine as _;
use bitcoin::absolute::LockTime;
use bitcoin::bip32::{DerivationPath, Fingerprint};
use bitcoin::psbt::{Input as PsbtInput, Output as PsbtOutput, PsbtSighashType};
use bitcoin::secp256k1::PublicKey;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Psbt, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid};

pub use finalizer::{FinalizeReport, Finalizer};

use crate::types::{Output, Utxo};

/// Errors raised assembling, combining, or (de)serializing a PSBT.
#[derive(Debug, thiserror::Error)]
pub enum PsbtError {
    /// `input_index` was outside the bounds of the PSBT's input vector.
    #[error("input index {0} out of range")]
    InputIndexOutOfRange(usize),
    /// An input is missing both `witness_utxo` and `non_witness_utxo`.
    #[error("input {0} missing witness_utxo/non_witness_utxo")]
    MissingUtxo(usize),
    /// A P2SH input is missing its `redeem_script`.
    #[error("input {0} missing redeem_script")]
    MissingRedeemScript(usize),
    /// A P2WSH input is missing its `witness_script`.
    #[error("input {0} missing witness_script")]
    MissingWitnessScript(usize),
    /// Two PSBTs being combined disagree on their unsigned transaction
    /// skeleton (inputs, outputs, version, or locktime).
    #[error("cannot combine PSBTs with differing transaction skeletons")]
    CombineMismatch,
    /// An input could not be finalized by any registered finalizer.
    #[error("input {0} could not be finalized: {1}")]
    FinalizeFailed(usize, String),
    /// Extraction was attempted before every requested input was finalized.
    #[error("cannot extract transaction: not every input is finalized")]
    ExtractFailed,
    /// The underlying `bitcoin` PSBT construction failed.
    #[error("psbt construction error: {0}")]
    Psbt(#[from] bitcoin::psbt::Error),
    /// Base64 decode failure.
    #[error("invalid base64 psbt: {0}")]
    Base64(#[from] base64::DecodeError),
    /// Hex decode failure.
    #[error("invalid hex psbt: {0}")]
    Hex(String),
}

/// Internal correlation id for an in-flight build, used only for log
/// correlation. Never serialized into the PSBT or exposed via
/// `to_base64`/`to_hex`/`extract` (see Open Question resolution #3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildId(u64);

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "build#{}", self.0)
    }
}

/// Builds a [`Psbt`] from raw UTXOs and outputs.
///
/// Exclusively owns its `Psbt` until [`PsbtBuilder::extract`] or one of the
/// serialization helpers is called.
#[derive(Debug, Clone)]
pub struct PsbtBuilder {
    id: BuildId,
    version: Version,
    lock_time: LockTime,
    inputs: Vec<(TxIn, PsbtInput, Utxo)>,
    outputs: Vec<(TxOut, PsbtOutput)>,
}

impl PsbtBuilder {
    /// Start a new builder with default version 2 and zero locktime.
    pub fn new(id: u64) -> Self {
        Self {
            id: BuildId(id),
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// This builder's internal correlation id, for log lines only.
    pub fn build_id(&self) -> BuildId {
        self.id
    }

    /// Set the transaction's nLockTime.
    pub fn set_locktime(&mut self, locktime: LockTime) -> &mut Self {
        self.lock_time = locktime;
        self
    }

    /// Set the transaction version.
    pub fn set_version(&mut self, version: i32) -> &mut Self {
        self.version = Version(version);
        self
    }

    /// Add an input spending `utxo`, defaulting its sequence to
    /// [`Sequence::ENABLE_RBF_NO_LOCKTIME`] (0xffff_fffd) so the resulting
    /// transaction is RBF-signalable by default (spec §4.5 precondition).
    pub fn add_input(&mut self, utxo: Utxo) -> &mut Self {
        self.add_input_with_sequence(utxo, Sequence::ENABLE_RBF_NO_LOCKTIME)
    }

    /// Add an input with an explicit sequence number.
    ///
    /// Only sets `witness_utxo` when the output's structural script type
    /// carries a witness version (segwit v0/v1); a plain P2SH output's
    /// witness version isn't knowable until its redeem script is attached
    /// (see [`PsbtBuilder::set_redeem_script`]), and legacy inputs need
    /// `non_witness_utxo` instead, which the caller must supply via
    /// [`PsbtBuilder::set_non_witness_utxo`].
    pub fn add_input_with_sequence(&mut self, utxo: Utxo, sequence: Sequence) -> &mut Self {
        let txin = TxIn {
            previous_output: utxo.outpoint(),
            script_sig: ScriptBuf::new(),
            sequence,
            witness: bitcoin::Witness::new(),
        };
        let witness_utxo = match utxo.script_type() {
            crate::types::ScriptType::P2wpkh
            | crate::types::ScriptType::P2wsh
            | crate::types::ScriptType::P2tr => Some(TxOut {
                value: utxo.value,
                script_pubkey: utxo.script_pubkey.clone(),
            }),
            _ => None,
        };
        let psbt_input = PsbtInput {
            witness_utxo,
            ..Default::default()
        };
        self.inputs.push((txin, psbt_input, utxo));
        self
    }

    /// Set the nSequence of a previously-added input by its position.
    pub fn set_input_sequence(&mut self, index: usize, sequence: Sequence) -> Result<&mut Self, PsbtError> {
        let (txin, ..) = self
            .inputs
            .get_mut(index)
            .ok_or(PsbtError::InputIndexOutOfRange(index))?;
        txin.sequence = sequence;
        Ok(self)
    }

    /// Attach a redeem script to an input that spends a P2SH (or
    /// nested-segwit P2SH-P2WPKH) output.
    ///
    /// A nested P2WPKH redeem script also carries a witness version, so
    /// this backfills `witness_utxo` (unset by [`PsbtBuilder::add_input`]
    /// for plain P2SH, since the witness version isn't knowable until now).
    pub fn set_redeem_script(&mut self, index: usize, redeem_script: ScriptBuf) -> Result<&mut Self, PsbtError> {
        let is_nested_segwit = crate::types::ScriptType::classify_p2sh(&redeem_script)
            == crate::types::ScriptType::P2shP2wpkh;
        let (_, psbt_input, utxo) = self
            .inputs
            .get_mut(index)
            .ok_or(PsbtError::InputIndexOutOfRange(index))?;
        if is_nested_segwit {
            psbt_input.witness_utxo = Some(TxOut {
                value: utxo.value,
                script_pubkey: utxo.script_pubkey.clone(),
            });
        }
        psbt_input.redeem_script = Some(redeem_script);
        Ok(self)
    }

    /// Attach a witness script to a P2WSH input (e.g. a multisig script).
    pub fn set_witness_script(&mut self, index: usize, witness_script: ScriptBuf) -> Result<&mut Self, PsbtError> {
        let (_, psbt_input, _) = self
            .inputs
            .get_mut(index)
            .ok_or(PsbtError::InputIndexOutOfRange(index))?;
        psbt_input.witness_script = Some(witness_script);
        Ok(self)
    }

    /// Attach a non-witness (full previous transaction) UTXO, required by
    /// some signers for legacy inputs.
    pub fn set_non_witness_utxo(&mut self, index: usize, tx: Transaction) -> Result<&mut Self, PsbtError> {
        let (_, psbt_input, _) = self
            .inputs
            .get_mut(index)
            .ok_or(PsbtError::InputIndexOutOfRange(index))?;
        psbt_input.non_witness_utxo = Some(tx);
        Ok(self)
    }

    /// Record a BIP-32 derivation entry on an input, for signers that need
    /// it to locate the right key.
    pub fn add_input_derivation(
        &mut self,
        index: usize,
        pubkey: PublicKey,
        fingerprint: Fingerprint,
        path: DerivationPath,
    ) -> Result<&mut Self, PsbtError> {
        let (_, psbt_input, _) = self
            .inputs
            .get_mut(index)
            .ok_or(PsbtError::InputIndexOutOfRange(index))?;
        psbt_input.bip32_derivation.insert(pubkey, (fingerprint, path));
        Ok(self)
    }

    /// Set the sighash type an input must be signed with.
    pub fn set_sighash_type(&mut self, index: usize, sighash: PsbtSighashType) -> Result<&mut Self, PsbtError> {
        let (_, psbt_input, _) = self
            .inputs
            .get_mut(index)
            .ok_or(PsbtError::InputIndexOutOfRange(index))?;
        psbt_input.sighash_type = Some(sighash);
        Ok(self)
    }

    /// Add a value-bearing output.
    pub fn add_output(&mut self, output: Output) -> &mut Self {
        let txout = TxOut {
            value: output.value,
            script_pubkey: output.script_pubkey(),
        };
        self.outputs.push((txout, PsbtOutput::default()));
        self
    }

    /// Convenience wrapper over [`PsbtBuilder::add_output`] for an
    /// `OP_RETURN` data-carrier output.
    pub fn add_op_return(&mut self, data: Vec<u8>) -> &mut Self {
        self.add_output(Output::op_return(data))
    }

    /// Record a BIP-32 derivation entry on an output (e.g. a change
    /// output), for signers/watch-only wallets tracking their own keys.
    pub fn add_output_derivation(
        &mut self,
        index: usize,
        pubkey: PublicKey,
        fingerprint: Fingerprint,
        path: DerivationPath,
    ) -> Result<&mut Self, PsbtError> {
        let (_, psbt_output) = self
            .outputs
            .get_mut(index)
            .ok_or(PsbtError::InputIndexOutOfRange(index))?;
        psbt_output.bip32_derivation.insert(pubkey, (fingerprint, path));
        Ok(self)
    }

    /// How many inputs have been added.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// How many outputs have been added.
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// The outpoints this builder's inputs spend, in order.
    pub fn outpoints(&self) -> Vec<OutPoint> {
        self.inputs.iter().map(|(txin, ..)| txin.previous_output).collect()
    }

    /// Assemble the unsigned transaction skeleton and wrap it in a [`Psbt`].
    pub fn build(&self) -> Result<Psbt, PsbtError> {
        let unsigned_tx = Transaction {
            version: self.version,
            lock_time: self.lock_time,
            input: self.inputs.iter().map(|(txin, ..)| txin.clone()).collect(),
            output: self.outputs.iter().map(|(txout, _)| txout.clone()).collect(),
        };

        let mut psbt = Psbt::from_unsigned_tx(unsigned_tx)?;
        for (index, (_, psbt_input, _)) in self.inputs.iter().enumerate() {
            psbt.inputs[index] = psbt_input.clone();
        }
        for (index, (_, psbt_output)) in self.outputs.iter().enumerate() {
            psbt.outputs[index] = psbt_output.clone();
        }
        Ok(psbt)
    }

    /// Combine two PSBTs signed independently for the same transaction
    /// (e.g. by two multisig cosigners). Errors with
    /// [`PsbtError::CombineMismatch`] if their unsigned transactions
    /// differ.
    pub fn combine(mut base: Psbt, other: Psbt) -> Result<Psbt, PsbtError> {
        if base.unsigned_tx != other.unsigned_tx {
            return Err(PsbtError::CombineMismatch);
        }
        base.combine(other).map_err(|_| PsbtError::CombineMismatch)?;
        Ok(base)
    }

    /// Extract the final, broadcastable [`Transaction`] from a fully
    /// finalized PSBT.
    pub fn extract(psbt: &Psbt) -> Result<Transaction, PsbtError> {
        if !psbt
            .inputs
            .iter()
            .all(|i| i.final_script_sig.is_some() || i.final_script_witness.is_some())
        {
            return Err(PsbtError::ExtractFailed);
        }
        psbt.clone()
            .extract_tx()
            .map_err(|_| PsbtError::ExtractFailed)
    }

    /// Txid of the (still unsigned) transaction skeleton this builder has
    /// assembled so far.
    pub fn unsigned_txid(&self) -> Result<Txid, PsbtError> {
        Ok(self.build()?.unsigned_tx.compute_txid())
    }
}

/// Serialize a [`Psbt`] to BIP-174 Base64.
pub fn to_base64(psbt: &Psbt) -> String {
    base64::engine::general_purpose::STANDARD.encode(psbt.serialize())
}

/// Parse a [`Psbt`] from BIP-174 Base64.
pub fn from_base64(s: &str) -> Result<Psbt, PsbtError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(s)?;
    Ok(Psbt::deserialize(&bytes)?)
}

/// Serialize a [`Psbt`] to BIP-174 hex.
pub fn to_hex(psbt: &Psbt) -> String {
    use bitcoin::hex::DisplayHex;
    psbt.serialize().to_lower_hex_string()
}

/// Parse a [`Psbt`] from BIP-174 hex.
pub fn from_hex(s: &str) -> Result<Psbt, PsbtError> {
    use bitcoin::hex::FromHex;
    let bytes = Vec::<u8>::from_hex(s).map_err(|e| PsbtError::Hex(e.to_string()))?;
    Ok(Psbt::deserialize(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::utxo;
    use crate::types::Output;
    use bitcoin::Amount;

    fn sample_builder() -> PsbtBuilder {
        let mut builder = PsbtBuilder::new(1);
        let input = utxo(100_000, 0);
        let change_script = input.script_pubkey.clone();
        builder.add_input(input);
        builder.add_output(Output::to_script(change_script, Amount::from_sat(90_000)));
        builder
    }

    #[test]
    fn build_round_trips_through_base64() {
        let psbt = sample_builder().build().expect("build");
        let encoded = to_base64(&psbt);
        let decoded = from_base64(&encoded).expect("decode");
        assert_eq!(psbt, decoded);
    }

    #[test]
    fn build_round_trips_through_hex() {
        let psbt = sample_builder().build().expect("build");
        let encoded = to_hex(&psbt);
        let decoded = from_hex(&encoded).expect("decode");
        assert_eq!(psbt, decoded);
    }

    #[test]
    fn combine_rejects_differing_skeletons() {
        let psbt_a = sample_builder().build().expect("build");
        let mut other_builder = PsbtBuilder::new(2);
        let other_input = utxo(50_000, 9);
        let other_script = other_input.script_pubkey.clone();
        other_builder.add_input(other_input);
        other_builder.add_output(Output::to_script(other_script, Amount::from_sat(40_000)));
        let psbt_b = other_builder.build().expect("build");

        match PsbtBuilder::combine(psbt_a, psbt_b) {
            Err(PsbtError::CombineMismatch) => {}
            other => panic!("expected CombineMismatch, got {other:?}"),
        }
    }

    #[test]
    fn extract_fails_before_finalization() {
        let psbt = sample_builder().build().expect("build");
        match PsbtBuilder::extract(&psbt) {
            Err(PsbtError::ExtractFailed) => {}
            other => panic!("expected ExtractFailed, got {other:?}"),
        }
    }
}
