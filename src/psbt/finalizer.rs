//! Per-input finalizer registry (spec §4.4), keyed by script type rather
//! than by a miniscript `Plan` as the teacher's `Finalizer` is keyed.
//!
//! Covers P2PKH, P2WPKH, P2SH-P2WPKH (nested segwit), and P2WSH k-of-n
//! multisig. Anything else fails with [`PsbtError::FinalizeFailed`]; this
//! crate does not attempt miniscript-general satisfaction.

use bitcoin::opcodes::all::{OP_PUSHNUM_1, OP_PUSHNUM_16};
use bitcoin::opcodes::Opcode;
use bitcoin::script::{Builder, Instruction, PushBytesBuf, Script, ScriptBuf};
use bitcoin::{ecdsa, Psbt, Transaction, Txid, Witness};

use super::PsbtError;

/// Options controlling a [`Finalizer::finalize`] call.
#[derive(Debug, Clone, Default)]
pub struct FinalizeOptions {
    /// Only attempt to finalize these input indices. `None` means every
    /// input.
    pub indices: Option<Vec<usize>>,
    /// Extract the final transaction if (and only if) every requested
    /// index finalized successfully.
    pub extract: bool,
}

/// Outcome of a [`Finalizer::finalize`] call.
#[derive(Debug, Clone)]
pub struct FinalizeReport {
    /// Whether every requested input finalized.
    pub success: bool,
    /// How many inputs finalized (including ones already final on entry).
    pub finalized_count: usize,
    /// Indices that failed to finalize.
    pub failed_indices: Vec<usize>,
    /// `(index, error)` pairs for failed indices.
    pub errors: Vec<(usize, PsbtError)>,
    /// The extracted transaction, present only if `extract` was requested
    /// and every requested input finalized.
    pub transaction: Option<Transaction>,
    /// Txid of the extracted transaction, if present.
    pub txid: Option<Txid>,
}

/// Stateless registry of per-script-type finalizers.
#[derive(Debug, Default, Clone, Copy)]
pub struct Finalizer;

impl Finalizer {
    /// Whether input `index` can be finalized as-is (without mutating
    /// `psbt`).
    pub fn can_finalize(psbt: &Psbt, index: usize) -> bool {
        let mut probe = psbt.clone();
        Self::finalize_input(&mut probe, index).unwrap_or(false)
    }

    /// Attempt to finalize a single input in place. Returns `Ok(true)` if
    /// finalized (or already final), `Ok(false)` only in cases this crate
    /// never produces (kept for API symmetry with the teacher's
    /// `FinalizeMap`), or `Err` describing why it could not be finalized.
    pub fn finalize_input(psbt: &mut Psbt, index: usize) -> Result<bool, PsbtError> {
        if index >= psbt.inputs.len() {
            return Err(PsbtError::InputIndexOutOfRange(index));
        }
        if psbt.inputs[index].final_script_sig.is_some()
            || psbt.inputs[index].final_script_witness.is_some()
        {
            return Ok(true);
        }

        let script_pubkey =
            prevout_script_pubkey(psbt, index).ok_or(PsbtError::MissingUtxo(index))?;

        if script_pubkey.is_p2pkh() {
            finalize_p2pkh(psbt, index)
        } else if script_pubkey.is_p2wpkh() {
            finalize_p2wpkh(psbt, index)
        } else if script_pubkey.is_p2sh() {
            let redeem_script = psbt.inputs[index]
                .redeem_script
                .clone()
                .ok_or(PsbtError::MissingRedeemScript(index))?;
            if redeem_script.is_p2wpkh() {
                finalize_p2sh_p2wpkh(psbt, index, redeem_script)
            } else {
                Err(PsbtError::FinalizeFailed(
                    index,
                    "unsupported P2SH redeem script (only nested P2WPKH is registered)".into(),
                ))
            }
        } else if script_pubkey.is_p2wsh() {
            finalize_p2wsh_multisig(psbt, index)
        } else {
            Err(PsbtError::FinalizeFailed(
                index,
                "no finalizer registered for this script type".into(),
            ))
        }
    }

    /// Attempt to finalize every requested input, extracting the final
    /// transaction if `options.extract` is set and every requested input
    /// succeeded.
    pub fn finalize(psbt: &mut Psbt, options: FinalizeOptions) -> FinalizeReport {
        let indices = options
            .indices
            .clone()
            .unwrap_or_else(|| (0..psbt.inputs.len()).collect());

        let mut finalized_count = 0;
        let mut failed_indices = Vec::new();
        let mut errors = Vec::new();

        for index in indices.iter().copied() {
            match Self::finalize_input(psbt, index) {
                Ok(true) => finalized_count += 1,
                Ok(false) => {
                    failed_indices.push(index);
                }
                Err(e) => {
                    failed_indices.push(index);
                    errors.push((index, e));
                }
            }
        }

        let success = failed_indices.is_empty();
        let (transaction, txid) = if success && options.extract {
            match super::PsbtBuilder::extract(psbt) {
                Ok(tx) => {
                    let txid = tx.compute_txid();
                    (Some(tx), Some(txid))
                }
                Err(_) => (None, None),
            }
        } else {
            (None, None)
        };

        FinalizeReport {
            success,
            finalized_count,
            failed_indices,
            errors,
            transaction,
            txid,
        }
    }
}

fn prevout_script_pubkey(psbt: &Psbt, index: usize) -> Option<ScriptBuf> {
    let input = &psbt.inputs[index];
    if let Some(txout) = &input.witness_utxo {
        return Some(txout.script_pubkey.clone());
    }
    if let Some(tx) = &input.non_witness_utxo {
        let vout = psbt.unsigned_tx.input.get(index)?.previous_output.vout as usize;
        return tx.output.get(vout).map(|o| o.script_pubkey.clone());
    }
    None
}

fn serialize_ecdsa_sig(sig: &ecdsa::Signature) -> Vec<u8> {
    let mut bytes = sig.signature.serialize_der().to_vec();
    bytes.push(sig.sighash_type.to_u32() as u8);
    bytes
}

fn push_bytes(data: Vec<u8>) -> PushBytesBuf {
    PushBytesBuf::try_from(data).expect("signature/pubkey/script within the push-bytes limit")
}

fn finalize_p2pkh(psbt: &mut Psbt, index: usize) -> Result<bool, PsbtError> {
    let input = &psbt.inputs[index];
    if input.non_witness_utxo.is_none() {
        return Err(PsbtError::MissingUtxo(index));
    }
    let (pubkey, sig) = input
        .partial_sigs
        .iter()
        .next()
        .ok_or_else(|| PsbtError::FinalizeFailed(index, "no partial signature present".into()))?;
    let script_sig = Builder::new()
        .push_slice(push_bytes(serialize_ecdsa_sig(sig)))
        .push_slice(push_bytes(pubkey.to_bytes()))
        .into_script();

    let input = &mut psbt.inputs[index];
    input.final_script_sig = Some(script_sig);
    input.partial_sigs.clear();
    Ok(true)
}

fn finalize_p2wpkh(psbt: &mut Psbt, index: usize) -> Result<bool, PsbtError> {
    let input = &psbt.inputs[index];
    if input.witness_utxo.is_none() {
        return Err(PsbtError::MissingUtxo(index));
    }
    let (pubkey, sig) = input
        .partial_sigs
        .iter()
        .next()
        .ok_or_else(|| PsbtError::FinalizeFailed(index, "no partial signature present".into()))?;
    let witness = Witness::from_slice(&[serialize_ecdsa_sig(sig), pubkey.to_bytes()]);

    let input = &mut psbt.inputs[index];
    input.final_script_witness = Some(witness);
    input.partial_sigs.clear();
    Ok(true)
}

fn finalize_p2sh_p2wpkh(
    psbt: &mut Psbt,
    index: usize,
    redeem_script: ScriptBuf,
) -> Result<bool, PsbtError> {
    let input = &psbt.inputs[index];
    let (pubkey, sig) = input
        .partial_sigs
        .iter()
        .next()
        .ok_or_else(|| PsbtError::FinalizeFailed(index, "no partial signature present".into()))?;
    let witness = Witness::from_slice(&[serialize_ecdsa_sig(sig), pubkey.to_bytes()]);
    let script_sig = Builder::new()
        .push_slice(push_bytes(redeem_script.into_bytes()))
        .into_script();

    let input = &mut psbt.inputs[index];
    input.final_script_sig = Some(script_sig);
    input.final_script_witness = Some(witness);
    input.partial_sigs.clear();
    Ok(true)
}

fn finalize_p2wsh_multisig(psbt: &mut Psbt, index: usize) -> Result<bool, PsbtError> {
    let input = &psbt.inputs[index];
    let witness_script = input
        .witness_script
        .clone()
        .ok_or(PsbtError::MissingWitnessScript(index))?;
    let threshold = multisig_threshold(&witness_script).ok_or_else(|| {
        PsbtError::FinalizeFailed(index, "witness_script is not a standard multisig".into())
    })?;
    let ordered_pubkeys = multisig_pubkeys(&witness_script);

    let mut sigs = Vec::with_capacity(threshold);
    for pubkey_bytes in &ordered_pubkeys {
        if sigs.len() == threshold {
            break;
        }
        if let Some((_, sig)) = input
            .partial_sigs
            .iter()
            .find(|(pk, _)| pk.to_bytes() == *pubkey_bytes)
        {
            sigs.push(serialize_ecdsa_sig(sig));
        }
    }

    if sigs.len() < threshold {
        return Err(PsbtError::FinalizeFailed(
            index,
            format!(
                "only {} of {} required signatures present",
                sigs.len(),
                threshold
            ),
        ));
    }

    // OP_CHECKMULTISIG's off-by-one bug requires a dummy leading element.
    let mut witness_items: Vec<Vec<u8>> = Vec::with_capacity(sigs.len() + 2);
    witness_items.push(Vec::new());
    witness_items.extend(sigs);
    witness_items.push(witness_script.clone().into_bytes());
    let witness = Witness::from_slice(&witness_items);

    let input = &mut psbt.inputs[index];
    input.final_script_witness = Some(witness);
    input.partial_sigs.clear();
    Ok(true)
}

fn multisig_threshold(script: &Script) -> Option<usize> {
    match script.instructions().next()?.ok()? {
        Instruction::Op(op) => pushnum_to_usize(op),
        _ => None,
    }
}

fn pushnum_to_usize(op: Opcode) -> Option<usize> {
    let value = op.to_u8();
    if (OP_PUSHNUM_1.to_u8()..=OP_PUSHNUM_16.to_u8()).contains(&value) {
        Some((value - OP_PUSHNUM_1.to_u8() + 1) as usize)
    } else {
        None
    }
}

fn multisig_pubkeys(script: &Script) -> Vec<Vec<u8>> {
    script
        .instructions()
        .filter_map(|i| i.ok())
        .filter_map(|ins| match ins {
            Instruction::PushBytes(bytes) if matches!(bytes.len(), 33 | 65) => {
                Some(bytes.as_bytes().to_vec())
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psbt::PsbtBuilder;
    use crate::test_support::utxo;
    use crate::types::Output;
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
    use bitcoin::{Amount, PublicKey};

    fn signed_p2wpkh_psbt() -> (Psbt, usize) {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(&[0xab; 32]).unwrap();
        let public_key = PublicKey::new(secret_key.public_key(&secp));
        let script_pubkey = ScriptBuf::new_p2wpkh(&public_key.wpubkey_hash().unwrap());

        let mut input = utxo(100_000, 0);
        input.script_pubkey = script_pubkey.clone();

        let mut builder = PsbtBuilder::new(1);
        builder.add_input(input);
        builder.add_output(Output::to_script(script_pubkey, Amount::from_sat(90_000)));
        let mut psbt = builder.build().expect("build");

        let msg = Message::from_digest([7u8; 32]);
        let sig = secp.sign_ecdsa(&msg, &secret_key);
        psbt.inputs[0].partial_sigs.insert(
            public_key,
            ecdsa::Signature {
                signature: sig,
                sighash_type: bitcoin::sighash::EcdsaSighashType::All,
            },
        );

        (psbt, 0)
    }

    #[test]
    fn finalizes_p2wpkh_input() {
        let (mut psbt, index) = signed_p2wpkh_psbt();
        assert!(Finalizer::can_finalize(&psbt, index));
        let report = Finalizer::finalize(
            &mut psbt,
            FinalizeOptions {
                indices: None,
                extract: true,
            },
        );
        assert!(report.success);
        assert_eq!(report.finalized_count, 1);
        assert!(report.transaction.is_some());
        assert!(report.txid.is_some());
    }

    #[test]
    fn fails_without_signature() {
        let mut input = utxo(100_000, 0);
        input.script_pubkey =
            ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_byte_array([1u8; 20]));
        let mut builder = PsbtBuilder::new(2);
        let script = input.script_pubkey.clone();
        builder.add_input(input);
        builder.add_output(Output::to_script(script, Amount::from_sat(90_000)));
        let mut psbt = builder.build().expect("build");

        let report = Finalizer::finalize(
            &mut psbt,
            FinalizeOptions {
                indices: None,
                extract: false,
            },
        );
        assert!(!report.success);
        assert_eq!(report.failed_indices, vec![0]);
    }
}
