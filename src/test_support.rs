//! Shared test fixtures for unit tests across modules. Not part of the
//! public API.

use bitcoin::hashes::Hash;
use bitcoin::{Amount, Network, ScriptBuf, Txid};

use crate::types::{FilterStrategy, SelectionRequest, Utxo};

/// A deterministic P2WPKH-shaped UTXO with the given value, keyed by
/// `vout` so multiple calls in one test produce distinct outpoints.
pub(crate) fn utxo(value: u64, vout: u32) -> Utxo {
    let txid = Txid::from_byte_array([vout as u8; 32]);
    Utxo {
        txid,
        vout,
        value: Amount::from_sat(value),
        script_pubkey: p2wpkh_script(),
        confirmations: 6,
        height: Some(800_000),
    }
}

/// A UTXO with explicit confirmations, for min-confirmation filter tests.
pub(crate) fn utxo_with_confirmations(value: u64, vout: u32, confirmations: u32) -> Utxo {
    Utxo {
        confirmations,
        ..utxo(value, vout)
    }
}

fn p2wpkh_script() -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_byte_array([1u8; 20]))
}

/// A basic mainnet [`SelectionRequest`] for the given target/fee_rate/dust.
pub(crate) fn request(target_value: u64, fee_rate: f64, dust_threshold: u64) -> SelectionRequest {
    SelectionRequest {
        target_value: Amount::from_sat(target_value),
        fee_rate,
        dust_threshold: Amount::from_sat(dust_threshold),
        min_confirmations: None,
        max_inputs: None,
        filter_strategy: FilterStrategy::Moderate,
        network: Network::Bitcoin,
    }
}
