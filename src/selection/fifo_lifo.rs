//! FIFO / LIFO: accumulate oldest-first or newest-first by block height.
//! Both stop at the first sufficient set, same as [`super::Accumulative`],
//! differing only in candidate ordering.

use crate::types::{SelectionOutcome, SelectionRequest, Utxo};

use super::{accumulate_in_order, Selector};

/// Oldest UTXOs (lowest height, unconfirmed last) spent first.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fifo;

impl Selector for Fifo {
    fn select(&self, utxos: &[Utxo], request: &SelectionRequest) -> SelectionOutcome {
        let mut sorted: Vec<Utxo> = utxos.to_vec();
        sorted.sort_by_key(|u| u.height.unwrap_or(u32::MAX));
        accumulate_in_order(sorted, request)
    }
}

/// Newest UTXOs (highest height, unconfirmed first) spent first.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lifo;

impl Selector for Lifo {
    fn select(&self, utxos: &[Utxo], request: &SelectionRequest) -> SelectionOutcome {
        let mut sorted: Vec<Utxo> = utxos.to_vec();
        sorted.sort_by_key(|u| core::cmp::Reverse(u.height.unwrap_or(u32::MAX)));
        accumulate_in_order(sorted, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::request;
    use bitcoin::hashes::Hash;
    use bitcoin::{Amount, ScriptBuf, Txid};
    use crate::types::Utxo;

    fn utxo_at_height(value: u64, vout: u32, height: u32) -> Utxo {
        Utxo {
            txid: Txid::from_byte_array([vout as u8; 32]),
            vout,
            value: Amount::from_sat(value),
            script_pubkey: ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_byte_array([1u8; 20])),
            confirmations: 6,
            height: Some(height),
        }
    }

    #[test]
    fn fifo_prefers_oldest() {
        let utxos = vec![
            utxo_at_height(100_000, 0, 100),
            utxo_at_height(100_000, 1, 50),
        ];
        let req = request(90_000, 1.0, 546);
        match Fifo.select(&utxos, &req) {
            SelectionOutcome::Success(s) => assert_eq!(s.inputs[0].height, Some(50)),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn lifo_prefers_newest() {
        let utxos = vec![
            utxo_at_height(100_000, 0, 100),
            utxo_at_height(100_000, 1, 50),
        ];
        let req = request(90_000, 1.0, 546);
        match Lifo.select(&utxos, &req) {
            SelectionOutcome::Success(s) => assert_eq!(s.inputs[0].height, Some(100)),
            other => panic!("expected success, got {other:?}"),
        }
    }
}
