//! Core data model shared by every module: [`Utxo`], [`ScriptType`],
//! [`Output`], and the selection request/outcome pair.
//!
//! See spec §3. Detection of [`ScriptType`] is structural (script bytes
//! only); this crate never parses addresses, it only classifies scripts
//! that a caller has already resolved.

use bitcoin::{Amount, Network, OutPoint, ScriptBuf, Txid};

/// An unspent transaction output as known to the caller's wallet.
///
/// Immutable; identified by its outpoint `(txid, vout)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Utxo {
    /// Transaction id this output belongs to.
    pub txid: Txid,
    /// Output index within that transaction.
    pub vout: u32,
    /// Value in satoshis.
    pub value: Amount,
    /// The output's script pubkey.
    pub script_pubkey: ScriptBuf,
    /// Confirmations as of the last chain tip the caller observed.
    pub confirmations: u32,
    /// Block height the output was mined at, if confirmed.
    pub height: Option<u32>,
}

impl Utxo {
    /// This UTXO's outpoint.
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }

    /// Structural script-type classification of this UTXO's output script.
    pub fn script_type(&self) -> ScriptType {
        ScriptType::from_script(&self.script_pubkey)
    }
}

/// Structural classification of an output script.
///
/// Detection never requires chain context: it is a pure function of the
/// script bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptType {
    /// Pay-to-pubkey-hash.
    P2pkh,
    /// Pay-to-witness-pubkey-hash (native segwit v0).
    P2wpkh,
    /// Pay-to-script-hash (may wrap a witness program, see
    /// [`ScriptType::P2shP2wpkh`] for the nested-segwit special case).
    P2sh,
    /// Pay-to-witness-script-hash.
    P2wsh,
    /// Pay-to-taproot (segwit v1).
    P2tr,
    /// Pay-to-script-hash wrapping a P2WPKH redeem script (BIP-141 nested
    /// segwit). Distinguished from plain [`ScriptType::P2sh`] because its
    /// dust floor and spend-input vsize differ.
    P2shP2wpkh,
    /// Unspendable data-carrier output (`OP_RETURN ...`).
    OpReturn,
    /// Anything else: non-standard or not yet classified.
    Unknown,
}

impl ScriptType {
    /// Classify a script pubkey by its structure.
    ///
    /// `P2shP2wpkh` cannot be distinguished from plain `P2sh` by the output
    /// script alone (the redeem script is only known to the spender); this
    /// returns [`ScriptType::P2sh`] for every P2SH script. Callers that know
    /// the redeem script should use [`ScriptType::classify_p2sh`] instead.
    pub fn from_script(script: &ScriptBuf) -> Self {
        if script.is_p2pkh() {
            ScriptType::P2pkh
        } else if script.is_p2wpkh() {
            ScriptType::P2wpkh
        } else if script.is_p2wsh() {
            ScriptType::P2wsh
        } else if script.is_p2tr() {
            ScriptType::P2tr
        } else if script.is_p2sh() {
            ScriptType::P2sh
        } else if script.is_op_return() {
            ScriptType::OpReturn
        } else {
            ScriptType::Unknown
        }
    }

    /// Classify a P2SH output given its redeem script, distinguishing
    /// nested-segwit P2WPKH (`OP_0 <20B>`) from a general P2SH.
    pub fn classify_p2sh(redeem_script: &ScriptBuf) -> Self {
        if redeem_script.is_p2wpkh() {
            ScriptType::P2shP2wpkh
        } else {
            ScriptType::P2sh
        }
    }
}

/// Where a builder output's value should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputDestination {
    /// A resolved output script (the caller has already turned an address
    /// into bytes; this crate does not parse addresses, per spec §1).
    Script(ScriptBuf),
    /// An arbitrary `OP_RETURN` payload, at most 80 bytes.
    OpReturnData(Vec<u8>),
}

/// A desired transaction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Destination of the funds.
    pub destination: OutputDestination,
    /// Value in satoshis. Must be zero for [`OutputDestination::OpReturnData`].
    pub value: Amount,
}

impl Output {
    /// Build a spendable output to a script.
    pub fn to_script(script: ScriptBuf, value: Amount) -> Self {
        Self {
            destination: OutputDestination::Script(script),
            value,
        }
    }

    /// Build a zero-value `OP_RETURN` output.
    ///
    /// # Panics
    /// Panics if `data` exceeds 80 bytes, the standardness limit for
    /// `OP_RETURN` payloads.
    pub fn op_return(data: Vec<u8>) -> Self {
        assert!(data.len() <= 80, "OP_RETURN payload must be <= 80 bytes");
        Self {
            destination: OutputDestination::OpReturnData(data),
            value: Amount::ZERO,
        }
    }

    /// Resolve this output to a concrete script pubkey.
    pub fn script_pubkey(&self) -> ScriptBuf {
        match &self.destination {
            OutputDestination::Script(script) => script.clone(),
            OutputDestination::OpReturnData(data) => ScriptBuf::new_op_return(
                bitcoin::script::PushBytesBuf::try_from(data.clone())
                    .expect("validated <= 80 bytes at construction"),
            ),
        }
    }
}

/// Filter strategy applied by the selection dispatcher before running any
/// algorithm (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterStrategy {
    /// Keep every UTXO above the dust threshold.
    #[default]
    Moderate,
    /// Additionally drop UTXOs below a conservative policy floor.
    Conservative,
    /// Use only the dust threshold, no extra floor (most permissive).
    Aggressive,
}

/// Parameters for a UTXO selection call.
#[derive(Debug, Clone)]
pub struct SelectionRequest {
    /// Target value to cover (sum of non-change recipient outputs).
    pub target_value: Amount,
    /// Fee rate in sat/vB.
    pub fee_rate: f64,
    /// Dust threshold below which change is folded into the fee.
    pub dust_threshold: Amount,
    /// Minimum confirmations required for a candidate UTXO to be eligible.
    pub min_confirmations: Option<u32>,
    /// Maximum number of inputs the selection may use.
    pub max_inputs: Option<usize>,
    /// Pre-filter aggressiveness.
    pub filter_strategy: FilterStrategy,
    /// The network, used to decide the minimum valid fee rate (mainnet/
    /// testnet require `>= 1.0`, regtest allows `>= 0.0`).
    pub network: Network,
}

impl SelectionRequest {
    /// The minimum fee rate this request's network allows.
    pub fn min_fee_rate(&self) -> f64 {
        if self.network == Network::Regtest {
            0.0
        } else {
            1.0
        }
    }

    /// Whether `fee_rate` satisfies this request's network invariant.
    pub fn is_fee_rate_valid(&self) -> bool {
        self.fee_rate >= self.min_fee_rate()
    }
}

/// Why a selection attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionFailureReason {
    /// Available UTXOs (after filtering) cannot cover target + fee.
    #[error("insufficient funds: needed {needed} sat, available {available} sat")]
    InsufficientFunds {
        /// Satoshis required (target + estimated fee).
        needed: u64,
        /// Satoshis available across eligible candidates.
        available: u64,
    },
    /// No combination of UTXOs satisfies the algorithm's constraints.
    #[error("no combination of available UTXOs satisfies the selection constraints")]
    NoCombinationFound,
    /// Every candidate UTXO was below the dust threshold.
    #[error("all candidate UTXOs are below the dust threshold")]
    DustOnly,
    /// A solution exists but would exceed `max_inputs`.
    #[error("selection would require more than the maximum allowed {max_inputs} inputs")]
    MaxInputsExceeded {
        /// The configured cap.
        max_inputs: usize,
    },
}

/// The result of a UTXO selection attempt.
#[derive(Debug, Clone)]
pub enum SelectionOutcome {
    /// A selection was found.
    Success(SelectionSuccess),
    /// No selection could be found.
    Failure {
        /// Why selection failed.
        reason: SelectionFailureReason,
        /// Free-form diagnostic details (never includes scripts/keys).
        details: String,
    },
}

/// A successful UTXO selection.
#[derive(Debug, Clone)]
pub struct SelectionSuccess {
    /// Selected inputs.
    pub inputs: Vec<Utxo>,
    /// Computed miner fee.
    pub fee: Amount,
    /// Change returned to the wallet (zero if changeless).
    pub change: Amount,
    /// Total value of selected inputs.
    pub total_value: Amount,
    /// `inputs.len()`.
    pub input_count: usize,
    /// Number of outputs in the resulting transaction (recipients + change
    /// output, if any).
    pub output_count: usize,
    /// Estimated virtual size in bytes.
    pub estimated_vsize: u64,
    /// `fee / estimated_vsize`, in sat/vB.
    pub effective_fee_rate: f64,
    /// `excess + change_cost` when the algorithm computes it (spec §4.2).
    pub waste_metric: Option<f64>,
}

impl SelectionSuccess {
    /// Whether a change output was kept (as opposed to being folded into
    /// the fee because it fell below the dust threshold).
    pub fn change_kept(&self) -> bool {
        self.change > Amount::ZERO
    }

    /// Verify the conservation invariant (spec §8 property 1):
    /// `sum(inputs) == outputs_value + fee + change`.
    pub fn check_conservation(&self, outputs_value: Amount) -> bool {
        self.total_value == outputs_value + self.fee + self.change
    }
}
