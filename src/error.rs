//! Crate-wide error taxonomy.
//!
//! Each subsystem surfaces its own error enum at its module boundary (see
//! `selection`, `psbt`, `rbf`, `cpfp`, `lock`, `electrum`). [`Error`] wraps
//! all of them for callers that don't need to distinguish the source.

use core::fmt;

use crate::cpfp::CpfpError;
use crate::electrum::{NetworkError, PoolError};
use crate::lock::LockError;
use crate::psbt::PsbtError;
use crate::rbf::RbfError;
use crate::selection::SelectionError;

/// Top-level crate error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// UTXO selection failed.
    #[error("selection: {0}")]
    Selection(#[from] SelectionError),
    /// PSBT assembly or finalization failed.
    #[error("psbt: {0}")]
    Psbt(#[from] PsbtError),
    /// RBF replacement construction failed.
    #[error("rbf: {0}")]
    Rbf(#[from] RbfError),
    /// CPFP child construction failed.
    #[error("cpfp: {0}")]
    Cpfp(#[from] CpfpError),
    /// UTXO lock manager operation failed.
    #[error("lock: {0}")]
    Lock(#[from] LockError),
    /// ElectrumX network-level error surfaced unchanged from the client.
    #[error("network: {0}")]
    Network(#[from] NetworkError),
    /// ElectrumX connection pool exhausted or all servers failed.
    #[error("pool: {0}")]
    Pool(#[from] PoolError),
}

/// An opaque identifier used only in diagnostics (never on the wire).
///
/// Carries the offending outpoint, txid, or server identifier without ever
/// carrying private keys, signatures, or full raw scripts, per the error
/// handling design's user-visible-behavior rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// A transaction id.
    Txid(bitcoin::Txid),
    /// An outpoint (txid:vout).
    Outpoint(bitcoin::OutPoint),
    /// An ElectrumX server identifier (host:port).
    Server(String),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Txid(txid) => write!(f, "txid {txid}"),
            Subject::Outpoint(op) => write!(f, "outpoint {op}"),
            Subject::Server(s) => write!(f, "server {s}"),
        }
    }
}
