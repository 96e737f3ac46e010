//! `tx_engine`: Bitcoin transaction construction (UTXO selection, PSBT
//! assembly, RBF, CPFP) and an ElectrumX-compatible client stack for
//! reading chain state.
//!
//! The data model (`types`) is raw: [`types::Utxo`]/[`types::Output`], not
//! a descriptor `Plan`. Builders (`psbt`, `rbf`, `cpfp`) operate directly on
//! [`bitcoin::psbt::Psbt`].

#![warn(missing_docs)]

pub mod config;
pub mod cpfp;
pub mod dust;
pub mod electrum;
pub mod error;
pub mod lock;
pub mod psbt;
pub mod rbf;
pub mod selection;
pub mod types;
mod util;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use cpfp::{CpfpBuilder, CpfpConfig, CpfpError, CpfpPackage};
pub use error::Error;
pub use lock::{LockError, LockId, LockInfo, LockManager, LockPurpose};
pub use psbt::{PsbtBuilder, PsbtError};
pub use rbf::{RbfBuilder, RbfConfig, RbfError};
pub use types::{Output, OutputDestination, ScriptType, SelectionRequest, Utxo};
