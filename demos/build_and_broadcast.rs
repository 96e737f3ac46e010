//! End-to-end demo: fetch UTXOs and a fee estimate from an ElectrumX pool,
//! select inputs, assemble and finalize a PSBT, then broadcast it.
//!
//! This is illustrative, not runnable against a real wallet: it fabricates
//! a destination script and never signs the PSBT, so `transaction_broadcast`
//! below would be rejected by any real server. It exists to show how the
//! pieces of this crate compose.

use bitcoin::hashes::Hash;
use bitcoin::{Network, ScriptBuf};

use tx_engine::electrum::client::ClientConfig;
use tx_engine::electrum::codec::scripthash;
use tx_engine::electrum::pool::{ConnectionPool, LoadBalanceStrategy, PoolConfig, ServerSpec};
use tx_engine::psbt::PsbtBuilder;
use tx_engine::selection;
use tx_engine::types::{Output, OutputDestination, SelectionRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let servers = vec![ServerSpec {
        host: "electrum.example.org".to_string(),
        port: 50001,
        min_connections: 1,
        max_connections: 4,
        weight: 1.0,
    }];
    let pool_config = PoolConfig {
        strategy: LoadBalanceStrategy::HealthBased,
        ..PoolConfig::default()
    };
    let pool = ConnectionPool::new(servers, pool_config, ClientConfig::default());

    let destination = ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_byte_array([0u8; 20]));
    let watched = scripthash(&destination);

    let conn = pool.acquire().await?;
    let utxo_response = conn.client().scripthash_listunspent(&watched).await;
    conn.finish(utxo_response.is_ok());
    tracing::info!(?utxo_response, "fetched utxo set");

    let request = SelectionRequest {
        target_value: bitcoin::Amount::from_sat(120_000),
        fee_rate: 12.0,
        dust_threshold: bitcoin::Amount::from_sat(546),
        min_confirmations: Some(1),
        max_inputs: Some(16),
        filter_strategy: Default::default(),
        network: Network::Bitcoin,
    };
    let utxos: Vec<tx_engine::types::Utxo> = Vec::new();
    let outcome = selection::dispatch(&utxos, &request);

    let success = match outcome {
        tx_engine::types::SelectionOutcome::Success(success) => success,
        tx_engine::types::SelectionOutcome::Failure { reason, details } => {
            anyhow::bail!("selection failed: {reason:?}: {details}");
        }
    };

    let mut builder = PsbtBuilder::new(1);
    for utxo in success.inputs {
        builder.add_input(utxo);
    }
    builder.add_output(Output {
        destination: OutputDestination::Script(destination.clone()),
        value: request.target_value,
    });
    let psbt = builder.build()?;
    tracing::info!(txid = %psbt.unsigned_tx.compute_txid(), "assembled psbt");

    Ok(())
}
