use std::sync::Arc;

use log::*;
use payout_engine::{
    db_types::PayoutMethodId,
    events::EventHandlers,
    processors::{OnChainProcessorFactory, PayoutProcessorFactory},
    traits::{LedgerClient, OnChainWallet},
    OnChainPayoutHandler,
    PayoutHandlers,
    PayoutProcessorService,
    SqliteDatabase,
};
use tokio_util::sync::CancellationToken;

use crate::{
    bitcoind::BitcoindClient,
    chain_watcher::{start_chain_watcher, ChainWatcher},
    config::ServerConfig,
    errors::ServerError,
};

const ON_CHAIN_CRYPTO_CODE: &str = "BTC";

/// Wires the engine together and runs it until ctrl-c is received.
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await?;
    let bitcoind = BitcoindClient::new(config.bitcoind.clone())?;
    let ledger: Arc<dyn LedgerClient> = Arc::new(bitcoind.clone());
    let wallet: Arc<dyn OnChainWallet> = Arc::new(bitcoind);
    let rail = PayoutMethodId::on_chain(ON_CHAIN_CRYPTO_CODE);

    let mut handlers = PayoutHandlers::new();
    handlers.add(
        OnChainPayoutHandler::new(db.clone(), rail.clone(), config.network, Arc::clone(&ledger))
            .with_minimum_confirmation(config.min_confirmations)
            .read_only(config.read_only_wallet),
    );
    info!("🚀️ Payout handlers registered for {:?}", handlers.supported_payout_methods());

    let event_handlers = EventHandlers::new(config.event_buffer_size, handlers.event_hooks());
    let producers = event_handlers.producers();
    let event_tasks = event_handlers.start_handlers();

    let factories: Vec<Arc<dyn PayoutProcessorFactory>> = vec![Arc::new(OnChainProcessorFactory::new(
        db.clone(),
        wallet,
        config.network,
        producers.clone(),
        vec![rail.clone()],
    ))];
    let processors = PayoutProcessorService::start(db.clone(), factories).await?;

    let cancel = CancellationToken::new();
    let watcher = ChainWatcher::new(ledger, rail, producers, config.chain_poll_interval);
    let watcher_task = start_chain_watcher(watcher, cancel.clone());

    info!("🚀️ Payout server is running on {}. Press Ctrl-C to stop.", config.network);
    tokio::signal::ctrl_c().await?;
    info!("🚀️ Shutting down");

    cancel.cancel();
    if let Err(e) = watcher_task.await {
        warn!("🚀️ The chain watcher did not stop cleanly. {e}");
    }
    processors.shutdown().await?;
    // Event handlers finish once every producer is gone. The processor factories held the last ones.
    for task in event_tasks {
        if let Err(e) = task.await {
            warn!("🚀️ An event handler did not stop cleanly. {e}");
        }
    }
    db.close().await;
    Ok(())
}
