use std::{sync::Arc, time::Duration};

use log::*;
use payout_engine::{
    db_types::PayoutMethodId,
    events::{EventProducers, LedgerEvent},
    traits::{LedgerClient, LedgerError},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Polls the node's tip height and publishes a `NewBlock` event for the rail whenever it changes. The first
/// successful poll always publishes, so that payouts left in flight by a previous run are reconciled on startup.
pub struct ChainWatcher {
    ledger: Arc<dyn LedgerClient>,
    rail: PayoutMethodId,
    producers: EventProducers,
    interval: Duration,
    last_height: Option<u64>,
}

impl ChainWatcher {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        rail: PayoutMethodId,
        producers: EventProducers,
        interval: Duration,
    ) -> Self {
        Self { ledger, rail, producers, interval, last_height: None }
    }

    /// Returns the new tip height if a block event was published.
    pub async fn poll_once(&mut self) -> Result<Option<u64>, LedgerError> {
        let height = self.ledger.tip_height().await?;
        if self.last_height == Some(height) {
            trace!("⛓️ No new blocks on {}. Tip is still at {height}", self.rail);
            return Ok(None);
        }
        info!("⛓️ New tip on {} at height {height}", self.rail);
        self.last_height = Some(height);
        self.producers.publish_ledger_event(LedgerEvent::new_block(self.rail.clone())).await;
        Ok(Some(height))
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("⛓️ Chain watcher for {} started. Polling every {}s", self.rail, self.interval.as_secs());
        loop {
            if let Err(e) = self.poll_once().await {
                warn!("⛓️ Could not fetch the tip height for {}. {e}", self.rail);
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {},
            }
        }
        info!("⛓️ Chain watcher for {} stopped", self.rail);
    }
}

/// Starts the chain watcher. The task ends when `cancel` is triggered.
pub fn start_chain_watcher(watcher: ChainWatcher, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(watcher.run(cancel))
}
