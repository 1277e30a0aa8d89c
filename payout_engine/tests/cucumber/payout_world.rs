use std::{fmt::Debug, sync::Arc};

use bitcoin::Network;
use cucumber::World;
use log::*;
use payout_engine::{
    db_types::{PayoutMethodId, TransferProcessorData},
    events::EventProducers,
    processors::{AutomatedTransferSender, OnChainTransferSender},
    test_utils::{
        scratch_db::scratch_database,
        FakeLedger,
    },
    OnChainPayoutHandler,
    PayoutApi,
    PayoutHandlers,
    SqliteDatabase,
};

#[derive(Default, Debug, World)]
pub struct PayoutWorld {
    pub system: Option<PayoutSystem>,
    /// The id of the most recently accepted payout
    pub last_payout: Option<i64>,
}

pub struct PayoutSystem {
    pub db_path: String,
    pub db: SqliteDatabase,
    pub ledger: FakeLedger,
    pub handler: Arc<OnChainPayoutHandler<SqliteDatabase>>,
    pub api: PayoutApi<SqliteDatabase>,
}

impl Debug for PayoutSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PayoutSystem ({})", self.db_path)
    }
}

pub fn rail() -> PayoutMethodId {
    PayoutMethodId::on_chain("BTC")
}

impl PayoutWorld {
    pub fn system(&self) -> &PayoutSystem {
        self.system.as_ref().expect("Payout system not initialised")
    }

    pub fn last_payout(&self) -> i64 {
        self.last_payout.expect("No payout has been accepted yet")
    }
}

impl PayoutSystem {
    pub async fn new() -> Self {
        let (url, db) = scratch_database(1).await;
        debug!("Created database: {url}");
        let ledger = FakeLedger::default();
        let handler =
            Arc::new(OnChainPayoutHandler::new(db.clone(), rail(), Network::Regtest, Arc::new(ledger.clone())));
        let mut handlers = PayoutHandlers::new();
        handlers.add(OnChainPayoutHandler::new(db.clone(), rail(), Network::Regtest, Arc::new(ledger.clone())));
        let api = PayoutApi::new(db.clone(), handlers);
        Self { db_path: url, db, ledger, handler, api }
    }

    /// A sender for the given processor configuration, paying from the fake ledger's wallet.
    pub fn sender(
        &self,
        config: TransferProcessorData,
    ) -> AutomatedTransferSender<SqliteDatabase, OnChainTransferSender<SqliteDatabase>> {
        let transfer = OnChainTransferSender::new(
            self.db.clone(),
            Arc::new(self.ledger.clone()),
            Network::Regtest,
            EventProducers::default(),
        );
        AutomatedTransferSender::new(self.db.clone(), config, transfer)
    }
}

