use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::Utc;

use crate::{
    db_types::{
        NewPayout,
        PaymentMethodConfig,
        Payout,
        PayoutMethodId,
        PayoutState,
        ProcessorConfig,
        StoreId,
        TransferProcessorData,
    },
    traits::{
        PayoutDatabase,
        PayoutDatabaseError,
        PayoutManagement,
        PayoutQueryFilter,
        ProcessorManagement,
        StoreManagement,
    },
};

/// An in-memory backend with the same semantics as the SQLite one. It can be switched offline to simulate an
/// unavailable database.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    payouts: BTreeMap<i64, Payout>,
    processors: BTreeMap<i64, TransferProcessorData>,
    payment_methods: HashMap<(StoreId, PayoutMethodId), PaymentMethodConfig>,
    next_id: i64,
    offline: bool,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_online(&self) -> Result<(), PayoutDatabaseError> {
        if self.offline {
            Err(PayoutDatabaseError::DriverError(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }
}

impl MemoryDatabase {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Stores a payout directly in the given state, with the given proof.
    pub fn seed_payout(&self, payout: NewPayout, state: PayoutState, proof: Option<serde_json::Value>) -> Payout {
        let mut db = self.state();
        let id = db.next_id();
        let payout = Payout {
            id,
            store_id: payout.store_id,
            pull_payment_id: payout.pull_payment_id,
            payout_method_id: payout.payout_method_id,
            state,
            destination: payout.destination,
            amount: payout.amount,
            blob: payout.blob,
            proof,
            created_at: payout.created_at,
            updated_at: payout.created_at,
        };
        db.payouts.insert(id, payout.clone());
        payout
    }

    pub fn payout(&self, id: i64) -> Option<Payout> {
        self.state().payouts.get(&id).cloned()
    }

    pub fn enable_payment_method(&self, store_id: &StoreId, payout_method_id: &PayoutMethodId, wallet: &str) {
        let config = PaymentMethodConfig {
            store_id: store_id.clone(),
            payout_method_id: payout_method_id.clone(),
            enabled: true,
            wallet: wallet.to_string(),
        };
        self.state().payment_methods.insert((store_id.clone(), payout_method_id.clone()), config);
    }

    pub fn disable_payment_method(&self, store_id: &StoreId, payout_method_id: &PayoutMethodId) {
        if let Some(config) = self.state().payment_methods.get_mut(&(store_id.clone(), payout_method_id.clone())) {
            config.enabled = false;
        }
    }
}

impl PayoutDatabase for MemoryDatabase {
    fn url(&self) -> &str {
        "memory://"
    }
}

impl PayoutManagement for MemoryDatabase {
    async fn insert_payout(&self, payout: NewPayout) -> Result<Payout, PayoutDatabaseError> {
        self.state().check_online()?;
        if !payout.amount.is_positive() {
            return Err(PayoutDatabaseError::InvalidAmount(format!("{} is not a positive amount", payout.amount)));
        }
        Ok(self.seed_payout(payout, PayoutState::AwaitingPayment, None))
    }

    async fn fetch_payout(&self, id: i64) -> Result<Option<Payout>, PayoutDatabaseError> {
        let db = self.state();
        db.check_online()?;
        Ok(db.payouts.get(&id).cloned())
    }

    async fn search_payouts(&self, filter: PayoutQueryFilter) -> Result<Vec<Payout>, PayoutDatabaseError> {
        let db = self.state();
        db.check_online()?;
        let mut payouts = db.payouts.values().filter(|p| filter.matches(p)).cloned().collect::<Vec<_>>();
        payouts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(payouts)
    }

    async fn update_payout(&self, payout: &Payout, expected: PayoutState) -> Result<Payout, PayoutDatabaseError> {
        let mut db = self.state();
        db.check_online()?;
        if expected != payout.state && !expected.can_transition_to(payout.state) {
            return Err(PayoutDatabaseError::InvalidTransition { id: payout.id, from: expected, to: payout.state });
        }
        let stored = db.payouts.get_mut(&payout.id).ok_or(PayoutDatabaseError::PayoutNotFound(payout.id))?;
        if stored.state != expected {
            return Err(PayoutDatabaseError::StateConflict { id: payout.id, expected });
        }
        stored.state = payout.state;
        stored.blob = payout.blob.clone();
        stored.blob.revision = payout.blob.revision.saturating_add(1);
        stored.proof = payout.proof.clone();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }
}

impl ProcessorManagement for MemoryDatabase {
    async fn fetch_processor_configs(&self) -> Result<Vec<TransferProcessorData>, PayoutDatabaseError> {
        let db = self.state();
        db.check_online()?;
        Ok(db.processors.values().cloned().collect())
    }

    async fn fetch_processor_config(&self, id: i64) -> Result<Option<TransferProcessorData>, PayoutDatabaseError> {
        let db = self.state();
        db.check_online()?;
        Ok(db.processors.get(&id).cloned())
    }

    async fn upsert_processor_config(
        &self,
        config: ProcessorConfig,
    ) -> Result<TransferProcessorData, PayoutDatabaseError> {
        let mut db = self.state();
        db.check_online()?;
        let existing = db.processors.values_mut().find(|p| {
            p.store_id == config.store_id &&
                p.payout_method_id == config.payout_method_id &&
                p.processor == config.processor
        });
        if let Some(existing) = existing {
            existing.blob = config.blob;
            return Ok(existing.clone());
        }
        let id = db.next_id();
        let data = TransferProcessorData {
            id,
            store_id: config.store_id,
            payout_method_id: config.payout_method_id,
            processor: config.processor,
            blob: config.blob,
        };
        db.processors.insert(id, data.clone());
        Ok(data)
    }

    async fn delete_processor_config(&self, id: i64) -> Result<bool, PayoutDatabaseError> {
        let mut db = self.state();
        db.check_online()?;
        Ok(db.processors.remove(&id).is_some())
    }
}

impl StoreManagement for MemoryDatabase {
    async fn fetch_payment_method(
        &self,
        store_id: &StoreId,
        payout_method_id: &PayoutMethodId,
    ) -> Result<Option<PaymentMethodConfig>, PayoutDatabaseError> {
        let db = self.state();
        db.check_online()?;
        Ok(db.payment_methods.get(&(store_id.clone(), payout_method_id.clone())).cloned())
    }

    async fn save_payment_method(
        &self,
        config: PaymentMethodConfig,
    ) -> Result<PaymentMethodConfig, PayoutDatabaseError> {
        let mut db = self.state();
        db.check_online()?;
        db.payment_methods.insert((config.store_id.clone(), config.payout_method_id.clone()), config.clone());
        Ok(config)
    }
}
