use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use bitcoin::{Address, Txid};

use crate::traits::{
    BroadcastResult,
    LedgerClient,
    LedgerError,
    LedgerTransaction,
    OnChainWallet,
    PayoutOutput,
};

/// A scriptable ledger and wallet. Transactions are added with a confirmation count, and can be mined, evicted or
/// marked as conflicting. Broadcasting a known transaction succeeds unless it has been marked as conflicting.
#[derive(Clone, Default)]
pub struct FakeLedger {
    inner: Arc<Mutex<LedgerState>>,
}

#[derive(Default)]
struct LedgerState {
    transactions: HashMap<Txid, LedgerTransaction>,
    conflicting: HashSet<String>,
    broadcasts: Vec<String>,
    tracked: Vec<String>,
    sends: Vec<(String, Vec<PayoutOutput>)>,
    wallet_error: Option<LedgerError>,
    tip: u64,
    sent: u64,
    offline: bool,
}

impl LedgerState {
    fn check_online(&self) -> Result<(), LedgerError> {
        if self.offline {
            Err(LedgerError::Unavailable("the fake ledger is offline".into()))
        } else {
            Ok(())
        }
    }
}

fn hex_for(txid: &Txid) -> String {
    format!("02000000{txid}")
}

impl FakeLedger {
    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_transaction(&self, txid: Txid, confirmations: u32) {
        let tx = LedgerTransaction { txid, confirmations, hex: hex_for(&txid) };
        self.state().transactions.insert(txid, tx);
    }

    pub fn set_confirmations(&self, txid: &Txid, confirmations: u32) {
        if let Some(tx) = self.state().transactions.get_mut(txid) {
            tx.confirmations = confirmations;
        }
    }

    pub fn confirmations(&self, txid: &Txid) -> Option<u32> {
        self.state().transactions.get(txid).map(|tx| tx.confirmations)
    }

    /// Forgets the transaction, as a node does when it is evicted from the mempool.
    pub fn evict(&self, txid: &Txid) {
        self.state().transactions.remove(txid);
    }

    pub fn reject_as_conflicting(&self, txid: &Txid) {
        self.state().conflicting.insert(hex_for(txid));
    }

    /// Adds a block: the tip moves up and every known transaction gains a confirmation.
    pub fn mine_block(&self) -> u64 {
        let mut state = self.state();
        state.tip += 1;
        state.transactions.values_mut().for_each(|tx| tx.confirmations += 1);
        state.tip
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Makes every following `send_many` call fail with `error`, or succeed again with `None`.
    pub fn fail_sends(&self, error: Option<LedgerError>) {
        self.state().wallet_error = error;
    }

    /// The hex of every transaction that was broadcast, in order.
    pub fn broadcasts(&self) -> Vec<String> {
        self.state().broadcasts.clone()
    }

    pub fn tracked_addresses(&self) -> Vec<String> {
        self.state().tracked.clone()
    }

    /// Every successful `send_many` call: the wallet name and the outputs.
    pub fn sends(&self) -> Vec<(String, Vec<PayoutOutput>)> {
        self.state().sends.clone()
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn get_transaction(&self, txid: &Txid) -> Result<Option<LedgerTransaction>, LedgerError> {
        let state = self.state();
        state.check_online()?;
        Ok(state.transactions.get(txid).cloned())
    }

    async fn broadcast(&self, hex: &str) -> Result<BroadcastResult, LedgerError> {
        let mut state = self.state();
        state.check_online()?;
        state.broadcasts.push(hex.to_string());
        if state.conflicting.contains(hex) {
            return Ok(BroadcastResult::RejectedConflicting("txn-mempool-conflict".into()));
        }
        if state.transactions.values().any(|tx| tx.hex == hex) {
            Ok(BroadcastResult::Success)
        } else {
            Ok(BroadcastResult::RejectedOther("non-final".into()))
        }
    }

    async fn tip_height(&self) -> Result<u64, LedgerError> {
        let state = self.state();
        state.check_online()?;
        Ok(state.tip)
    }

    async fn track_address(&self, address: &Address) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check_online()?;
        state.tracked.push(address.to_string());
        Ok(())
    }
}

#[async_trait]
impl OnChainWallet for FakeLedger {
    async fn send_many(&self, wallet: &str, outputs: &[PayoutOutput]) -> Result<Txid, LedgerError> {
        let mut state = self.state();
        state.check_online()?;
        if let Some(e) = state.wallet_error.clone() {
            return Err(e);
        }
        state.sent += 1;
        let txid = Txid::from_str(&format!("{:064x}", 0xf000_0000u64 + state.sent))
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;
        state.transactions.insert(txid, LedgerTransaction { txid, confirmations: 0, hex: hex_for(&txid) });
        state.sends.push((wallet.to_string(), outputs.to_vec()));
        Ok(txid)
    }
}
