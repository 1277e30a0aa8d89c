use async_trait::async_trait;
use bitcoin::{Address, Txid};
use pse_common::Satoshis;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("The ledger could not be reached: {0}")]
    Unavailable(String),
    #[error("Ledger RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Unexpected response from the ledger: {0}")]
    InvalidResponse(String),
    #[error("Wallet '{0}' does not have enough funds")]
    InsufficientFunds(String),
}

/// A transaction as the ledger currently sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub txid: Txid,
    /// Zero while the transaction is in the mempool.
    pub confirmations: u32,
    /// The serialized transaction, hex encoded. This is what gets rebroadcast.
    pub hex: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastResult {
    /// Accepted, or already known to the ledger.
    Success,
    /// Rejected because it conflicts with another transaction, e.g. a replacement or a double spend.
    RejectedConflicting(String),
    RejectedOther(String),
}

/// Read and broadcast access to a blockchain, for one rail.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Looks up a transaction. `None` means the ledger does not know about it, neither in a block nor in the mempool.
    async fn get_transaction(&self, txid: &Txid) -> Result<Option<LedgerTransaction>, LedgerError>;

    async fn broadcast(&self, hex: &str) -> Result<BroadcastResult, LedgerError>;

    /// The height of the best block the ledger knows about.
    async fn tip_height(&self) -> Result<u64, LedgerError>;

    /// Asks the ledger to watch an address, so that transactions paying it are reported. Ledgers that see every
    /// transaction need not do anything.
    async fn track_address(&self, _address: &Address) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// One output of a batch payout transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutOutput {
    pub payout_id: i64,
    pub address: Address,
    pub amount: Satoshis,
}

/// A hot wallet that can fund payouts.
#[async_trait]
pub trait OnChainWallet: Send + Sync {
    /// Builds, signs and broadcasts a single transaction paying every output, funded from `wallet`.
    async fn send_many(&self, wallet: &str, outputs: &[PayoutOutput]) -> Result<Txid, LedgerError>;
}
