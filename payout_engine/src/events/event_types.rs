use std::fmt::Display;

use bitcoin::Txid;

use crate::db_types::PayoutMethodId;

/// Something happened on a ledger that may change the state of in-flight payouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    /// The chain tip of the rail's ledger has moved.
    NewBlock { rail: PayoutMethodId },
    /// A transaction relevant to the rail was seen, confirmed or not.
    NewOnChainTransaction { rail: PayoutMethodId, txid: Txid },
}

impl LedgerEvent {
    pub fn new_block(rail: PayoutMethodId) -> Self {
        Self::NewBlock { rail }
    }

    pub fn new_transaction(rail: PayoutMethodId, txid: Txid) -> Self {
        Self::NewOnChainTransaction { rail, txid }
    }

    pub fn rail(&self) -> &PayoutMethodId {
        match self {
            LedgerEvent::NewBlock { rail } => rail,
            LedgerEvent::NewOnChainTransaction { rail, .. } => rail,
        }
    }

    pub fn kind(&self) -> LedgerEventKind {
        match self {
            LedgerEvent::NewBlock { .. } => LedgerEventKind::NewBlock,
            LedgerEvent::NewOnChainTransaction { .. } => LedgerEventKind::NewOnChainTransaction,
        }
    }
}

impl Display for LedgerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerEvent::NewBlock { rail } => write!(f, "new block on {rail}"),
            LedgerEvent::NewOnChainTransaction { rail, txid } => write!(f, "transaction {txid} on {rail}"),
        }
    }
}

/// The kinds of ledger event a payout handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerEventKind {
    NewBlock,
    NewOnChainTransaction,
}
