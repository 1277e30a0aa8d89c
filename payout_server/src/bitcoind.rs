//! A [`LedgerClient`] and [`OnChainWallet`] backed by a bitcoin node's JSON-RPC interface.
//!
//! Wallet calls (`sendmany`, `gettransaction`, `importdescriptors`) go to the node's `/wallet/<name>` endpoint.
//! Everything else goes to the root endpoint.
//!
//! A node without `-txindex` only finds mempool transactions with `getrawtransaction`. Once a payout transaction is
//! mined, it is found through `gettransaction` on whichever loaded wallet paid it. So the wallets that pay out must
//! stay loaded while their payouts are in flight.
use std::{
    collections::BTreeMap,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use bitcoin::{Address, Amount, Txid};
use log::*;
use payout_engine::traits::{
    BroadcastResult,
    LedgerClient,
    LedgerError,
    LedgerTransaction,
    OnChainWallet,
    PayoutOutput,
};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::BitcoindConfig;

/// bitcoind's `RPC_WALLET_INSUFFICIENT_FUNDS`
const RPC_WALLET_INSUFFICIENT_FUNDS: i64 = -6;
/// bitcoind's `RPC_INVALID_ADDRESS_OR_KEY`, returned by both transaction lookups when they cannot see the transaction
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
/// bitcoind's `RPC_VERIFY_ERROR`
const RPC_VERIFY_ERROR: i64 = -25;
/// bitcoind's `RPC_VERIFY_REJECTED`
const RPC_VERIFY_REJECTED: i64 = -26;
/// bitcoind's `RPC_VERIFY_ALREADY_IN_CHAIN`
const RPC_VERIFY_ALREADY_IN_CHAIN: i64 = -27;

/// Rejection reasons meaning that the transaction's inputs were spent by another transaction.
const CONFLICT_REASONS: [&str; 6] = [
    "txn-mempool-conflict",
    "bad-txns-inputs-missingorspent",
    "bad-txns-inputs-spent",
    "missing-inputs",
    "insufficient fee",
    "replacement-adds-unconfirmed",
];

/// Rejection reasons meaning that the node already has the transaction.
const ALREADY_KNOWN_REASONS: [&str; 4] =
    ["already in block chain", "already in chain", "txn-already-known", "txn-already-in-mempool"];

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct VerboseTransaction {
    txid: Txid,
    hex: String,
    /// Absent while the transaction is in the mempool
    #[serde(default)]
    confirmations: Option<u32>,
}

#[derive(Deserialize)]
struct WalletTransaction {
    txid: Txid,
    hex: String,
    /// Negative when the transaction conflicts with one that is in the chain
    confirmations: i64,
}

impl From<WalletTransaction> for LedgerTransaction {
    fn from(tx: WalletTransaction) -> Self {
        let confirmations = u32::try_from(tx.confirmations.max(0)).unwrap_or(u32::MAX);
        Self { txid: tx.txid, confirmations, hex: tx.hex }
    }
}

#[derive(Deserialize)]
struct DescriptorInfo {
    descriptor: String,
}

#[derive(Deserialize)]
struct ImportResult {
    success: bool,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Clone)]
pub struct BitcoindClient {
    config: BitcoindConfig,
    client: Arc<Client>,
    next_id: Arc<AtomicU64>,
}

impl BitcoindClient {
    pub fn new(config: BitcoindConfig) -> Result<Self, LedgerError> {
        let client = Client::builder().build().map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client), next_id: Arc::new(AtomicU64::new(1)) })
    }

    fn url(&self, wallet: Option<&str>) -> String {
        let base = self.config.url.trim_end_matches('/');
        match wallet {
            Some(name) => format!("{base}/wallet/{name}"),
            None => base.to_string(),
        }
    }

    /// Makes a single JSON-RPC call. RPC level errors are returned as [`LedgerError::Rpc`] so that callers can
    /// inspect the code.
    pub async fn call<T: DeserializeOwned>(
        &self,
        wallet: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<T, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest { jsonrpc: "1.0", id, method, params };
        trace!("⛓️ RPC #{id}: {method}");
        let response = self
            .client
            .post(self.url(wallet))
            .basic_auth(&self.config.user, Some(self.config.password.reveal()))
            .json(&request)
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        // bitcoind reports RPC errors with a non-2xx status, but still sends a JSON-RPC body
        let rpc = match serde_json::from_str::<RpcResponse>(&body) {
            Ok(rpc) => rpc,
            Err(_) if !status.is_success() => {
                return Err(LedgerError::Unavailable(format!("{method} failed with HTTP status {status}")))
            },
            Err(e) => return Err(LedgerError::InvalidResponse(format!("{method}: {e}"))),
        };
        if let Some(err) = rpc.error {
            return Err(LedgerError::Rpc { code: err.code, message: err.message });
        }
        serde_json::from_value(rpc.result).map_err(|e| LedgerError::InvalidResponse(format!("{method}: {e}")))
    }

    /// Asks every loaded wallet for the transaction. `None` means that no wallet on the node knows about it.
    async fn find_wallet_transaction(&self, txid: &Txid) -> Result<Option<LedgerTransaction>, LedgerError> {
        let wallets = self.call::<Vec<String>>(None, "listwallets", json!([])).await?;
        for wallet in wallets {
            match self.call::<WalletTransaction>(Some(&wallet), "gettransaction", json!([txid.to_string()])).await {
                Ok(tx) => {
                    trace!("⛓️ Transaction {txid} found in wallet {wallet}");
                    return Ok(Some(tx.into()));
                },
                Err(LedgerError::Rpc { code: RPC_INVALID_ADDRESS_OR_KEY, .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl LedgerClient for BitcoindClient {
    async fn get_transaction(&self, txid: &Txid) -> Result<Option<LedgerTransaction>, LedgerError> {
        let result =
            self.call::<VerboseTransaction>(None, "getrawtransaction", json!([txid.to_string(), true])).await;
        match result {
            Ok(tx) => Ok(Some(LedgerTransaction {
                txid: tx.txid,
                confirmations: tx.confirmations.unwrap_or(0),
                hex: tx.hex,
            })),
            // Not in the mempool, and either mined or gone. Only a wallet can tell which without a txindex.
            Err(LedgerError::Rpc { code: RPC_INVALID_ADDRESS_OR_KEY, .. }) => self.find_wallet_transaction(txid).await,
            Err(e) => Err(e),
        }
    }

    async fn broadcast(&self, hex: &str) -> Result<BroadcastResult, LedgerError> {
        match self.call::<Txid>(None, "sendrawtransaction", json!([hex])).await {
            Ok(txid) => {
                debug!("⛓️ Broadcast transaction {txid}");
                Ok(BroadcastResult::Success)
            },
            Err(LedgerError::Rpc { code, message }) => classify_broadcast_error(code, message),
            Err(e) => Err(e),
        }
    }

    async fn tip_height(&self) -> Result<u64, LedgerError> {
        self.call::<u64>(None, "getblockcount", json!([])).await
    }

    async fn track_address(&self, address: &Address) -> Result<(), LedgerError> {
        let Some(wallet) = self.config.watch_wallet.as_deref() else {
            return Ok(());
        };
        let info = self.call::<DescriptorInfo>(None, "getdescriptorinfo", json!([format!("addr({address})")])).await?;
        let request = json!([[{ "desc": info.descriptor, "timestamp": "now" }]]);
        let results = self.call::<Vec<ImportResult>>(Some(wallet), "importdescriptors", request).await?;
        match results.into_iter().next() {
            Some(ImportResult { success: true, .. }) => {
                debug!("⛓️ Tracking {address} in wallet {wallet}");
                Ok(())
            },
            Some(ImportResult { error: Some(err), .. }) => {
                Err(LedgerError::Rpc { code: err.code, message: err.message })
            },
            _ => Err(LedgerError::InvalidResponse(format!("importdescriptors did not import {address}"))),
        }
    }
}

#[async_trait]
impl OnChainWallet for BitcoindClient {
    async fn send_many(&self, wallet: &str, outputs: &[PayoutOutput]) -> Result<Txid, LedgerError> {
        let amounts = sendmany_amounts(outputs)?;
        let txid = self.call::<String>(Some(wallet), "sendmany", json!(["", amounts])).await.map_err(|e| match e {
            LedgerError::Rpc { code: RPC_WALLET_INSUFFICIENT_FUNDS, .. } => {
                LedgerError::InsufficientFunds(wallet.to_string())
            },
            e => e,
        })?;
        info!("⛓️ Wallet {wallet} paid {} outputs in transaction {txid}", outputs.len());
        Txid::from_str(&txid).map_err(|e| LedgerError::InvalidResponse(format!("sendmany: {e}")))
    }
}

/// Maps a `sendrawtransaction` RPC error onto a broadcast outcome. Errors that are not about the transaction itself
/// stay errors.
pub fn classify_broadcast_error(code: i64, message: String) -> Result<BroadcastResult, LedgerError> {
    let reason = message.to_ascii_lowercase();
    if code == RPC_VERIFY_ALREADY_IN_CHAIN || ALREADY_KNOWN_REASONS.iter().any(|r| reason.contains(r)) {
        return Ok(BroadcastResult::Success);
    }
    match code {
        RPC_VERIFY_ERROR | RPC_VERIFY_REJECTED if CONFLICT_REASONS.iter().any(|r| reason.contains(r)) => {
            Ok(BroadcastResult::RejectedConflicting(message))
        },
        RPC_VERIFY_ERROR | RPC_VERIFY_REJECTED => Ok(BroadcastResult::RejectedOther(message)),
        code => Err(LedgerError::Rpc { code, message }),
    }
}

/// The `amounts` object of a `sendmany` call. Outputs to the same address are merged, since the RPC only takes one
/// amount per address.
fn sendmany_amounts(outputs: &[PayoutOutput]) -> Result<Map<String, Value>, LedgerError> {
    let mut totals = BTreeMap::<String, Amount>::new();
    for output in outputs {
        let sats = u64::try_from(output.amount.value())
            .map_err(|_| LedgerError::InvalidResponse(format!("Payout #{} has a negative amount", output.payout_id)))?;
        *totals.entry(output.address.to_string()).or_insert(Amount::ZERO) += Amount::from_sat(sats);
    }
    Ok(totals.into_iter().map(|(address, amount)| (address, json!(amount.to_btc()))).collect())
}
