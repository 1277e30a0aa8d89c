use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use pse_common::Satoshis;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::Type;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Conversion error: {0}")]
pub struct ConversionError(String);

//--------------------------------------        StoreId        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct StoreId(String);

impl StoreId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StoreId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StoreId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

//--------------------------------------    PayoutMethodId     ---------------------------------------------------------
/// Identifies a payment rail: a network and asset combination such as `BTC-CHAIN` or `BTC-LN`.
///
/// The identifier is always `<CRYPTO CODE>-<KIND>`, upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct PayoutMethodId(String);

pub const ON_CHAIN_SUFFIX: &str = "CHAIN";
pub const LIGHTNING_SUFFIX: &str = "LN";

impl PayoutMethodId {
    pub fn on_chain(crypto_code: &str) -> Self {
        Self(format!("{}-{ON_CHAIN_SUFFIX}", crypto_code.to_ascii_uppercase()))
    }

    pub fn lightning(crypto_code: &str) -> Self {
        Self(format!("{}-{LIGHTNING_SUFFIX}", crypto_code.to_ascii_uppercase()))
    }

    pub fn crypto_code(&self) -> &str {
        self.0.split_once('-').map(|(code, _)| code).unwrap_or(&self.0)
    }

    pub fn is_on_chain(&self) -> bool {
        self.0.ends_with(ON_CHAIN_SUFFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PayoutMethodId {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_uppercase();
        match s.split_once('-') {
            Some((code, kind)) if !code.is_empty() && !kind.is_empty() => Ok(Self(s)),
            _ => Err(ConversionError(format!("Invalid payout method id: '{s}'"))),
        }
    }
}

impl Display for PayoutMethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

//--------------------------------------      PayoutState      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
pub enum PayoutState {
    /// The payout has been approved and is waiting for a sender to pay it.
    AwaitingPayment,
    /// At least one transaction paying this payout has been broadcast, but none has enough confirmations yet.
    InProgress,
    /// A transaction paying this payout has enough confirmations. Terminal.
    Completed,
    /// The payout was cancelled before completion. Terminal.
    Cancelled,
}

impl PayoutState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Returns true if a payout may move from `self` to `next`.
    ///
    /// | From \ To       | AwaitingPayment | InProgress | Completed | Cancelled |
    /// |-----------------|-----------------|------------|-----------|-----------|
    /// | AwaitingPayment | -               | yes        | manual    | yes       |
    /// | InProgress      | yes             | -          | yes       | yes       |
    /// | Completed       | no              | no         | -         | no        |
    /// | Cancelled       | no              | no         | no        | -         |
    ///
    /// `AwaitingPayment -> Completed` is only valid for payouts settled out-of-band with a manual proof. That check
    /// belongs to the caller, since it depends on the proof.
    pub fn can_transition_to(&self, next: PayoutState) -> bool {
        use PayoutState::*;
        matches!(
            (self, next),
            (AwaitingPayment, InProgress) |
                (AwaitingPayment, Completed) |
                (AwaitingPayment, Cancelled) |
                (InProgress, AwaitingPayment) |
                (InProgress, Completed) |
                (InProgress, Cancelled)
        )
    }
}

impl Display for PayoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayoutState::AwaitingPayment => write!(f, "AwaitingPayment"),
            PayoutState::InProgress => write!(f, "InProgress"),
            PayoutState::Completed => write!(f, "Completed"),
            PayoutState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl FromStr for PayoutState {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AwaitingPayment" => Ok(Self::AwaitingPayment),
            "InProgress" => Ok(Self::InProgress),
            "Completed" => Ok(Self::Completed),
            "Cancelled" => Ok(Self::Cancelled),
            s => Err(ConversionError(format!("Invalid payout state: {s}"))),
        }
    }
}

//--------------------------------------     FailurePolicy     ---------------------------------------------------------
/// What a processor does to a payout that keeps failing to send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FailurePolicy {
    /// Only count the errors. The processor keeps retrying the payout every cycle.
    #[default]
    RetryForever,
    /// Once the payout's error count reaches `errors`, the processor adds its name to the payout's disabled
    /// processors, and stops picking it up.
    DisableAfter { errors: u32 },
}

//--------------------------------------      PayoutBlob       ---------------------------------------------------------
fn default_minimum_confirmation() -> u32 {
    1
}

/// The JSON document stored in a payout's `blob` column.
///
/// Top-level keys that this type does not know about are kept in `additional_data` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutBlob {
    #[serde(default = "default_minimum_confirmation")]
    pub minimum_confirmation: u32,
    #[serde(default)]
    pub revision: u32,
    #[serde(default)]
    pub disabled_processors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u32>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(flatten)]
    pub additional_data: BTreeMap<String, Value>,
}

impl Default for PayoutBlob {
    fn default() -> Self {
        Self {
            minimum_confirmation: default_minimum_confirmation(),
            revision: 0,
            disabled_processors: Vec::new(),
            error_count: None,
            metadata: Map::new(),
            additional_data: BTreeMap::new(),
        }
    }
}

impl PayoutBlob {
    pub fn is_disabled_for(&self, processor: &str) -> bool {
        self.disabled_processors.iter().any(|p| p == processor)
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.unwrap_or(0)
    }

    /// Records a failed send attempt by `processor` and applies the failure policy. Returns true if the processor
    /// was disabled for this payout as a result.
    pub fn record_failure(&mut self, processor: &str, policy: FailurePolicy) -> bool {
        let errors = self.error_count().saturating_add(1);
        self.error_count = Some(errors);
        match policy {
            FailurePolicy::DisableAfter { errors: limit } if errors >= limit && !self.is_disabled_for(processor) => {
                self.disabled_processors.push(processor.to_string());
                true
            },
            _ => false,
        }
    }
}

//--------------------------------------        Payout         ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq)]
pub struct Payout {
    pub id: i64,
    pub store_id: StoreId,
    pub pull_payment_id: Option<String>,
    pub payout_method_id: PayoutMethodId,
    pub state: PayoutState,
    /// The rail-specific destination, as accepted by the claim destination resolver.
    pub destination: String,
    pub amount: Satoshis,
    pub blob: PayoutBlob,
    /// The rail-specific proof document. Decode it with the payout handler for the rail.
    pub proof: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------       NewPayout       ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewPayout {
    pub store_id: StoreId,
    pub pull_payment_id: Option<String>,
    pub payout_method_id: PayoutMethodId,
    pub destination: String,
    pub amount: Satoshis,
    pub blob: PayoutBlob,
    pub created_at: DateTime<Utc>,
}

impl NewPayout {
    pub fn new(store_id: StoreId, payout_method_id: PayoutMethodId, destination: String, amount: Satoshis) -> Self {
        Self {
            store_id,
            pull_payment_id: None,
            payout_method_id,
            destination,
            amount,
            blob: PayoutBlob::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_pull_payment(mut self, pull_payment_id: String) -> Self {
        self.pull_payment_id = Some(pull_payment_id);
        self
    }

    pub fn with_minimum_confirmation(mut self, confirmations: u32) -> Self {
        self.blob.minimum_confirmation = confirmations;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

//--------------------------------------     ProcessorBlob     ---------------------------------------------------------
fn default_interval_seconds() -> u64 {
    3600
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorBlob {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(flatten)]
    pub additional_data: BTreeMap<String, Value>,
}

impl Default for ProcessorBlob {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            failure_policy: FailurePolicy::default(),
            additional_data: BTreeMap::new(),
        }
    }
}

impl ProcessorBlob {
    pub fn with_interval(interval_seconds: u64) -> Self {
        Self { interval_seconds, ..Default::default() }
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_seconds.max(1))
    }
}

//--------------------------------------  TransferProcessorData ------------------------------------------------------
/// Persisted configuration for one automated transfer sender, bound to a store and a rail.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProcessorData {
    pub id: i64,
    pub store_id: StoreId,
    pub payout_method_id: PayoutMethodId,
    /// The processor type name, used to find the factory that builds the worker.
    pub processor: String,
    pub blob: ProcessorBlob,
}

/// A processor configuration that has not necessarily been stored yet. Configurations are unique per store, rail and
/// processor type, so saving one for an existing triple replaces the stored blob.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    pub store_id: StoreId,
    pub payout_method_id: PayoutMethodId,
    pub processor: String,
    pub blob: ProcessorBlob,
}

impl ProcessorConfig {
    pub fn new(store_id: StoreId, payout_method_id: PayoutMethodId, processor: &str, blob: ProcessorBlob) -> Self {
        Self { store_id, payout_method_id, processor: processor.to_string(), blob }
    }
}

//--------------------------------------  PaymentMethodConfig  ------------------------------------------------------
/// How a store pays out on a given rail. `wallet` names the hot wallet that funds the payouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentMethodConfig {
    pub store_id: StoreId,
    pub payout_method_id: PayoutMethodId,
    pub enabled: bool,
    pub wallet: String,
}
