use pse_common::Satoshis;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db_types::{PayoutMethodId, StoreId};

/// A request to pay part of a pull payment out to a destination of the claimant's choosing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub store_id: StoreId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_payment_id: Option<String>,
    pub payout_method_id: PayoutMethodId,
    /// The raw destination, e.g. an address or a payment URI
    pub destination: String,
    pub amount: Satoshis,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ClaimRequest {
    pub fn new(store_id: StoreId, payout_method_id: PayoutMethodId, destination: &str, amount: Satoshis) -> Self {
        Self {
            store_id,
            pull_payment_id: None,
            payout_method_id,
            destination: destination.to_string(),
            amount,
            metadata: Map::new(),
        }
    }

    pub fn with_pull_payment(mut self, pull_payment_id: &str) -> Self {
        self.pull_payment_id = Some(pull_payment_id.to_string());
        self
    }
}
