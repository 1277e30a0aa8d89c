use crate::db_types::{PayoutMethodId, PayoutState, StoreId};

/// Criteria for selecting payouts. Empty criteria match every payout. Results are always ordered oldest first.
#[derive(Debug, Clone, Default)]
pub struct PayoutQueryFilter {
    pub store_id: Option<StoreId>,
    pub payout_method_id: Option<PayoutMethodId>,
    pub pull_payment_id: Option<String>,
    pub states: Vec<PayoutState>,
}

impl PayoutQueryFilter {
    pub fn with_store_id(mut self, store_id: StoreId) -> Self {
        self.store_id = Some(store_id);
        self
    }

    pub fn with_payout_method_id(mut self, payout_method_id: PayoutMethodId) -> Self {
        self.payout_method_id = Some(payout_method_id);
        self
    }

    pub fn with_pull_payment_id(mut self, pull_payment_id: &str) -> Self {
        self.pull_payment_id = Some(pull_payment_id.to_string());
        self
    }

    pub fn with_state(mut self, state: PayoutState) -> Self {
        if !self.states.contains(&state) {
            self.states.push(state);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.store_id.is_none() &&
            self.payout_method_id.is_none() &&
            self.pull_payment_id.is_none() &&
            self.states.is_empty()
    }

    pub fn matches(&self, payout: &crate::db_types::Payout) -> bool {
        self.store_id.as_ref().map(|s| s == &payout.store_id).unwrap_or(true) &&
            self.payout_method_id.as_ref().map(|m| m == &payout.payout_method_id).unwrap_or(true) &&
            self.pull_payment_id.as_ref().map(|p| Some(p) == payout.pull_payment_id.as_ref()).unwrap_or(true) &&
            (self.states.is_empty() || self.states.contains(&payout.state))
    }
}
