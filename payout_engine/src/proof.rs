//! Payout proofs: the rail-specific evidence that a payout has been (or is being) paid.
//!
//! The on-chain proof tracks every transaction that was broadcast to pay a payout. Several may be alive at once, for
//! example when a fee-bumped replacement is broadcast. The proof also points at one of them as "the" transaction for
//! display purposes. The pointer is always one of the candidates, except once the payout has settled: then the
//! candidate set is emptied and only the confirmed transaction remains.
use bitcoin::Txid;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProofError {
    #[error("Transaction {0} is not a candidate for this payout")]
    NotACandidate(Txid),
    #[error("The proof has already settled on transaction {0}")]
    AlreadySettled(Txid),
    #[error("Invalid proof document: {0}")]
    InvalidDocument(String),
    #[error("Expected a {expected} proof but found {found}")]
    WrongProofType { expected: &'static str, found: &'static str },
}

//--------------------------------------      PayoutProof      ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "proofType")]
pub enum PayoutProof {
    #[serde(rename = "PayoutTransactionOnChainBlob")]
    OnChain(OnChainPayoutProof),
    #[serde(rename = "ManualPayoutProof")]
    Manual(ManualPayoutProof),
}

impl PayoutProof {
    pub fn from_value(value: &Value) -> Result<Self, ProofError> {
        serde_json::from_value(value.clone()).map_err(|e| ProofError::InvalidDocument(e.to_string()))
    }

    pub fn to_value(&self) -> Value {
        // Serializing a map of strings can only fail on non-string keys, which these types cannot produce.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PayoutProof::OnChain(_) => "on-chain",
            PayoutProof::Manual(_) => "manual",
        }
    }

    pub fn into_on_chain(self) -> Result<OnChainPayoutProof, ProofError> {
        match self {
            PayoutProof::OnChain(p) => Ok(p),
            other => Err(ProofError::WrongProofType { expected: "on-chain", found: other.kind() }),
        }
    }
}

//--------------------------------------   ManualPayoutProof   ---------------------------------------------------------
/// Recorded when an operator marks a payout as paid outside of this system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualPayoutProof {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

//--------------------------------------  OnChainPayoutProof   ---------------------------------------------------------
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "OnChainProofDocument", into = "OnChainProofDocument")]
pub struct OnChainPayoutProof {
    transaction_id: Option<Txid>,
    candidates: Vec<Txid>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnChainProofDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transaction_id: Option<Txid>,
    #[serde(default)]
    candidates: Vec<Txid>,
}

impl TryFrom<OnChainProofDocument> for OnChainPayoutProof {
    type Error = ProofError;

    fn try_from(doc: OnChainProofDocument) -> Result<Self, Self::Error> {
        let mut candidates = Vec::with_capacity(doc.candidates.len());
        for txid in doc.candidates {
            if !candidates.contains(&txid) {
                candidates.push(txid);
            }
        }
        match doc.transaction_id {
            Some(txid) if !candidates.is_empty() && !candidates.contains(&txid) => Err(ProofError::NotACandidate(txid)),
            transaction_id => Ok(Self { transaction_id, candidates }),
        }
    }
}

impl From<OnChainPayoutProof> for OnChainProofDocument {
    fn from(proof: OnChainPayoutProof) -> Self {
        Self { transaction_id: proof.transaction_id, candidates: proof.candidates }
    }
}

impl OnChainPayoutProof {
    /// A proof for a freshly broadcast transaction. It is both the only candidate and the current pointer.
    pub fn with_candidate(txid: Txid) -> Self {
        Self { transaction_id: Some(txid), candidates: vec![txid] }
    }

    pub fn transaction_id(&self) -> Option<&Txid> {
        self.transaction_id.as_ref()
    }

    /// The live candidates, in the order they were added.
    pub fn candidates(&self) -> &[Txid] {
        &self.candidates
    }

    pub fn is_candidate(&self, txid: &Txid) -> bool {
        self.candidates.contains(txid)
    }

    /// A settled proof has no candidates left and points at the transaction that confirmed.
    pub fn is_settled(&self) -> bool {
        self.candidates.is_empty() && self.transaction_id.is_some()
    }

    /// Adds a new broadcast attempt. Returns false if the transaction was already a candidate.
    pub fn add_candidate(&mut self, txid: Txid) -> Result<bool, ProofError> {
        if let Some(settled) = self.settled_on() {
            return Err(ProofError::AlreadySettled(settled));
        }
        if self.is_candidate(&txid) {
            return Ok(false);
        }
        self.candidates.push(txid);
        Ok(true)
    }

    /// Drops a candidate. If the pointer named it, the pointer is cleared too.
    pub fn remove_candidate(&mut self, txid: &Txid) -> bool {
        let before = self.candidates.len();
        self.candidates.retain(|c| c != txid);
        let removed = self.candidates.len() != before;
        if removed && self.transaction_id.as_ref() == Some(txid) {
            self.transaction_id = None;
        }
        removed
    }

    pub fn set_transaction_id(&mut self, txid: Txid) -> Result<(), ProofError> {
        if !self.is_candidate(&txid) {
            return Err(ProofError::NotACandidate(txid));
        }
        self.transaction_id = Some(txid);
        Ok(())
    }

    /// Clears the pointer if it does not name a live candidate. Note that this includes the settled form, so it is
    /// only for proofs of payouts that are still in flight. Returns true if the pointer was cleared.
    pub fn clear_dangling_pointer(&mut self) -> bool {
        match self.transaction_id {
            Some(txid) if !self.is_candidate(&txid) => {
                self.transaction_id = None;
                true
            },
            _ => false,
        }
    }

    /// Points at the first surviving candidate if nothing is selected yet.
    pub fn select_first_candidate(&mut self) {
        if self.transaction_id.is_none() {
            self.transaction_id = self.candidates.first().copied();
        }
    }

    /// Settles the proof on `txid`: it becomes the transaction id and every candidate is discarded.
    pub fn settle(&mut self, txid: Txid) -> Result<(), ProofError> {
        if !self.is_candidate(&txid) {
            return Err(ProofError::NotACandidate(txid));
        }
        self.candidates.clear();
        self.transaction_id = Some(txid);
        Ok(())
    }

    fn settled_on(&self) -> Option<Txid> {
        if self.is_settled() {
            self.transaction_id
        } else {
            None
        }
    }
}

impl From<OnChainPayoutProof> for PayoutProof {
    fn from(proof: OnChainPayoutProof) -> Self {
        PayoutProof::OnChain(proof)
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use serde_json::json;

    use super::*;

    fn txid(n: u8) -> Txid {
        Txid::from_str(&format!("{n:02x}").repeat(32)).unwrap()
    }

    #[test]
    fn pointer_follows_candidates() {
        let mut proof = OnChainPayoutProof::with_candidate(txid(1));
        assert!(proof.add_candidate(txid(2)).unwrap());
        assert!(!proof.add_candidate(txid(2)).unwrap());
        assert_eq!(proof.transaction_id(), Some(&txid(1)));
        assert!(proof.remove_candidate(&txid(1)));
        assert_eq!(proof.transaction_id(), None);
        assert_eq!(proof.set_transaction_id(txid(1)), Err(ProofError::NotACandidate(txid(1))));
        proof.select_first_candidate();
        assert_eq!(proof.transaction_id(), Some(&txid(2)));
        assert!(!proof.remove_candidate(&txid(9)));
    }

    #[test]
    fn dangling_pointers_are_cleared() {
        let mut proof = OnChainPayoutProof::with_candidate(txid(1));
        assert!(!proof.clear_dangling_pointer());
        proof.settle(txid(1)).unwrap();
        assert!(proof.clear_dangling_pointer());
        assert_eq!(proof, OnChainPayoutProof::default());
        assert!(!proof.clear_dangling_pointer());
    }

    #[test]
    fn settling_clears_candidates() {
        let mut proof = OnChainPayoutProof::with_candidate(txid(1));
        proof.add_candidate(txid(2)).unwrap();
        assert!(proof.settle(txid(3)).is_err());
        proof.settle(txid(2)).unwrap();
        assert!(proof.is_settled());
        assert!(proof.candidates().is_empty());
        assert_eq!(proof.transaction_id(), Some(&txid(2)));
        assert_eq!(proof.add_candidate(txid(4)), Err(ProofError::AlreadySettled(txid(2))));
    }

    #[test]
    fn json_document() {
        let mut proof = OnChainPayoutProof::with_candidate(txid(1));
        proof.add_candidate(txid(2)).unwrap();
        let value = PayoutProof::from(proof.clone()).to_value();
        assert_eq!(
            value,
            json!({
                "proofType": "PayoutTransactionOnChainBlob",
                "transactionId": txid(1).to_string(),
                "candidates": [txid(1).to_string(), txid(2).to_string()],
            })
        );
        let decoded = PayoutProof::from_value(&value).unwrap().into_on_chain().unwrap();
        assert_eq!(decoded, proof);
    }

    #[test]
    fn invalid_documents_are_rejected() {
        let dangling = json!({
            "proofType": "PayoutTransactionOnChainBlob",
            "transactionId": txid(3).to_string(),
            "candidates": [txid(1).to_string()],
        });
        assert!(matches!(PayoutProof::from_value(&dangling), Err(ProofError::InvalidDocument(_))));
        let settled = json!({
            "proofType": "PayoutTransactionOnChainBlob",
            "transactionId": txid(3).to_string(),
        });
        assert!(PayoutProof::from_value(&settled).unwrap().into_on_chain().unwrap().is_settled());
        let manual = json!({ "proofType": "ManualPayoutProof", "link": "https://example.com/tx" });
        let err = PayoutProof::from_value(&manual).unwrap().into_on_chain().unwrap_err();
        assert_eq!(err, ProofError::WrongProofType { expected: "on-chain", found: "manual" });
    }
}
