//! The on-chain reconciliation sweep.
//!
//! Every transaction that was broadcast for an `InProgress` payout is a candidate. On each ledger event, all the
//! candidates of all the rail's `InProgress` payouts are checked against the ledger:
//!
//! * A candidate the ledger has never heard of (or has forgotten, e.g. evicted from the mempool) is dropped.
//! * A candidate with enough confirmations settles the payout. The payout is `Completed` and the remaining candidates
//!   are discarded. Candidates are checked in the order they were broadcast, so the earliest sufficiently confirmed
//!   one wins.
//! * Any other candidate is rebroadcast. If the ledger rejects it as conflicting, it can never confirm and is dropped.
//!   Otherwise, it is kept and becomes the proof's current transaction.
//!
//! A payout that ends up with no candidates goes back to `AwaitingPayment`, so that a sender pays it again.
//!
//! Ledger errors never drop a candidate: if the ledger cannot answer, the candidate is kept as is until the next sweep.
use std::fmt::Display;

use log::*;

use crate::{
    db_types::{Payout, PayoutMethodId, PayoutState},
    proof::{OnChainPayoutProof, PayoutProof},
    traits::{BroadcastResult, LedgerClient, PayoutDatabaseError, PayoutManagement, PayoutQueryFilter},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// `InProgress` payouts that were looked at
    pub examined: usize,
    pub completed: usize,
    /// Payouts that lost all their candidates and went back to `AwaitingPayment`
    pub reverted: usize,
    /// Payouts that stayed `InProgress` with a modified proof
    pub updated: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn changed(&self) -> usize {
        self.completed + self.reverted + self.updated
    }
}

impl Display for SweepReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} examined, {} completed, {} reverted, {} updated, {} failed",
            self.examined, self.completed, self.reverted, self.updated, self.failed
        )
    }
}

/// Runs one reconciliation pass over every `InProgress` payout on `rail`, across all stores.
///
/// Each payout is saved on its own. If reconciling or saving one payout fails, the error is logged and the sweep moves
/// on. Only a failure to load the payouts fails the sweep as a whole.
pub async fn sweep_in_progress_payouts<B: PayoutManagement>(
    db: &B,
    rail: &PayoutMethodId,
    ledger: &dyn LedgerClient,
) -> Result<SweepReport, PayoutDatabaseError> {
    let filter = PayoutQueryFilter::default().with_payout_method_id(rail.clone()).with_state(PayoutState::InProgress);
    let payouts = db.search_payouts(filter).await?;
    let mut report = SweepReport { examined: payouts.len(), ..Default::default() };
    for payout in payouts {
        let id = payout.id;
        let reconciled = match reconcile_payout(&payout, ledger).await {
            Ok(Some(p)) => p,
            Ok(None) => continue,
            Err(e) => {
                warn!("🔁️ Could not reconcile payout #{id}: {e}");
                report.failed += 1;
                continue;
            },
        };
        match db.update_payout(&reconciled, PayoutState::InProgress).await {
            Ok(saved) => match saved.state {
                PayoutState::Completed => {
                    info!("🔁️ Payout #{id} is complete");
                    report.completed += 1;
                },
                PayoutState::AwaitingPayment => {
                    info!("🔁️ Payout #{id} has no live transactions left. It is awaiting payment again.");
                    report.reverted += 1;
                },
                _ => {
                    debug!("🔁️ Payout #{id} proof updated");
                    report.updated += 1;
                },
            },
            Err(PayoutDatabaseError::StateConflict { .. }) => {
                debug!("🔁️ Payout #{id} changed state during the sweep. It will be looked at again next time.");
            },
            Err(e) => {
                warn!("🔁️ Could not save reconciled payout #{id}: {e}");
                report.failed += 1;
            },
        }
    }
    Ok(report)
}

/// Works out the new state and proof of a single `InProgress` payout. Returns `None` if nothing changed.
pub async fn reconcile_payout(
    payout: &Payout,
    ledger: &dyn LedgerClient,
) -> Result<Option<Payout>, crate::proof::ProofError> {
    let mut proof = match payout.proof.as_ref() {
        Some(value) => PayoutProof::from_value(value)?.into_on_chain()?,
        None => OnChainPayoutProof::default(),
    };
    let required = payout.blob.minimum_confirmation;
    let mut state = PayoutState::InProgress;
    let snapshot = proof.candidates().to_vec();
    for txid in snapshot {
        let tx = match ledger.get_transaction(&txid).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                debug!("🔁️ Payout #{}: transaction {txid} is unknown to the ledger. Dropping it.", payout.id);
                proof.remove_candidate(&txid);
                continue;
            },
            Err(e) => {
                warn!("🔁️ Payout #{}: could not look up transaction {txid}. {e}", payout.id);
                continue;
            },
        };
        if tx.confirmations >= required {
            debug!("🔁️ Payout #{}: transaction {txid} has {} confirmations", payout.id, tx.confirmations);
            proof.settle(txid)?;
            state = PayoutState::Completed;
            break;
        }
        match ledger.broadcast(&tx.hex).await {
            Ok(BroadcastResult::RejectedConflicting(reason)) => {
                debug!("🔁️ Payout #{}: transaction {txid} conflicts with the chain ({reason}). Dropped.", payout.id);
                proof.remove_candidate(&txid);
            },
            Ok(result) => {
                if let BroadcastResult::RejectedOther(reason) = result {
                    debug!("🔁️ Payout #{}: rebroadcast of {txid} was rejected. {reason}", payout.id);
                }
                proof.set_transaction_id(txid)?;
            },
            Err(e) => warn!("🔁️ Payout #{}: could not rebroadcast {txid}. {e}", payout.id),
        }
    }
    if state == PayoutState::InProgress {
        if proof.clear_dangling_pointer() {
            debug!("🔁️ Payout #{}: the proof pointed at a transaction that is not a candidate", payout.id);
        }
        proof.select_first_candidate();
        if proof.candidates().is_empty() {
            state = PayoutState::AwaitingPayment;
        }
    }
    let proof = Some(PayoutProof::from(proof).to_value());
    if state == payout.state && proof == payout.proof {
        return Ok(None);
    }
    let mut reconciled = payout.clone();
    reconciled.state = state;
    reconciled.proof = proof;
    Ok(Some(reconciled))
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use bitcoin::Txid;
    use pse_common::Satoshis;
    use serde_json::json;

    use super::*;
    use crate::{
        db_types::{NewPayout, StoreId},
        test_utils::{FakeLedger, MemoryDatabase},
    };

    const ADDRESS: &str = "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kygt080";

    fn rail() -> PayoutMethodId {
        PayoutMethodId::on_chain("BTC")
    }

    fn txid(n: u8) -> Txid {
        Txid::from_str(&format!("{n:02x}").repeat(32)).unwrap()
    }

    fn in_progress(db: &MemoryDatabase, min_conf: u32, candidates: &[Txid]) -> Payout {
        let new = NewPayout::new(StoreId::from("store"), rail(), ADDRESS.into(), Satoshis::from(10_000))
            .with_minimum_confirmation(min_conf);
        let mut proof = OnChainPayoutProof::with_candidate(candidates[0]);
        for c in &candidates[1..] {
            proof.add_candidate(*c).unwrap();
        }
        db.seed_payout(new, PayoutState::InProgress, Some(PayoutProof::from(proof).to_value()))
    }

    async fn sweep(db: &MemoryDatabase, ledger: &FakeLedger) -> SweepReport {
        sweep_in_progress_payouts(db, &rail(), ledger).await.unwrap()
    }

    fn on_chain_proof(payout: &Payout) -> OnChainPayoutProof {
        PayoutProof::from_value(payout.proof.as_ref().unwrap()).unwrap().into_on_chain().unwrap()
    }

    #[tokio::test]
    async fn confirmed_candidate_completes_payout() {
        let _ = env_logger::try_init();
        let db = MemoryDatabase::default();
        let ledger = FakeLedger::default();
        ledger.add_transaction(txid(1), 1);
        let payout = in_progress(&db, 1, &[txid(1)]);

        let report = sweep(&db, &ledger).await;
        assert_eq!(report.completed, 1);
        let payout = db.payout(payout.id).unwrap();
        assert_eq!(payout.state, PayoutState::Completed);
        let proof = on_chain_proof(&payout);
        assert!(proof.candidates().is_empty());
        assert_eq!(proof.transaction_id(), Some(&txid(1)));
        assert_eq!(payout.blob.revision, 1);
    }

    #[tokio::test]
    async fn evicted_candidate_reverts_payout() {
        let db = MemoryDatabase::default();
        let ledger = FakeLedger::default();
        let payout = in_progress(&db, 1, &[txid(1)]);

        let report = sweep(&db, &ledger).await;
        assert_eq!(report.reverted, 1);
        let payout = db.payout(payout.id).unwrap();
        assert_eq!(payout.state, PayoutState::AwaitingPayment);
        let proof = on_chain_proof(&payout);
        assert!(proof.candidates().is_empty());
        assert_eq!(proof.transaction_id(), None);
    }

    #[tokio::test]
    async fn conflicting_rebroadcast_reverts_payout() {
        let db = MemoryDatabase::default();
        let ledger = FakeLedger::default();
        ledger.add_transaction(txid(1), 0);
        ledger.reject_as_conflicting(&txid(1));
        let payout = in_progress(&db, 1, &[txid(1)]);

        sweep(&db, &ledger).await;
        assert_eq!(db.payout(payout.id).unwrap().state, PayoutState::AwaitingPayment);
        assert_eq!(ledger.broadcasts().len(), 1);
    }

    #[tokio::test]
    async fn first_sufficiently_confirmed_candidate_wins() {
        let db = MemoryDatabase::default();
        let ledger = FakeLedger::default();
        ledger.add_transaction(txid(1), 0);
        ledger.add_transaction(txid(2), 3);
        ledger.add_transaction(txid(3), 6);
        let payout = in_progress(&db, 2, &[txid(1), txid(2), txid(3)]);

        sweep(&db, &ledger).await;
        let payout = db.payout(payout.id).unwrap();
        assert_eq!(payout.state, PayoutState::Completed);
        assert_eq!(on_chain_proof(&payout).transaction_id(), Some(&txid(2)));
        // Only the first, unconfirmed candidate was rebroadcast
        assert_eq!(ledger.broadcasts().len(), 1);
    }

    #[tokio::test]
    async fn pointer_moves_to_surviving_candidate() {
        let db = MemoryDatabase::default();
        let ledger = FakeLedger::default();
        ledger.add_transaction(txid(2), 0);
        let payout = in_progress(&db, 1, &[txid(1), txid(2)]);
        assert_eq!(on_chain_proof(&payout).transaction_id(), Some(&txid(1)));

        let report = sweep(&db, &ledger).await;
        assert_eq!(report.updated, 1);
        let payout = db.payout(payout.id).unwrap();
        assert_eq!(payout.state, PayoutState::InProgress);
        let proof = on_chain_proof(&payout);
        assert_eq!(proof.candidates(), &[txid(2)]);
        assert_eq!(proof.transaction_id(), Some(&txid(2)));
    }

    #[tokio::test]
    async fn sweeps_are_idempotent() {
        let db = MemoryDatabase::default();
        let ledger = FakeLedger::default();
        ledger.add_transaction(txid(1), 0);
        ledger.add_transaction(txid(2), 0);
        let payout = in_progress(&db, 1, &[txid(1), txid(2)]);

        let first = sweep(&db, &ledger).await;
        assert_eq!(first.updated, 1);
        let after_first = db.payout(payout.id).unwrap();
        let second = sweep(&db, &ledger).await;
        assert_eq!(second.changed(), 0);
        assert_eq!(db.payout(payout.id).unwrap(), after_first);
    }

    #[tokio::test]
    async fn ledger_outage_changes_nothing() {
        let db = MemoryDatabase::default();
        let ledger = FakeLedger::default();
        ledger.add_transaction(txid(1), 5);
        let payout = in_progress(&db, 1, &[txid(1)]);
        ledger.set_offline(true);

        let report = sweep(&db, &ledger).await;
        assert_eq!(report.changed(), 0);
        assert_eq!(db.payout(payout.id).unwrap(), payout);
    }

    #[tokio::test]
    async fn one_bad_payout_does_not_stop_the_sweep() {
        let db = MemoryDatabase::default();
        let ledger = FakeLedger::default();
        ledger.add_transaction(txid(2), 1);
        let new = NewPayout::new(StoreId::from("store"), rail(), ADDRESS.into(), Satoshis::from(10_000));
        let broken = db.seed_payout(new, PayoutState::InProgress, Some(json!({"proofType": "SomethingElse"})));
        let good = in_progress(&db, 1, &[txid(2)]);

        let report = sweep(&db, &ledger).await;
        assert_eq!(report.examined, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(db.payout(broken.id).unwrap().state, PayoutState::InProgress);
        assert_eq!(db.payout(good.id).unwrap().state, PayoutState::Completed);
    }

    #[tokio::test]
    async fn pointer_without_candidates_is_cleared_on_revert() {
        let db = MemoryDatabase::default();
        let ledger = FakeLedger::default();
        let new = NewPayout::new(StoreId::from("store"), rail(), ADDRESS.into(), Satoshis::from(10_000));
        let proof = json!({"proofType": "PayoutTransactionOnChainBlob", "transactionId": txid(0xab).to_string()});
        let payout = db.seed_payout(new, PayoutState::InProgress, Some(proof));

        let report = sweep(&db, &ledger).await;
        assert_eq!(report.reverted, 1);
        let payout = db.payout(payout.id).unwrap();
        assert_eq!(payout.state, PayoutState::AwaitingPayment);
        assert_eq!(on_chain_proof(&payout), OnChainPayoutProof::default());
        // The next sender cycle can record a fresh broadcast
        assert!(on_chain_proof(&payout).add_candidate(txid(1)).unwrap());
    }

    #[tokio::test]
    async fn other_rails_and_states_are_ignored() {
        let db = MemoryDatabase::default();
        let ledger = FakeLedger::default();
        let ln =
            NewPayout::new(StoreId::from("store"), PayoutMethodId::lightning("BTC"), "lnbc1".into(), Satoshis::from(5));
        let ln = db.seed_payout(ln, PayoutState::InProgress, None);
        let waiting = NewPayout::new(StoreId::from("store"), rail(), ADDRESS.into(), Satoshis::from(10_000));
        let waiting = db.seed_payout(waiting, PayoutState::AwaitingPayment, None);

        let report = sweep(&db, &ledger).await;
        assert_eq!(report.examined, 0);
        assert_eq!(db.payout(ln.id).unwrap(), ln);
        assert_eq!(db.payout(waiting.id).unwrap(), waiting);
    }
}
