use std::str::FromStr;

use bitcoin::Txid;
use cucumber::{then, when};
use payout_engine::{
    db_types::{PayoutState, ProcessorBlob, StoreId, TransferProcessorData},
    events::LedgerEvent,
    payout_objects::ClaimRequest,
    processors::ON_CHAIN_PROCESSOR,
    proof::OnChainPayoutProof,
    PayoutHandler,
};
use pse_common::Satoshis;

use crate::cucumber::{payout_world::rail, PayoutWorld};

async fn payout_proof(world: &PayoutWorld, id: i64) -> OnChainPayoutProof {
    let proof = world.system().api.parse_proof(id).await.expect("Error parsing proof");
    proof.expect("The payout has no proof").into_on_chain().expect("Not an on-chain proof")
}

async fn first_candidate(world: &PayoutWorld) -> Txid {
    let proof = payout_proof(world, world.last_payout()).await;
    *proof.candidates().first().expect("The payout has no candidates")
}

#[when(expr = "store '{word}' accepts a claim of {int} sats to '{word}'")]
async fn accept_claim(world: &mut PayoutWorld, store: String, sats: i64, destination: String) {
    let request = ClaimRequest::new(StoreId::from(store), rail(), &destination, Satoshis::from(sats));
    let payout = world.system().api.claim(request).await.expect("Error accepting claim");
    world.last_payout = Some(payout.id);
}

#[when(expr = "the on-chain sender runs for store '{word}'")]
async fn run_sender(world: &mut PayoutWorld, store: String) {
    let config = TransferProcessorData {
        id: 1,
        store_id: StoreId::from(store),
        payout_method_id: rail(),
        processor: ON_CHAIN_PROCESSOR.to_string(),
        blob: ProcessorBlob::default(),
    };
    let sender = world.system().sender(config);
    sender.run_cycle().await.expect("Error running the sender");
}

#[when("a block is mined")]
async fn mine_block(world: &mut PayoutWorld) {
    world.system().ledger.mine_block();
}

#[when("the payout transaction is evicted from the mempool")]
async fn evict(world: &mut PayoutWorld) {
    let txid = first_candidate(world).await;
    world.system().ledger.evict(&txid);
}

#[when("the payout transaction is double spent")]
async fn double_spend(world: &mut PayoutWorld) {
    let txid = first_candidate(world).await;
    world.system().ledger.reject_as_conflicting(&txid);
}

#[when("the ledger is swept")]
async fn sweep(world: &mut PayoutWorld) {
    let event = LedgerEvent::new_block(rail());
    world.system().handler.background_check(&event).await.expect("Error sweeping payouts");
}

#[then(expr = "the payout is {word}")]
async fn payout_state(world: &mut PayoutWorld, state: String) {
    let expected = PayoutState::from_str(&state).expect("Not a payout state");
    let payout = world.system().api.payout(world.last_payout()).await.unwrap().expect("Payout does not exist");
    assert_eq!(payout.state, expected);
}

#[then(expr = "the payout has {int} candidate transaction(s)")]
async fn candidate_count(world: &mut PayoutWorld, count: usize) {
    let proof = payout_proof(world, world.last_payout()).await;
    assert_eq!(proof.candidates().len(), count);
}

#[then(expr = "the payout was settled by transaction {word}")]
async fn settled_by(world: &mut PayoutWorld, txid: String) {
    let txid = Txid::from_str(&txid).expect("Not a transaction id");
    let proof = payout_proof(world, world.last_payout()).await;
    assert!(proof.is_settled());
    assert_eq!(proof.transaction_id(), Some(&txid));
}

#[then(expr = "wallet '{word}' has sent {int} transaction(s) paying {int} sats in total")]
async fn wallet_sends(world: &mut PayoutWorld, wallet: String, count: usize, total: i64) {
    let sends = world.system().ledger.sends();
    assert_eq!(sends.len(), count);
    assert!(sends.iter().all(|(w, _)| w == &wallet));
    let paid = sends.iter().flat_map(|(_, outputs)| outputs.iter()).map(|o| o.amount).sum::<Satoshis>();
    assert_eq!(paid, Satoshis::from(total));
}

#[then("the payout proof no longer points at a transaction")]
async fn proof_is_cleared(world: &mut PayoutWorld) {
    let proof = payout_proof(world, world.last_payout()).await;
    assert!(proof.candidates().is_empty());
    assert_eq!(proof.transaction_id(), None);
    assert!(!proof.is_settled());
}
