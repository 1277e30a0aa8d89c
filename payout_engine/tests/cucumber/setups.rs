use cucumber::given;
use payout_engine::{
    db_types::{PaymentMethodConfig, StoreId},
    traits::StoreManagement,
};

use crate::cucumber::{payout_world::rail, PayoutSystem, PayoutWorld};

#[given("a fresh install")]
async fn fresh_database(world: &mut PayoutWorld) {
    let system = PayoutSystem::new().await;
    world.system = Some(system);
}

#[given(expr = "store '{word}' pays out on-chain from wallet '{word}'")]
async fn store_pays_on_chain(world: &mut PayoutWorld, store: String, wallet: String) {
    let config =
        PaymentMethodConfig { store_id: StoreId::from(store), payout_method_id: rail(), enabled: true, wallet };
    world.system().db.save_payment_method(config).await.expect("Error saving payment method");
}
