use std::future::Future;

use crate::{
    db_types::{PaymentMethodConfig, PayoutMethodId, StoreId},
    traits::PayoutDatabaseError,
};

/// Read access to the stores' payout settings. Stores themselves are managed elsewhere.
pub trait StoreManagement: Clone + Send + Sync + 'static {
    fn fetch_payment_method(
        &self,
        store_id: &StoreId,
        payout_method_id: &PayoutMethodId,
    ) -> impl Future<Output = Result<Option<PaymentMethodConfig>, PayoutDatabaseError>> + Send;

    fn save_payment_method(
        &self,
        config: PaymentMethodConfig,
    ) -> impl Future<Output = Result<PaymentMethodConfig, PayoutDatabaseError>> + Send;
}
