use std::{future::Future, pin::Pin, sync::Arc};

use log::*;

use super::PayoutHandler;
use crate::{
    db_types::PayoutMethodId,
    events::{EventHooks, LedgerEvent, LedgerEventKind},
};

/// All the payout handlers known to the engine, in registration order.
#[derive(Clone, Default)]
pub struct PayoutHandlers {
    handlers: Vec<Arc<dyn PayoutHandler>>,
}

impl PayoutHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<H: PayoutHandler + 'static>(&mut self, handler: H) -> &mut Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// The first handler that can currently handle `rail`.
    pub fn find(&self, rail: &PayoutMethodId) -> Option<Arc<dyn PayoutHandler>> {
        self.handlers.iter().find(|h| h.can_handle(rail)).cloned()
    }

    /// The handler built for `rail`, whether or not it currently accepts new payouts.
    pub fn for_rail(&self, rail: &PayoutMethodId) -> Option<Arc<dyn PayoutHandler>> {
        self.handlers.iter().find(|h| h.payout_method_id() == rail).cloned()
    }

    pub fn supported_payout_methods(&self) -> Vec<PayoutMethodId> {
        self.handlers
            .iter()
            .filter(|h| h.can_handle(h.payout_method_id()))
            .map(|h| h.payout_method_id().clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Builds the hook that routes each ledger event to the handlers that subscribed to its kind and were built for its
    /// rail. Subscriptions are taken once, here.
    pub fn event_hooks(&self) -> EventHooks {
        let subscriptions: Arc<Vec<(Arc<dyn PayoutHandler>, Vec<LedgerEventKind>)>> =
            Arc::new(self.handlers.iter().map(|h| (Arc::clone(h), h.start_background_check())).collect());
        let mut hooks = EventHooks::default();
        hooks.on_ledger_event(move |event: LedgerEvent| {
            let subscriptions = Arc::clone(&subscriptions);
            Box::pin(async move {
                dispatch(subscriptions.as_slice(), &event).await;
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        hooks
    }
}

async fn dispatch(subscriptions: &[(Arc<dyn PayoutHandler>, Vec<LedgerEventKind>)], event: &LedgerEvent) {
    let kind = event.kind();
    let mut handled = false;
    for (handler, kinds) in subscriptions {
        // Read-only handlers refuse new claims but still reconcile what is already in flight
        if !kinds.contains(&kind) || handler.payout_method_id() != event.rail() {
            continue;
        }
        handled = true;
        match handler.background_check(event).await {
            Ok(report) if report.changed() + report.failed > 0 => {
                info!("🔁️ Sweep of {} after {event}: {report}", handler.payout_method_id())
            },
            Ok(report) => debug!("🔁️ Sweep of {} after {event}: {report}", handler.payout_method_id()),
            Err(e) => warn!("🔁️ Sweep of {} after {event} failed. {e}", handler.payout_method_id()),
        }
    }
    if !handled {
        trace!("📬️ No payout handler is interested in {event}");
    }
}
