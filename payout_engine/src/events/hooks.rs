use std::{future::Future, pin::Pin, sync::Arc};

use tokio::task::JoinHandle;

use crate::events::{EventHandler, EventProducer, Handler, LedgerEvent};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub ledger_event_producer: Vec<EventProducer<LedgerEvent>>,
}

impl EventProducers {
    pub async fn publish_ledger_event(&self, event: LedgerEvent) {
        for producer in &self.ledger_event_producer {
            producer.publish_event(event.clone()).await;
        }
    }
}

pub struct EventHandlers {
    pub on_ledger_event: Option<EventHandler<LedgerEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_ledger_event = hooks.on_ledger_event.map(|f| EventHandler::new(buffer_size, f));
        Self { on_ledger_event }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_ledger_event {
            result.ledger_event_producer.push(handler.subscribe());
        }
        result
    }

    /// Spawns the handlers. Each one finishes once all of its producers have been dropped.
    pub fn start_handlers(self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        if let Some(handler) = self.on_ledger_event {
            handles.push(tokio::spawn(async move {
                handler.start_handler().await;
            }));
        }
        handles
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_ledger_event: Option<Handler<LedgerEvent>>,
}

impl EventHooks {
    pub fn on_ledger_event<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(LedgerEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_ledger_event = Some(Arc::new(f));
        self
    }
}
