//! Simple stateless pub-sub event handler
//!
//! This module provides a simple hook system that allow components of the engine to subscribe to ledger events and
//! react to them. The event handler is stateless, i.e. the handlers have no access to the internal state of the
//! system. All that is received is the event itself.
//!
//! Handlers are async, and events are handled strictly one at a time, in the order they were received. A handler
//! that is still busy with one event applies back-pressure to the producers through the channel buffer.
use std::{future::Future, pin::Pin, sync::Arc};

use log::*;
use tokio::sync::mpsc;

pub type Handler<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct EventHandler<E: Send + Sync + 'static> {
    listener: mpsc::Receiver<E>,
    sender: mpsc::Sender<E>,
    handler: Handler<E>,
}

impl<E: Send + Sync + 'static> EventHandler<E> {
    pub fn new(buffer_size: usize, handler: Handler<E>) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        Self { listener: receiver, sender, handler }
    }

    pub fn subscribe(&self) -> EventProducer<E> {
        EventProducer::new(self.sender.clone())
    }

    /// Runs until every producer has been dropped and the queue has drained.
    pub async fn start_handler(mut self) {
        debug!("📬️ Starting event handler");
        // drop the internal sender so that when the last subscriber is dropped, we can automatically shut down the
        // handler
        drop(self.sender);
        let mut handled = 0u64;
        while let Some(ev) = self.listener.recv().await {
            trace!("📬️ Handling event");
            (self.handler)(ev).await;
            handled += 1;
            trace!("📬️ Event handled");
        }
        debug!("📬️ Event handler has shut down after {handled} events");
    }
}

#[derive(Clone)]
pub struct EventProducer<E: Send + Sync> {
    sender: mpsc::Sender<E>,
}

impl<E: Send + Sync> EventProducer<E> {
    pub fn new(sender: mpsc::Sender<E>) -> Self {
        Self { sender }
    }

    pub async fn publish_event(&self, event: E) {
        if let Err(e) = self.sender.send(event).await {
            error!("📬️ Failed to send event: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use super::*;

    #[tokio::test]
    async fn events_are_handled_one_at_a_time() {
        let _ = env_logger::try_init();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let busy = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let s2 = seen.clone();
        let handler = Arc::new(move |v: u64| {
            let seen = seen.clone();
            let busy = busy.clone();
            Box::pin(async move {
                assert!(!busy.swap(true, std::sync::atomic::Ordering::SeqCst), "handlers overlapped");
                tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
                seen.lock().unwrap().push(v);
                busy.store(false, std::sync::atomic::Ordering::SeqCst);
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        let event_handler = EventHandler::new(1, handler);
        let producer = event_handler.subscribe();
        tokio::spawn(async move {
            for v in 0..10 {
                producer.publish_event(v).await;
                debug!("Published {v}");
            }
        });

        event_handler.start_handler().await;
        assert_eq!(*s2.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }
}
