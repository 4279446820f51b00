//! Stateless pub-sub plumbing for engine events.
//!
//! Components subscribe by handing an async callback to an [`EventHandler`]; the engine publishes through cloned
//! [`EventProducer`]s. Callbacks receive the event value only, never engine state, and every invocation runs on
//! its own task so a slow notification hook can never back up the payout path.
use std::{future::Future, pin::Pin, sync::Arc};

use log::*;
use tokio::{sync::mpsc, task::JoinSet};

pub type Handler<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct EventHandler<E: Send + Sync + 'static> {
    inbox: mpsc::Receiver<E>,
    sender: mpsc::Sender<E>,
    callback: Handler<E>,
}

impl<E: Send + Sync + 'static> EventHandler<E> {
    pub fn new(buffer_size: usize, callback: Handler<E>) -> Self {
        let (sender, inbox) = mpsc::channel(buffer_size);
        Self { inbox, sender, callback }
    }

    pub fn subscribe(&self) -> EventProducer<E> {
        EventProducer::new(self.sender.clone())
    }

    /// Consume events until every producer is gone, then drain whatever callbacks are still in flight.
    pub async fn start_handler(mut self) {
        // Holding our own sender would keep the channel open forever; the loop below must end when the last
        // outside producer is dropped.
        drop(self.sender);
        let mut running = JoinSet::new();
        while let Some(event) = self.inbox.recv().await {
            trace!("📬️ Dispatching event");
            let callback = Arc::clone(&self.callback);
            running.spawn(async move {
                (callback)(event).await;
            });
            // Reap already-finished tasks so the set stays small on busy channels.
            while running.try_join_next().is_some() {}
        }
        if !running.is_empty() {
            debug!("📬️ Producers gone; waiting on {} in-flight callback(s)", running.len());
        }
        while let Some(finished) = running.join_next().await {
            if let Err(e) = finished {
                warn!("📬️ An event callback panicked or was cancelled: {e}");
            }
        }
        debug!("📬️ Event handler stopped");
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
            error!("📬️ Failed to publish event: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::events::ReferralRewardEvent;

    fn reward(referrer_id: i64, code: &str, milestone: bool) -> ReferralRewardEvent {
        ReferralRewardEvent { referrer_id, voucher_code: code.to_string(), milestone }
    }

    #[tokio::test]
    async fn rewards_from_every_producer_reach_the_callback() {
        let _ = env_logger::try_init();
        let total = Arc::new(AtomicU64::new(0));
        let milestones = Arc::new(AtomicU64::new(0));
        let (t, m) = (total.clone(), milestones.clone());
        let callback: Handler<ReferralRewardEvent> = Arc::new(move |event: ReferralRewardEvent| {
            let total = t.clone();
            let milestones = m.clone();
            Box::pin(async move {
                total.fetch_add(1, Ordering::SeqCst);
                if event.milestone {
                    milestones.fetch_add(1, Ordering::SeqCst);
                }
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        let handler = EventHandler::new(4, callback);
        let granting = handler.subscribe();
        let sweeping = handler.subscribe();
        tokio::spawn(async move {
            for n in 0..10 {
                granting.publish_event(reward(n, &format!("REF-{n}"), false)).await;
            }
        });
        tokio::spawn(async move {
            sweeping.publish_event(reward(42, "BONUS-1", true)).await;
        });

        // Returns only after both producers are dropped and all callbacks have run.
        handler.start_handler().await;
        assert_eq!(total.load(Ordering::SeqCst), 11);
        assert_eq!(milestones.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_stops_once_producers_are_dropped() {
        let seen = Arc::new(AtomicU64::new(0));
        let s = seen.clone();
        let callback: Handler<ReferralRewardEvent> = Arc::new(move |_event: ReferralRewardEvent| {
            let seen = s.clone();
            Box::pin(async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        let handler = EventHandler::new(1, callback);
        let producer = handler.subscribe();
        producer.publish_event(reward(1, "REF-A", false)).await;
        drop(producer);
        // Must not hang: the dropped producer closes the channel.
        handler.start_handler().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
