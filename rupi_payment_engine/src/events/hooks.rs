use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    EventHandler, EventProducer, Handler, OrderAnnulledEvent, OrderCompletedEvent, OrderEvent, PayoutStuckEvent,
    ReferralRewardEvent,
};

/// A container struct for holding event producers for the different event types.
///
/// An EventProducer is a thin wrapper around an mpsc sender. You don't create this struct directly, but rather use
/// the [`EventHandlers::producers`] method to generate it.
#[derive(Default, Clone)]
pub struct EventProducers {
    pub new_order_producer: Vec<EventProducer<OrderEvent>>,
    pub order_paid_producer: Vec<EventProducer<OrderEvent>>,
    pub order_completed_producer: Vec<EventProducer<OrderCompletedEvent>>,
    pub order_annulled_producer: Vec<EventProducer<OrderAnnulledEvent>>,
    pub payout_stuck_producer: Vec<EventProducer<PayoutStuckEvent>>,
    pub referral_reward_producer: Vec<EventProducer<ReferralRewardEvent>>,
}

/// A container struct for holding event handlers for the different event types. These handlers are typically hooks
/// that allow other modules, plugins and integrations to respond to events on the payment engine.
pub struct EventHandlers {
    pub on_new_order: Option<EventHandler<OrderEvent>>,
    pub on_order_paid: Option<EventHandler<OrderEvent>>,
    pub on_order_completed: Option<EventHandler<OrderCompletedEvent>>,
    pub on_order_annulled: Option<EventHandler<OrderAnnulledEvent>>,
    pub on_payout_stuck: Option<EventHandler<PayoutStuckEvent>>,
    pub on_referral_reward: Option<EventHandler<ReferralRewardEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_new_order = hooks.on_new_order.map(|f| EventHandler::new(buffer_size, f));
        let on_order_paid = hooks.on_order_paid.map(|f| EventHandler::new(buffer_size, f));
        let on_order_completed = hooks.on_order_completed.map(|f| EventHandler::new(buffer_size, f));
        let on_order_annulled = hooks.on_order_annulled.map(|f| EventHandler::new(buffer_size, f));
        let on_payout_stuck = hooks.on_payout_stuck.map(|f| EventHandler::new(buffer_size, f));
        let on_referral_reward = hooks.on_referral_reward.map(|f| EventHandler::new(buffer_size, f));
        Self {
            on_new_order,
            on_order_paid,
            on_order_completed,
            on_order_annulled,
            on_payout_stuck,
            on_referral_reward,
        }
    }

    pub fn producers(&self) -> EventProducers {
        let mut producers = EventProducers::default();
        if let Some(handler) = &self.on_new_order {
            producers.new_order_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_order_paid {
            producers.order_paid_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_order_completed {
            producers.order_completed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_order_annulled {
            producers.order_annulled_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_payout_stuck {
            producers.payout_stuck_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_referral_reward {
            producers.referral_reward_producer.push(handler.subscribe());
        }
        producers
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_new_order {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_order_paid {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_order_completed {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_order_annulled {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_payout_stuck {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_referral_reward {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

/// EventHooks is a container struct for holding the callback functions that are called when an event is triggered.
/// The management of co-ordinating and calling the hooks is handled by the [`EventHandlers`] struct.
///
/// The typical usage flow is to create an EventHooks struct, populate it with the hooks you want to use, and then
/// pass it to the [`EventHandlers::new`] method to create the handlers.
///
/// The server will call `start_handlers` on the handlers to start the event callback process using mpsc channels.
#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_new_order: Option<Handler<OrderEvent>>,
    pub on_order_paid: Option<Handler<OrderEvent>>,
    pub on_order_completed: Option<Handler<OrderCompletedEvent>>,
    pub on_order_annulled: Option<Handler<OrderAnnulledEvent>>,
    pub on_payout_stuck: Option<Handler<PayoutStuckEvent>>,
    pub on_referral_reward: Option<Handler<ReferralRewardEvent>>,
}

impl EventHooks {
    pub fn on_new_order<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_new_order = Some(Arc::new(f));
        self
    }

    pub fn on_order_paid<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_order_paid = Some(Arc::new(f));
        self
    }

    pub fn on_order_completed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderCompletedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_order_completed = Some(Arc::new(f));
        self
    }

    pub fn on_order_annulled<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderAnnulledEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_order_annulled = Some(Arc::new(f));
        self
    }

    pub fn on_payout_stuck<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PayoutStuckEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_payout_stuck = Some(Arc::new(f));
        self
    }

    pub fn on_referral_reward<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(ReferralRewardEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_referral_reward = Some(Arc::new(f));
        self
    }
}
