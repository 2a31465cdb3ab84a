//! In-process pub/sub with isolated async handlers.
//!
//! `publish` invokes every subscriber of a channel concurrently and
//! returns only after all of them settle. A failing (or panicking)
//! handler is logged with its subscription id and channel and never
//! affects its peers or the publisher. The subscription map sits behind a
//! short-held lock; handlers are cloned out before invocation so the lock
//! is never held across an await.

use relay_protocol::Event;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tracing::{error, warn};
use uuid::Uuid;

/// Bus channel names of the relay's output taps.
pub mod channels {
    pub const CLI: &str = "cli";
    pub const DASHBOARD: &str = "dashboard";
    pub const ALERTS: &str = "alerts";
}

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

/// An event callback. Synchronous work just returns a ready future.
pub type Handler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

struct Subscriber {
    id: Uuid,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    subscribers: HashMap<String, Vec<Subscriber>>,
}

/// Single-process event bus keyed by string channel.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    /// Register a handler; the returned id is the unsubscribe token.
    pub fn subscribe(&self, channel: &str, handler: Handler) -> Uuid {
        let id = Uuid::new_v4();
        let mut inner = self.inner.lock().expect("bus lock");
        inner
            .subscribers
            .entry(channel.to_owned())
            .or_default()
            .push(Subscriber { id, handler });
        id
    }

    /// Convenience wrapper for closures returning any handler future.
    pub fn subscribe_fn<F, Fut>(&self, channel: &str, handler: F) -> Uuid
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.subscribe(channel, Arc::new(move |event| Box::pin(handler(event))))
    }

    /// Remove a subscription. Returns false when the id is unknown.
    pub fn unsubscribe(&self, subscription_id: Uuid) -> bool {
        let mut inner = self.inner.lock().expect("bus lock");
        for subscribers in inner.subscribers.values_mut() {
            let before = subscribers.len();
            subscribers.retain(|s| s.id != subscription_id);
            if subscribers.len() != before {
                return true;
            }
        }
        false
    }

    /// Deliver `event` to every subscriber of `channel`, concurrently,
    /// and wait for all of them. No subscribers is a no-op.
    pub async fn publish(&self, channel: &str, event: &Event) {
        let targets: Vec<(Uuid, Handler)> = {
            let inner = self.inner.lock().expect("bus lock");
            match inner.subscribers.get(channel) {
                None => return,
                Some(subs) => subs.iter().map(|s| (s.id, s.handler.clone())).collect(),
            }
        };

        let mut joins = Vec::with_capacity(targets.len());
        for (id, handler) in targets {
            let event = event.clone();
            // One task per handler: isolates panics as well as errors.
            joins.push((id, tokio::spawn(handler(event))));
        }

        for (id, join) in joins {
            match join.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        subscription_id = %id,
                        channel = %channel,
                        error = %e,
                        "event handler failed"
                    );
                }
                Err(e) => {
                    error!(
                        subscription_id = %id,
                        channel = %channel,
                        error = %e,
                        "event handler panicked"
                    );
                }
            }
        }
    }

    /// Channels that currently have at least one subscriber.
    pub fn channels(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("bus lock");
        let mut names: Vec<String> = inner
            .subscribers
            .iter()
            .filter(|(_, subs)| !subs.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        let inner = self.inner.lock().expect("bus lock");
        inner.subscribers.get(channel).map_or(0, Vec::len)
    }

    /// Drop every subscription on every channel.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("bus lock");
        if !inner.subscribers.is_empty() {
            warn!("event bus cleared with active subscriptions");
        }
        inner.subscribers.clear();
    }
}
