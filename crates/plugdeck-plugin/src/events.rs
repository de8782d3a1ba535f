//! Cross-plugin event bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use plugdeck_core::Value;
use tokio::sync::mpsc;

/// Broadcast after a plugin is installed.
pub const PLUGIN_INSTALLED: &str = "plugin:installed";
/// Broadcast before a plugin's files are removed.
pub const PLUGIN_UNINSTALLED: &str = "plugin:uninstalled";
pub const PLUGIN_ENABLED: &str = "plugin:enabled";
pub const PLUGIN_DISABLED: &str = "plugin:disabled";

/// Receiver end of a subscription.
pub trait EventSink: Send + Sync {
    /// Hand over one event. Returns `false` when the sink is gone.
    fn deliver(&self, event: &str, payload: &Value) -> bool;

    fn is_alive(&self) -> bool {
        true
    }
}

/// Sink forwarding into an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(String, Value)>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<(String, Value)>) -> Self {
        Self { tx }
    }

    /// A sink and the receiver it feeds.
    pub fn pair() -> (Arc<Self>, mpsc::UnboundedReceiver<(String, Value)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::new(tx)), rx)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, event: &str, payload: &Value) -> bool {
        self.tx.send((event.to_string(), payload.clone())).is_ok()
    }

    fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Who a subscription belongs to; removed together with its owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    Plugin(String),
    Surface(u64),
    /// Host-side listeners (CLI, automation engine).
    Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    owner: Owner,
    sink: Arc<dyn EventSink>,
}

/// Event name → subscribers.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, event: &str, owner: Owner, sink: Arc<dyn EventSink>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .entry(event.to_string())
            .or_default()
            .push(Subscription { id, owner, sink });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let mut removed = false;
        for subs in subscriptions.values_mut() {
            let before = subs.len();
            subs.retain(|s| s.id != id);
            removed |= subs.len() != before;
        }
        subscriptions.retain(|_, subs| !subs.is_empty());
        removed
    }

    /// Deliver to every live subscriber. Dead ones are dropped. Returns the
    /// number of deliveries.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        // Deliver outside the lock so sinks may subscribe or emit themselves.
        let targets: Vec<(SubscriptionId, Arc<dyn EventSink>)> = self
            .subscriptions
            .read()
            .get(event)
            .map(|subs| subs.iter().map(|s| (s.id, s.sink.clone())).collect())
            .unwrap_or_default();

        let mut dead = vec![];
        let mut delivered = 0;
        for (id, sink) in targets {
            if sink.is_alive() && sink.deliver(event, payload) {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            tracing::debug!(event, dropped = dead.len(), "dropping dead subscribers");
            let mut subscriptions = self.subscriptions.write();
            if let Some(subs) = subscriptions.get_mut(event) {
                subs.retain(|s| !dead.contains(&s.id));
                if subs.is_empty() {
                    subscriptions.remove(event);
                }
            }
        }
        delivered
    }

    /// Remove every subscription of an owner.
    pub fn remove_owner(&self, owner: &Owner) -> usize {
        let mut subscriptions = self.subscriptions.write();
        let mut removed = 0;
        for subs in subscriptions.values_mut() {
            let before = subs.len();
            subs.retain(|s| &s.owner != owner);
            removed += before - subs.len();
        }
        subscriptions.retain(|_, subs| !subs.is_empty());
        removed
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.subscriptions.read().get(event).map(Vec::len).unwrap_or(0)
    }

    /// Number of subscriptions held by `owner`.
    pub fn owned_by(&self, owner: &Owner) -> usize {
        self.subscriptions
            .read()
            .values()
            .flatten()
            .filter(|s| &s.owner == owner)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_emit_reaches_live_and_drops_dead() {
        let bus = EventBus::new();
        let (live, mut live_rx) = ChannelSink::pair();
        let (dead, dead_rx) = ChannelSink::pair();
        drop(dead_rx);

        bus.subscribe("tick", Owner::Plugin("a".into()), live);
        bus.subscribe("tick", Owner::Plugin("b".into()), dead);

        assert_eq!(bus.emit("tick", &json!(1)), 1);
        assert_eq!(live_rx.try_recv().unwrap(), ("tick".to_string(), json!(1)));
        assert_eq!(bus.subscriber_count("tick"), 1);
    }

    #[test]
    fn test_remove_owner() {
        let bus = EventBus::new();
        let (sink, _rx) = ChannelSink::pair();
        bus.subscribe("a", Owner::Surface(7), sink.clone());
        bus.subscribe("b", Owner::Surface(7), sink.clone());
        let keep = bus.subscribe("a", Owner::Host, sink);

        assert_eq!(bus.remove_owner(&Owner::Surface(7)), 2);
        assert_eq!(bus.subscriber_count("b"), 0);
        assert!(bus.unsubscribe(keep));
        assert_eq!(bus.subscriber_count("a"), 0);
    }
}
