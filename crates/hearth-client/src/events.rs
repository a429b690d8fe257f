//! Local event subscriptions.
//!
//! Listeners are either per event type (raw [`HubEvent`]s) or entity
//! watchers fed decoded `state_changed` deltas. The registry also answers
//! which event types the hub must be subscribed to, so they can be replayed
//! after a reconnect.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use hearth_core::protocol::hub::STATE_CHANGED;
use hearth_core::protocol::{HubEvent, StateChanged};
use tokio::sync::mpsc;
use tracing::debug;

pub type SubscriptionId = u64;

enum Listener {
    Events {
        event_type: String,
        sink: mpsc::UnboundedSender<HubEvent>,
    },
    Entities {
        /// `None` watches every entity.
        filter: Option<HashSet<String>>,
        sink: mpsc::UnboundedSender<StateChanged>,
    },
}

impl Listener {
    fn event_type(&self) -> &str {
        match self {
            Self::Events { event_type, .. } => event_type,
            Self::Entities { .. } => STATE_CHANGED,
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            Self::Events { sink, .. } => sink.is_closed(),
            Self::Entities { sink, .. } => sink.is_closed(),
        }
    }
}

#[derive(Default)]
pub struct EventRegistry {
    next_id: SubscriptionId,
    listeners: BTreeMap<SubscriptionId, Listener>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener for `event_type`.
    ///
    /// The second value is `Some(event_type)` when this is the first listener
    /// for that type and the hub must be subscribed.
    pub fn subscribe(
        &mut self,
        event_type: &str,
        sink: mpsc::UnboundedSender<HubEvent>,
    ) -> (SubscriptionId, Option<String>) {
        let newly_needed = (!self.needs(event_type)).then(|| event_type.to_string());
        let id = self.insert(Listener::Events {
            event_type: event_type.to_string(),
            sink,
        });
        (id, newly_needed)
    }

    /// Watch `state_changed` deltas for `entity_ids` (all entities if empty).
    pub fn subscribe_entities(
        &mut self,
        entity_ids: &[String],
        sink: mpsc::UnboundedSender<StateChanged>,
    ) -> (SubscriptionId, Option<String>) {
        let newly_needed = (!self.needs(STATE_CHANGED)).then(|| STATE_CHANGED.to_string());
        let filter = (!entity_ids.is_empty()).then(|| entity_ids.iter().cloned().collect());
        let id = self.insert(Listener::Entities { filter, sink });
        (id, newly_needed)
    }

    /// Remove a listener. Returns the event type no listener needs any more.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Option<String> {
        let listener = self.listeners.remove(&id)?;
        let event_type = listener.event_type();
        (!self.needs(event_type)).then(|| event_type.to_string())
    }

    /// Deliver one hub event. Returns how many listeners received it.
    ///
    /// Event types nobody listens to are ignored. Listeners whose receiver
    /// was dropped are pruned.
    pub fn dispatch(&mut self, event: &HubEvent) -> usize {
        let change = if event.event_type == STATE_CHANGED {
            match serde_json::from_value::<StateChanged>(event.data.clone()) {
                Ok(change) => Some(change),
                Err(e) => {
                    debug!(error = %e, "Malformed state_changed payload");
                    None
                }
            }
        } else {
            None
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, listener) in &self.listeners {
            let sent = match listener {
                Listener::Events { event_type, sink } if *event_type == event.event_type => {
                    Some(sink.send(event.clone()).is_ok())
                }
                Listener::Entities { filter, sink } => change
                    .as_ref()
                    .filter(|c| filter.as_ref().is_none_or(|ids| ids.contains(&c.entity_id)))
                    .map(|c| sink.send(c.clone()).is_ok()),
                Listener::Events { .. } => None,
            };
            match sent {
                Some(true) => delivered += 1,
                Some(false) => closed.push(*id),
                None if listener.is_closed() => closed.push(*id),
                None => {}
            }
        }
        for id in closed {
            self.listeners.remove(&id);
        }
        delivered
    }

    /// Event types the hub must be subscribed to.
    pub fn event_types(&self) -> BTreeSet<String> {
        self.listeners
            .values()
            .map(|l| l.event_type().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    fn needs(&self, event_type: &str) -> bool {
        self.listeners.values().any(|l| l.event_type() == event_type)
    }

    fn insert(&mut self, listener: Listener) -> SubscriptionId {
        self.next_id += 1;
        self.listeners.insert(self.next_id, listener);
        self.next_id
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_changed(entity_id: &str, state: &str) -> HubEvent {
        HubEvent {
            event_type: STATE_CHANGED.into(),
            data: json!({
                "entity_id": entity_id,
                "old_state": null,
                "new_state": {"entity_id": entity_id, "state": state},
            }),
        }
    }

    #[test]
    fn first_and_last_listener_drive_hub_subscription() {
        let mut registry = EventRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let (a, needed) = registry.subscribe("call_service", tx.clone());
        assert_eq!(needed.as_deref(), Some("call_service"));
        let (b, needed) = registry.subscribe("call_service", tx);
        assert!(needed.is_none());

        assert!(registry.unsubscribe(a).is_none());
        assert_eq!(registry.unsubscribe(b).as_deref(), Some("call_service"));
        assert!(registry.unsubscribe(b).is_none());
        assert!(registry.event_types().is_empty());
    }

    #[test]
    fn generic_listener_gets_matching_type_only() {
        let mut registry = EventRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.subscribe("automation_triggered", tx);

        let event = HubEvent {
            event_type: "automation_triggered".into(),
            data: json!({"name": "porch"}),
        };
        assert_eq!(registry.dispatch(&event), 1);
        assert_eq!(registry.dispatch(&state_changed("light.a", "on")), 0);

        assert_eq!(rx.try_recv().unwrap(), event);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn entity_listener_filters_by_id() {
        let mut registry = EventRegistry::new();
        let (kitchen_tx, mut kitchen_rx) = mpsc::unbounded_channel();
        let (all_tx, mut all_rx) = mpsc::unbounded_channel();
        let (_, needed) = registry.subscribe_entities(&["light.kitchen".into()], kitchen_tx);
        assert_eq!(needed.as_deref(), Some(STATE_CHANGED));
        let (_, needed) = registry.subscribe_entities(&[], all_tx);
        assert!(needed.is_none());

        assert_eq!(registry.dispatch(&state_changed("light.kitchen", "on")), 2);
        assert_eq!(registry.dispatch(&state_changed("light.porch", "off")), 1);

        assert_eq!(kitchen_rx.try_recv().unwrap().entity_id, "light.kitchen");
        assert!(kitchen_rx.try_recv().is_err());
        assert_eq!(all_rx.try_recv().unwrap().entity_id, "light.kitchen");
        assert_eq!(all_rx.try_recv().unwrap().entity_id, "light.porch");
    }

    #[test]
    fn unknown_event_type_is_ignored() {
        let mut registry = EventRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.subscribe_entities(&[], tx);

        let event = HubEvent {
            event_type: "something_new".into(),
            data: json!({}),
        };
        assert_eq!(registry.dispatch(&event), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn malformed_state_changed_is_skipped() {
        let mut registry = EventRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.subscribe_entities(&[], tx);

        let event = HubEvent {
            event_type: STATE_CHANGED.into(),
            data: json!({"nope": true}),
        };
        assert_eq!(registry.dispatch(&event), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut registry = EventRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.subscribe_entities(&[], tx);
        drop(rx);

        assert_eq!(registry.dispatch(&state_changed("light.a", "on")), 0);
        assert!(registry.is_empty());
    }
}
