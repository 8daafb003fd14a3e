// Publish/subscribe registry
// The only path by which connection state reaches external observers

use crate::connection::StatusSnapshot;
use crate::error::ConnectionError;
use crate::protocol::InboundMessage;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::trace;

/// Event names: the built-in lifecycle set plus application-level names
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventName {
    Open,
    Close,
    Error,
    Message,
    Status,
    /// Demultiplexed from an inbound `{event, data}` envelope
    Custom(String),
}

impl EventName {
    pub fn as_str(&self) -> &str {
        match self {
            EventName::Open => "open",
            EventName::Close => "close",
            EventName::Error => "error",
            EventName::Message => "message",
            EventName::Status => "status",
            EventName::Custom(name) => name,
        }
    }
}

impl From<&str> for EventName {
    fn from(value: &str) -> Self {
        match value {
            "open" => EventName::Open,
            "close" => EventName::Close,
            "error" => EventName::Error,
            "message" => EventName::Message,
            "status" => EventName::Status,
            other => EventName::Custom(other.to_string()),
        }
    }
}

impl From<String> for EventName {
    fn from(value: String) -> Self {
        EventName::from(value.as_str())
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload delivered to handlers
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Open { is_mock: bool },
    Close { code: u16, reason: String, is_mock: bool },
    Error(ConnectionError),
    Message(InboundMessage),
    Status(StatusSnapshot),
    /// `data` field of a demultiplexed envelope
    Domain(Value),
}

type Handler = Arc<dyn Fn(&EventPayload) + Send + Sync>;

#[derive(Default)]
struct RegistryInner {
    handlers: RwLock<HashMap<EventName, Vec<(u64, Handler)>>>,
    next_id: AtomicU64,
}

impl RegistryInner {
    fn remove(&self, name: &EventName, id: u64) -> bool {
        let mut handlers = self.handlers.write();
        let Some(set) = handlers.get_mut(name) else {
            return false;
        };
        let before = set.len();
        set.retain(|(handler_id, _)| *handler_id != id);
        let removed = set.len() != before;
        if set.is_empty() {
            handlers.remove(name);
        }
        removed
    }
}

/// Event registry shared by a connection manager and its subscribers
#[derive(Clone, Default)]
pub struct EventRegistry {
    inner: Arc<RegistryInner>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; keep the returned handle to remove it later
    pub fn subscribe<F>(&self, name: impl Into<EventName>, handler: F) -> Subscription
    where
        F: Fn(&EventPayload) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.insert(name.into(), id, Arc::new(handler))
    }

    fn insert(&self, name: EventName, id: u64, handler: Handler) -> Subscription {
        self.inner
            .handlers
            .write()
            .entry(name.clone())
            .or_default()
            .push((id, handler));

        Subscription {
            registry: Arc::downgrade(&self.inner),
            name,
            id,
        }
    }

    /// Resolve with the next payload published under `name`.
    ///
    /// Yields `None` if the registry is dropped first.
    pub fn once(
        &self,
        name: impl Into<EventName>,
    ) -> impl Future<Output = Option<EventPayload>> + Send + 'static {
        let name = name.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let registry = Arc::downgrade(&self.inner);
        let own_name = name.clone();

        self.insert(
            name,
            id,
            Arc::new(move |payload: &EventPayload| {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(payload.clone());
                }
                if let Some(registry) = registry.upgrade() {
                    registry.remove(&own_name, id);
                }
            }),
        );

        async move { rx.await.ok() }
    }

    /// Invoke every handler registered for `name`.
    ///
    /// Iterates a snapshot, so handlers may (un)subscribe while being called.
    pub fn emit(&self, name: &EventName, payload: &EventPayload) {
        let snapshot: Vec<Handler> = match self.inner.handlers.read().get(name) {
            Some(set) => set.iter().map(|(_, handler)| Arc::clone(handler)).collect(),
            None => return,
        };

        trace!(event = %name, handlers = snapshot.len(), "dispatching event");
        for handler in snapshot {
            handler(payload);
        }
    }

    pub fn handler_count(&self, name: &EventName) -> usize {
        self.inner
            .handlers
            .read()
            .get(name)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

/// Handle returned by [`EventRegistry::subscribe`].
///
/// Dropping it leaves the handler registered; call [`Subscription::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<RegistryInner>,
    name: EventName,
    id: u64,
}

impl Subscription {
    /// Remove the handler; returns false if it was already gone
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(&self.name, self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_name_mapping() {
        assert_eq!(EventName::from("open"), EventName::Open);
        assert_eq!(EventName::from("status"), EventName::Status);
        assert_eq!(
            EventName::from("match:found"),
            EventName::Custom("match:found".to_string())
        );
        assert_eq!(EventName::Custom("x".into()).to_string(), "x");
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let registry = EventRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let sub = registry.subscribe("open", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.emit(&EventName::Open, &EventPayload::Open { is_mock: true });
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        registry.emit(&EventName::Open, &EventPayload::Open { is_mock: true });

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.handler_count(&EventName::Open), 0);
    }

    #[test]
    fn test_self_unsubscribe_during_dispatch() {
        let registry = EventRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let own = Arc::clone(&slot);
        let counter = Arc::clone(&hits);
        let sub = registry.subscribe("message", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = own.lock().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock() = Some(sub);

        let counter = Arc::clone(&hits);
        registry.subscribe("message", move |_| {
            counter.fetch_add(10, Ordering::SeqCst);
        });

        let payload = EventPayload::Domain(Value::Null);
        registry.emit(&EventName::Message, &payload);
        registry.emit(&EventName::Message, &payload);

        // first handler ran once, second ran on both dispatches
        assert_eq!(hits.load(Ordering::SeqCst), 21);
    }

    #[tokio::test]
    async fn test_once_resolves_and_unsubscribes() {
        let registry = EventRegistry::new();
        let next = registry.once("ready");
        assert_eq!(registry.handler_count(&EventName::from("ready")), 1);

        registry.emit(&EventName::from("ready"), &EventPayload::Domain(Value::from(1)));
        registry.emit(&EventName::from("ready"), &EventPayload::Domain(Value::from(2)));

        assert_eq!(next.await, Some(EventPayload::Domain(Value::from(1))));
        assert_eq!(registry.handler_count(&EventName::from("ready")), 0);
    }
}
