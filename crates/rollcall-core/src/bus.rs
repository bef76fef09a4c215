//! Priority-ordered publish/subscribe.
//!
//! Delivery for one `emit` is synchronous and runs over a snapshot of the
//! subscriber list, so handlers may subscribe, unsubscribe or emit again
//! without disturbing the pass in progress. The only exception is once
//! listeners: each is claimed right before its invocation and is skipped if
//! something else already removed it.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{BusError, ListenerError};
use crate::registry::Module;
use crate::validation::Validator;

/// Event name that matches every event.
pub const WILDCARD: &str = "*";

pub type ListenerId = Uuid;

pub type ListenerResult = Result<Value, ListenerError>;

type PayloadFn = dyn Fn(&Value) -> ListenerResult + Send + Sync;
type NamedFn = dyn Fn(&str, &Value) -> ListenerResult + Send + Sync;

/// A subscriber callback.
#[derive(Clone)]
pub enum Callback {
    /// Receives the payload only.
    Payload(Arc<PayloadFn>),
    /// Receives the event name and the payload.
    Named(Arc<NamedFn>),
}

impl Callback {
    pub fn payload<F>(f: F) -> Self
    where
        F: Fn(&Value) -> ListenerResult + Send + Sync + 'static,
    {
        Callback::Payload(Arc::new(f))
    }

    pub fn named<F>(f: F) -> Self
    where
        F: Fn(&str, &Value) -> ListenerResult + Send + Sync + 'static,
    {
        Callback::Named(Arc::new(f))
    }

    fn invoke(&self, event: &str, payload: &Value) -> ListenerResult {
        match self {
            Callback::Payload(f) => f(payload),
            Callback::Named(f) => f(event, payload),
        }
    }

    /// Identity comparison: true only for clones of the same callback.
    pub fn same_as(&self, other: &Callback) -> bool {
        match (self, other) {
            (Callback::Payload(a), Callback::Payload(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (Callback::Named(a), Callback::Named(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

#[derive(Clone)]
struct ListenerEntry {
    id: ListenerId,
    callback: Callback,
    priority: i32,
    once: bool,
    seq: u64,
}

/// Introspection record for one subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListenerInfo {
    pub id: ListenerId,
    pub priority: i32,
    pub once: bool,
}

/// A listener that returned an error or panicked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListenerFailure {
    pub listener: ListenerId,
    pub error: String,
}

/// Outcome of one `emit`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dispatch {
    /// Return values of the listeners that succeeded, in delivery order.
    pub results: Vec<Value>,
    pub failures: Vec<ListenerFailure>,
}

impl Dispatch {
    /// Number of listeners invoked.
    pub fn delivered(&self) -> usize {
        self.results.len() + self.failures.len()
    }

    /// First non-null listener result.
    pub fn first_value(&self) -> Option<&Value> {
        self.results.iter().find(|v| !v.is_null())
    }
}

/// In-process event bus.
///
/// Listeners for one event are kept sorted by descending priority; equal
/// priorities keep subscription order. `emit` merges the event's listeners
/// with the wildcard listeners under the same ordering.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<String, Vec<ListenerEntry>>>,
    next_seq: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<ListenerEntry>>> {
        self.listeners.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<ListenerEntry>>> {
        self.listeners.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe a standing listener with priority 0.
    pub fn on<F>(&self, event: &str, f: F) -> Result<ListenerId, BusError>
    where
        F: Fn(&Value) -> ListenerResult + Send + Sync + 'static,
    {
        self.subscribe(event, Callback::payload(f), 0, false)
    }

    pub fn on_priority<F>(&self, event: &str, priority: i32, f: F) -> Result<ListenerId, BusError>
    where
        F: Fn(&Value) -> ListenerResult + Send + Sync + 'static,
    {
        self.subscribe(event, Callback::payload(f), priority, false)
    }

    /// Subscribe a listener that is removed after its first delivery.
    pub fn once<F>(&self, event: &str, f: F) -> Result<ListenerId, BusError>
    where
        F: Fn(&Value) -> ListenerResult + Send + Sync + 'static,
    {
        self.subscribe(event, Callback::payload(f), 0, true)
    }

    pub fn once_priority<F>(
        &self,
        event: &str,
        priority: i32,
        f: F,
    ) -> Result<ListenerId, BusError>
    where
        F: Fn(&Value) -> ListenerResult + Send + Sync + 'static,
    {
        self.subscribe(event, Callback::payload(f), priority, true)
    }

    /// Subscribe to every event; the callback receives the event name.
    pub fn on_any<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&str, &Value) -> ListenerResult + Send + Sync + 'static,
    {
        self.insert(WILDCARD, Callback::named(f), 0, false)
    }

    pub fn once_any<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&str, &Value) -> ListenerResult + Send + Sync + 'static,
    {
        self.insert(WILDCARD, Callback::named(f), 0, true)
    }

    /// General form of every subscribe operation.
    pub fn subscribe(
        &self,
        event: &str,
        callback: Callback,
        priority: i32,
        once: bool,
    ) -> Result<ListenerId, BusError> {
        Validator::validate_event_name(event)?;
        Ok(self.insert(event, callback, priority, once))
    }

    fn insert(&self, event: &str, callback: Callback, priority: i32, once: bool) -> ListenerId {
        let entry = ListenerEntry {
            id: Uuid::new_v4(),
            callback,
            priority,
            once,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        let id = entry.id;

        let mut listeners = self.write();
        let list = listeners.entry(event.to_string()).or_default();
        let pos = list.partition_point(|e| e.priority >= priority);
        list.insert(pos, entry);

        debug!(event, %id, priority, once, "Listener subscribed");
        id
    }

    /// Remove one listener by id. Returns whether it was found.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.remove_where(event, |e| e.id == id)
    }

    /// Remove every listener of `event` registered with this callback.
    pub fn off_callback(&self, event: &str, callback: &Callback) -> bool {
        self.remove_where(event, |e| e.callback.same_as(callback))
    }

    /// Remove every listener of `event`. Returns how many were removed.
    pub fn off_event(&self, event: &str) -> usize {
        let removed = self.write().remove(event).map_or(0, |list| list.len());
        debug!(event, removed, "Listeners cleared");
        removed
    }

    /// Remove every listener in the bus.
    pub fn clear(&self) -> usize {
        let mut listeners = self.write();
        let removed = listeners.values().map(Vec::len).sum();
        listeners.clear();
        debug!(removed, "Event bus cleared");
        removed
    }

    fn remove_where(&self, event: &str, matches: impl Fn(&ListenerEntry) -> bool) -> bool {
        let mut listeners = self.write();
        let Some(list) = listeners.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|e| !matches(e));
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Deliver `payload` to the listeners of `event` and to wildcard listeners.
    ///
    /// Never fails because of a listener: errors and panics are logged and
    /// collected in the returned `Dispatch`, and delivery continues.
    pub fn emit(&self, event: &str, payload: Value) -> Result<Dispatch, BusError> {
        Validator::validate_event_name(event)?;

        // (is_wildcard, entry)
        let snapshot: Vec<(bool, ListenerEntry)> = {
            let listeners = self.read();
            let mut merged = Vec::new();
            if event != WILDCARD {
                if let Some(list) = listeners.get(event) {
                    merged.extend(list.iter().cloned().map(|e| (false, e)));
                }
            }
            if let Some(list) = listeners.get(WILDCARD) {
                merged.extend(list.iter().cloned().map(|e| (true, e)));
            }
            merged.sort_by(|(_, a), (_, b)| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
            merged
        };

        let mut dispatch = Dispatch::default();
        for (wildcard, entry) in snapshot {
            let key = if wildcard { WILDCARD } else { event };
            if entry.once && !self.off(key, entry.id) {
                continue;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| entry.callback.invoke(event, &payload)));
            match outcome {
                Ok(Ok(value)) => dispatch.results.push(value),
                Ok(Err(e)) => {
                    warn!(event, listener = %entry.id, error = %e, "Listener failed");
                    dispatch.failures.push(ListenerFailure {
                        listener: entry.id,
                        error: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(event, listener = %entry.id, "Listener panicked");
                    dispatch.failures.push(ListenerFailure {
                        listener: entry.id,
                        error: "listener panicked".to_string(),
                    });
                }
            }
        }

        debug!(event, delivered = dispatch.delivered(), "Event emitted");
        Ok(dispatch)
    }

    /// Whether `event` has listeners of its own (wildcards are not counted).
    pub fn has_listeners(&self, event: &str) -> bool {
        self.listener_count(event) > 0
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.read().get(event).map_or(0, Vec::len)
    }

    /// Subscriptions of `event` in delivery order.
    pub fn listeners(&self, event: &str) -> Vec<ListenerInfo> {
        self.read()
            .get(event)
            .map(|list| {
                list.iter()
                    .map(|e| ListenerInfo {
                        id: e.id,
                        priority: e.priority,
                        once: e.once,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Module for EventBus {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Callback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |tag: &str| {
            let sink = sink.clone();
            let tag = tag.to_string();
            Callback::payload(move |_| {
                sink.lock().unwrap().push(tag.clone());
                Ok(json!(tag))
            })
        };
        (log, make)
    }

    #[test]
    fn test_higher_priority_runs_first() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.subscribe("x", make("low"), 5, false).unwrap();
        bus.subscribe("x", make("high"), 10, false).unwrap();

        let dispatch = bus.emit("x", json!(null)).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["high", "low"]);
        assert_eq!(dispatch.results, vec![json!("high"), json!("low")]);
    }

    #[test]
    fn test_equal_priority_keeps_subscription_order() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.subscribe("x", make("first"), 0, false).unwrap();
        bus.subscribe("x", make("second"), 0, true).unwrap();
        bus.subscribe("x", make("third"), 0, false).unwrap();

        bus.emit("x", json!({})).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let bus = EventBus::new();
        bus.on_priority("x", 5, |_| Err(ListenerError::new("broken")))
            .unwrap();
        bus.on_priority("x", 10, |_| Ok(json!("l2"))).unwrap();
        bus.on_priority("x", 1, |_| panic!("boom")).unwrap();

        let dispatch = bus.emit("x", json!(1)).unwrap();

        assert_eq!(dispatch.results, vec![json!("l2")]);
        assert_eq!(dispatch.failures.len(), 2);
        assert_eq!(dispatch.failures[0].error, "broken");
        assert_eq!(dispatch.delivered(), 3);
    }

    #[test]
    fn test_once_listener_fires_once() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        bus.once("x", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        })
        .unwrap();

        bus.emit("x", json!(1)).unwrap();
        bus.emit("x", json!(2)).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!bus.has_listeners("x"));
    }

    #[test]
    fn test_nested_emit_cannot_redeliver_once_listener() {
        let bus = Arc::new(EventBus::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let inner = bus.clone();
        bus.once("x", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            inner.emit("x", json!("nested")).unwrap();
            Ok(Value::Null)
        })
        .unwrap();

        bus.emit("x", json!("outer")).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wildcard_receives_event_name() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.on_any(move |event, payload| {
            sink.lock().unwrap().push((event.to_string(), payload.clone()));
            Ok(Value::Null)
        });

        bus.emit("student:toggle", json!({"studentId": 3})).unwrap();
        bus.emit("task:switch", json!({"taskId": 1})).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "student:toggle");
        assert_eq!(seen[1].1, json!({"taskId": 1}));
    }

    #[test]
    fn test_wildcard_merges_by_priority() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.subscribe("x", make("event"), 0, false).unwrap();
        bus.subscribe(WILDCARD, make("wild-high"), 10, false).unwrap();
        bus.subscribe(WILDCARD, make("wild-low"), -1, true).unwrap();

        bus.emit("x", json!(null)).unwrap();
        bus.emit("x", json!(null)).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["wild-high", "event", "wild-low", "wild-high", "event"]
        );
    }

    #[test]
    fn test_introspection_ignores_wildcards() {
        let bus = EventBus::new();
        bus.on_any(|_, _| Ok(Value::Null));
        bus.on("x", |_| Ok(Value::Null)).unwrap();
        bus.once_priority("x", 3, |_| Ok(Value::Null)).unwrap();

        assert_eq!(bus.listener_count("x"), 2);
        assert_eq!(bus.listener_count("y"), 0);
        assert!(!bus.has_listeners("y"));
        assert_eq!(bus.listener_count(WILDCARD), 1);

        let infos = bus.listeners("x");
        assert_eq!(infos[0].priority, 3);
        assert!(infos[0].once);
    }

    #[test]
    fn test_off_by_id_and_callback() {
        let bus = EventBus::new();
        let id = bus.on("x", |_| Ok(Value::Null)).unwrap();
        let callback = Callback::payload(|_| Ok(Value::Null));
        bus.subscribe("x", callback.clone(), 0, false).unwrap();
        bus.subscribe("x", callback.clone(), 0, true).unwrap();

        assert!(bus.off("x", id));
        assert!(!bus.off("x", id));
        assert!(bus.off_callback("x", &callback));
        assert!(!bus.has_listeners("x"));
    }

    #[test]
    fn test_off_event_removes_all_listeners() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = calls.clone();
            bus.on("x", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            })
            .unwrap();
        }
        bus.on("y", |_| Ok(Value::Null)).unwrap();

        assert_eq!(bus.off_event("x"), 3);
        let dispatch = bus.emit("x", json!(null)).unwrap();

        assert_eq!(dispatch.delivered(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(bus.clear(), 1);
    }

    #[test]
    fn test_unsubscribe_during_dispatch_keeps_snapshot() {
        let bus = Arc::new(EventBus::new());
        let (log, make) = recorder();
        let second = bus.subscribe("x", make("second"), 0, false).unwrap();
        let handle = bus.clone();
        bus.on_priority("x", 10, move |_| {
            handle.off("x", second);
            Ok(Value::Null)
        })
        .unwrap();

        bus.emit("x", json!(null)).unwrap();
        bus.emit("x", json!(null)).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn test_empty_event_name_is_rejected() {
        let bus = EventBus::new();
        assert_eq!(
            bus.on("", |_| Ok(Value::Null)),
            Err(BusError::EmptyEventName)
        );
        assert_eq!(bus.emit("", json!(null)), Err(BusError::EmptyEventName));
    }
}
