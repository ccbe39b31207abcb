//! Subscription registry
//!
//! Maps event type keys to the set of handlers interested in them. The
//! special key `*` receives every message. Handlers are compared by `Arc`
//! identity, so registering the same handler twice under one key leaves a
//! single registration.
//!
//! Dispatch never iterates the live map: [`SubscriptionRegistry::handlers_for`]
//! hands out a snapshot, which lets handlers subscribe and unsubscribe from
//! inside their own invocation without affecting the dispatch in progress.

use crate::core::Message;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// Result type returned by message handlers
pub type HandlerResult = anyhow::Result<()>;

/// A message handler
///
/// Handlers may fail; the router logs the failure and moves on to the next
/// handler.
pub type Handler = Arc<dyn Fn(&Message) -> HandlerResult + Send + Sync>;

/// Wrap a closure into a [`Handler`]
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Message) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_handler(a: &Handler, b: &Handler) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Scoped registration handle
///
/// Returned by every registration in this crate (message handlers as well
/// as lifecycle callbacks). Releasing it, either with
/// [`Subscription::unsubscribe`] or by dropping it, removes exactly the
/// registration it was created for. Releasing twice is a no-op.
#[must_use = "dropping a Subscription removes the registration immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Remove the registration
    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    /// Whether this handle still owns a registration
    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

type HandlerMap = HashMap<String, Vec<Handler>>;

/// Registry of message handlers keyed by event type
///
/// Cheap to clone; clones share the same handler table.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    handlers: Arc<RwLock<HandlerMap>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `event_type`
    ///
    /// Use [`crate::core::event_types::WILDCARD`] to receive every message.
    pub fn subscribe(&self, event_type: impl Into<String>, handler: Handler) -> Subscription {
        let event_type = event_type.into();

        {
            let mut handlers = write(&self.handlers);
            let entry = handlers.entry(event_type.clone()).or_default();
            if !entry.iter().any(|h| same_handler(h, &handler)) {
                entry.push(handler.clone());
            }
        }

        tracing::debug!(event_type = %event_type, "Handler subscribed");

        let table: Weak<RwLock<HandlerMap>> = Arc::downgrade(&self.handlers);
        Subscription::new(move || {
            if let Some(table) = table.upgrade() {
                remove(&table, &event_type, &handler);
            }
        })
    }

    /// Remove `handler` from `event_type`
    ///
    /// Returns `true` if a registration was removed.
    pub fn unsubscribe(&self, event_type: &str, handler: &Handler) -> bool {
        remove(&self.handlers, event_type, handler)
    }

    /// Snapshot of the handlers currently registered under `event_type`
    ///
    /// Exact match only; the wildcard set is fetched with
    /// `handlers_for("*")`.
    pub fn handlers_for(&self, event_type: &str) -> Vec<Handler> {
        read(&self.handlers)
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of handlers registered under `event_type`
    pub fn handler_count(&self, event_type: &str) -> usize {
        read(&self.handlers).get(event_type).map_or(0, Vec::len)
    }

    /// Event types that currently have at least one handler
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = read(&self.handlers).keys().cloned().collect();
        types.sort();
        types
    }

    /// Drop every registration
    ///
    /// Outstanding [`Subscription`] handles become no-ops.
    pub fn clear(&self) {
        write(&self.handlers).clear();
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}

fn remove(table: &RwLock<HandlerMap>, event_type: &str, handler: &Handler) -> bool {
    let mut handlers = write(table);
    let Some(entry) = handlers.get_mut(event_type) else {
        return false;
    };

    let before = entry.len();
    entry.retain(|h| !same_handler(h, handler));
    let removed = entry.len() < before;

    if entry.is_empty() {
        handlers.remove(event_type);
    }
    drop(handlers);

    if removed {
        tracing::debug!(event_type = %event_type, "Handler unsubscribed");
    }
    removed
}

// Handlers never run while the lock is held, so a poisoned lock still
// guards a consistent map.
fn read(table: &RwLock<HandlerMap>) -> RwLockReadGuard<'_, HandlerMap> {
    table.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(table: &RwLock<HandlerMap>) -> RwLockWriteGuard<'_, HandlerMap> {
    table.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_types::WILDCARD;

    fn noop() -> Handler {
        handler(|_| Ok(()))
    }

    #[test]
    fn test_subscribe_and_snapshot() {
        let registry = SubscriptionRegistry::new();
        let h = noop();

        let _sub = registry.subscribe("spc_alert", h.clone());

        let snapshot = registry.handlers_for("spc_alert");
        assert_eq!(snapshot.len(), 1);
        assert!(same_handler(&snapshot[0], &h));
        assert!(registry.handlers_for("kpi_update").is_empty());
    }

    #[test]
    fn test_same_handler_twice_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let h = noop();

        let _a = registry.subscribe("spc_alert", h.clone());
        let _b = registry.subscribe("spc_alert", h.clone());

        assert_eq!(registry.handler_count("spc_alert"), 1);
    }

    #[test]
    fn test_distinct_handlers_are_kept_apart() {
        let registry = SubscriptionRegistry::new();

        let _a = registry.subscribe("spc_alert", noop());
        let _b = registry.subscribe("spc_alert", noop());

        assert_eq!(registry.handler_count("spc_alert"), 2);
    }

    #[test]
    fn test_unsubscribe_twice_is_safe() {
        let registry = SubscriptionRegistry::new();
        let mut sub = registry.subscribe("spc_alert", noop());

        sub.unsubscribe();
        assert!(!sub.is_active());
        sub.unsubscribe();

        assert_eq!(registry.handler_count("spc_alert"), 0);
    }

    #[test]
    fn test_drop_unsubscribes_and_collects_empty_keys() {
        let registry = SubscriptionRegistry::new();
        {
            let _sub = registry.subscribe(WILDCARD, noop());
            assert_eq!(registry.event_types(), vec!["*".to_string()]);
        }
        assert!(registry.event_types().is_empty());
    }

    #[test]
    fn test_unsubscribe_by_handler() {
        let registry = SubscriptionRegistry::new();
        let h = noop();
        let _sub = registry.subscribe("kpi_update", h.clone());

        assert!(registry.unsubscribe("kpi_update", &h));
        assert!(!registry.unsubscribe("kpi_update", &h));
        assert!(!registry.unsubscribe("never_registered", &h));
    }

    #[test]
    fn test_subscription_only_removes_its_own_key() {
        let registry = SubscriptionRegistry::new();
        let h = noop();

        let mut alerts = registry.subscribe("spc_alert", h.clone());
        let _kpis = registry.subscribe("kpi_update", h.clone());

        alerts.unsubscribe();

        assert_eq!(registry.handler_count("spc_alert"), 0);
        assert_eq!(registry.handler_count("kpi_update"), 1);
    }

    #[test]
    fn test_snapshot_is_detached_from_later_changes() {
        let registry = SubscriptionRegistry::new();
        let mut sub = registry.subscribe("spc_alert", noop());

        let snapshot = registry.handlers_for("spc_alert");
        sub.unsubscribe();
        let _late = registry.subscribe("spc_alert", noop());

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.handler_count("spc_alert"), 1);
    }

    #[test]
    fn test_subscription_outliving_registry_is_harmless() {
        let registry = SubscriptionRegistry::new();
        let mut sub = registry.subscribe("spc_alert", noop());

        drop(registry);
        sub.unsubscribe();
        assert!(!sub.is_active());
    }

    #[test]
    fn test_clear() {
        let registry = SubscriptionRegistry::new();
        let mut sub = registry.subscribe("spc_alert", noop());
        registry.clear();

        assert!(registry.event_types().is_empty());
        sub.unsubscribe();
    }
}
