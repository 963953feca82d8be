//! Named publish/subscribe used to report everything upward.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{error, warn};

type Handler<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// Token returned by [`EventBus::on`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Registry<T> {
    next_id: u64,
    handlers: HashMap<String, Vec<(SubscriptionId, Handler<T>)>>,
}

/// A typed event bus keyed by event name.
///
/// Handlers for one name run in subscription order. A handler that returns an
/// error or panics is logged and skipped; the remaining handlers still run and
/// [`emit`](Self::emit) always returns normally.
pub struct EventBus<T> {
    registry: Mutex<Registry<T>>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventBus<T> {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                next_id: 0,
                handlers: HashMap::new(),
            }),
        }
    }

    /// Subscribe `handler` to `event`.
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry
            .handlers
            .entry(event.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscription. Returns `false` if it was not registered for `event`.
    pub fn off(&self, event: &str, id: SubscriptionId) -> bool {
        let mut registry = self.registry.lock();
        let Some(handlers) = registry.handlers.get_mut(event) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            registry.handlers.remove(event);
        }
        removed
    }

    /// Deliver `data` to every handler of `event`.
    ///
    /// Returns the number of handlers that completed successfully.
    pub fn emit(&self, event: &str, data: &T) -> usize {
        // Snapshot so handlers can (un)subscribe without deadlocking.
        let handlers: Vec<Handler<T>> = match self.registry.lock().handlers.get(event) {
            Some(handlers) => handlers.iter().map(|(_, h)| h.clone()).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(data))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(event, error = ?e, "Event handler failed"),
                Err(_) => error!(event, "Event handler panicked"),
            }
        }
        delivered
    }

    /// Number of handlers subscribed to `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.registry
            .lock()
            .handlers
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.registry.lock().handlers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> impl Fn(&u32) -> anyhow::Result<()> + Send + Sync + 'static {
        let log = log.clone();
        move |value: &u32| {
            log.lock().push(format!("{tag}:{value}"));
            Ok(())
        }
    }

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.on("tick", recorder(&log, "a"));
        bus.on("tick", recorder(&log, "b"));
        bus.on("other", recorder(&log, "c"));

        assert_eq!(bus.emit("tick", &7), 2);
        assert_eq!(*log.lock(), vec!["a:7", "b:7"]);
    }

    #[test]
    fn test_failing_handlers_are_isolated() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.on("tick", |_: &u32| Err(anyhow!("nope")));
        bus.on("tick", |_: &u32| -> anyhow::Result<()> { panic!("handler blew up") });
        bus.on("tick", recorder(&log, "last"));

        assert_eq!(bus.emit("tick", &1), 1);
        assert_eq!(*log.lock(), vec!["last:1"]);
    }

    #[test]
    fn test_off_removes_only_that_subscription() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = bus.on("tick", recorder(&log, "a"));
        bus.on("tick", recorder(&log, "b"));

        assert!(bus.off("tick", first));
        assert!(!bus.off("tick", first));
        assert!(!bus.off("missing", first));
        assert_eq!(bus.listener_count("tick"), 1);

        bus.emit("tick", &2);
        assert_eq!(*log.lock(), vec!["b:2"]);
    }

    #[test]
    fn test_emit_without_listeners() {
        let bus: EventBus<u32> = EventBus::new();
        assert_eq!(bus.emit("nobody", &0), 0);
    }

    #[test]
    fn test_handler_may_subscribe_during_emit() {
        let bus = Arc::new(EventBus::new());
        let inner = bus.clone();
        bus.on("tick", move |_: &u32| {
            inner.on("tick", |_: &u32| Ok(()));
            Ok(())
        });

        assert_eq!(bus.emit("tick", &0), 1);
        assert_eq!(bus.listener_count("tick"), 2);

        bus.clear();
        assert_eq!(bus.listener_count("tick"), 0);
    }
}
