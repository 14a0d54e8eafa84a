//! Synchronous observer registry.
//!
//! States notify their subscribers from inside `set()`, and the orchestrator
//! notifies its listeners at the point a message is appended or the status
//! changes. Callbacks run on the caller's stack, after the registry lock has
//! been released, so a callback may itself subscribe or unsubscribe.

use std::sync::{Arc, Mutex, PoisonError, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// A list of callbacks invoked synchronously on [`Observers::notify`].
pub struct Observers<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> Observers<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a callback. Keep the returned handle to unsubscribe later;
    /// dropping it leaves the callback registered.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .entries
                        .retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Invoke every registered callback, in subscription order.
    pub fn notify(&self, event: &T) {
        let callbacks: Vec<Callback<T>> = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .inner
            .lock()
            .map(|r| r.entries.len())
            .unwrap_or_default();
        f.debug_struct("Observers")
            .field("subscriptions", &count)
            .finish()
    }
}

/// Handle returned by [`Observers::subscribe`].
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the callback from its registry. A no-op if the registry is gone.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn notify_reaches_subscribers_in_order() {
        let observers: Observers<u32> = Observers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = Arc::clone(&seen);
        let _first = observers.subscribe(move |v| a.lock().unwrap().push(("first", *v)));
        let b = Arc::clone(&seen);
        let _second = observers.subscribe(move |v| b.lock().unwrap().push(("second", *v)));

        observers.notify(&7);
        assert_eq!(*seen.lock().unwrap(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let observers: Observers<()> = Observers::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let sub = observers.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        observers.notify(&());
        sub.unsubscribe();
        observers.notify(&());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(observers.is_empty());
    }

    #[test]
    fn unsubscribe_after_registry_dropped_is_noop() {
        let observers: Observers<()> = Observers::new();
        let sub = observers.subscribe(|_| {});
        drop(observers);
        sub.unsubscribe();
    }

    #[test]
    fn callback_may_subscribe_reentrantly() {
        let observers: Arc<Observers<()>> = Arc::new(Observers::new());
        let inner = Arc::clone(&observers);
        let _sub = observers.subscribe(move |_| {
            let _ = inner.subscribe(|_| {});
        });
        observers.notify(&());
        assert_eq!(observers.len(), 2);
    }
}
