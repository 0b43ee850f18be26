//! One-shot event rendezvous table.
//!
//! Client sessions correlate responses and notifications through this
//! registry: a handler is registered for a `(kind, id)` pair and fired
//! exactly once when the matching event is invoked. Events that arrive
//! before anyone registered are parked in a bounded `notified` queue, which
//! resolves the race between sending a request and registering its waiter.
//!
//! Draining is the terminal state: every surviving handler is fired with
//! [`DRAINED_VALUE`], queued notifications are discarded, and no further
//! registrations are accepted.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio::sync::oneshot;

/// Wildcard id for broadcast-style events (e.g. a connection-wide
/// `Connected`). Never sent on the wire.
pub const NO_ID: u32 = u32::MAX;

/// Value for events that carry no meaningful payload.
pub const NO_VALUE: u32 = u32::MAX;

/// Reserved sentinel delivered to handlers when the registry drains.
pub const DRAINED_VALUE: u32 = u32::MAX - 1;

/// Cap on notifications parked without a handler; excess is dropped.
pub const MAX_QUEUED_EVENTS: usize = 32;

type Callback = Box<dyn FnOnce(u32) + Send>;

enum Waiter {
    Callback(Callback),
    Rendezvous(oneshot::Sender<u32>),
}

struct Handler {
    kind: u32,
    id: u32,
    waiter: Waiter,
}

struct Queued {
    kind: u32,
    id: u32,
    value: u32,
}

#[derive(Default)]
struct State {
    handlers: Vec<Handler>,
    notified: VecDeque<Queued>,
    drained: bool,
}

/// Table mapping `(kind, id)` to a one-shot handler.
///
/// All operations are mutually exclusive on an internal lock; handlers are
/// fired on the invoking thread after the lock is released, so a handler
/// may re-enter the registry.
#[derive(Default)]
pub struct EventRegistry {
    state: Mutex<State>,
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("EventRegistry")
            .field("handlers", &state.handlers.len())
            .field("notified", &state.notified.len())
            .field("drained", &state.drained)
            .finish()
    }
}

impl EventRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a detached callback for `(kind, id)`.
    ///
    /// If a matching notification is already queued it is consumed and the
    /// callback runs synchronously. Fails once drained, or when a handler
    /// for the pair is already active.
    pub fn register_callback(
        &self,
        kind: u32,
        id: u32,
        callback: impl FnOnce(u32) + Send + 'static,
    ) -> bool {
        let mut state = self.lock();
        if state.drained {
            return false;
        }

        let pos = state.notified.iter().position(|q| q.kind == kind && q.id == id);
        if let Some(queued) = pos.and_then(|p| state.notified.remove(p)) {
            drop(state);
            callback(queued.value);
            return true;
        }

        if state.handlers.iter().any(|h| h.kind == kind && h.id == id) {
            tracing::warn!(kind, id, "handler already registered for event");
            return false;
        }
        state.handlers.push(Handler { kind, id, waiter: Waiter::Callback(Box::new(callback)) });
        true
    }

    /// Wait until `(kind, id)` fires or the registry drains.
    ///
    /// Returns `None` on drain (including a drain that happens mid-wait).
    pub async fn wait_for(&self, kind: u32, id: u32) -> Option<u32> {
        let rx = {
            let mut state = self.lock();
            if state.drained {
                return None;
            }

            let pos = state.notified.iter().position(|q| q.kind == kind && q.id == id);
            if let Some(queued) = pos.and_then(|p| state.notified.remove(p)) {
                return Some(queued.value);
            }

            if state.handlers.iter().any(|h| h.kind == kind && h.id == id) {
                tracing::warn!(kind, id, "handler already registered for event");
                return None;
            }
            let (tx, rx) = oneshot::channel();
            state.handlers.push(Handler { kind, id, waiter: Waiter::Rendezvous(tx) });
            rx
        };

        match rx.await {
            Ok(value) if value != DRAINED_VALUE => Some(value),
            _ => None,
        }
    }

    /// Fire `(kind, id)` with `value`.
    ///
    /// A matching handler is removed and run exactly once, on this thread.
    /// Without a handler the event is queued (bounded); after drain this is
    /// a no-op.
    pub fn invoke(&self, kind: u32, id: u32, value: u32) {
        let waiter = {
            let mut state = self.lock();
            match state.handlers.iter().position(|h| h.kind == kind && h.id == id) {
                Some(pos) => state.handlers.remove(pos).waiter,
                None => {
                    if state.drained {
                        return;
                    }
                    if state.notified.len() >= MAX_QUEUED_EVENTS {
                        tracing::warn!(kind, id, value, "event queue full, dropping notification");
                        return;
                    }
                    state.notified.push_back(Queued { kind, id, value });
                    return;
                },
            }
        };
        fire(waiter, value);
    }

    /// Remove the active handler for `(kind, id)` without firing it.
    pub fn cancel(&self, kind: u32, id: u32) -> bool {
        let mut state = self.lock();
        match state.handlers.iter().position(|h| h.kind == kind && h.id == id) {
            Some(pos) => {
                state.handlers.remove(pos);
                true
            },
            None => false,
        }
    }

    /// Drain the registry, waking every pending handler with
    /// [`DRAINED_VALUE`].
    ///
    /// Idempotent; returns `true` only for the first caller.
    pub fn drain(&self) -> bool {
        let survivors = {
            let mut state = self.lock();
            if state.drained {
                return false;
            }
            state.drained = true;
            state.notified.clear();
            std::mem::take(&mut state.handlers)
        };
        for handler in survivors {
            fire(handler.waiter, DRAINED_VALUE);
        }
        true
    }

    /// Whether the registry has drained.
    pub fn is_drained(&self) -> bool {
        self.lock().drained
    }
}

fn fire(waiter: Waiter, value: u32) {
    match waiter {
        Waiter::Callback(callback) => callback(value),
        Waiter::Rendezvous(tx) => {
            // receiver may have been dropped (waiter cancelled); nothing to do
            let _ = tx.send(value);
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    #[tokio::test]
    async fn invoke_then_wait_consumes_queued_notification() {
        let events = EventRegistry::new();
        events.invoke(1, 5, 77);
        assert_eq!(events.wait_for(1, 5).await, Some(77));
    }

    #[tokio::test]
    async fn wait_then_invoke_rendezvous() {
        let events = Arc::new(EventRegistry::new());
        let waiter = {
            let events = Arc::clone(&events);
            tokio::spawn(async move { events.wait_for(2, 9).await })
        };
        tokio::task::yield_now().await;
        events.invoke(2, 9, 1);
        assert_eq!(waiter.await.unwrap(), Some(1));
    }

    #[test]
    fn callback_runs_synchronously_on_invoke() {
        let events = EventRegistry::new();
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = Arc::clone(&hits);
        assert!(events.register_callback(3, 1, move |v| {
            hits2.store(v, Ordering::SeqCst);
        }));
        events.invoke(3, 1, 42);
        assert_eq!(hits.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn handler_fires_exactly_once() {
        let events = EventRegistry::new();
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = Arc::clone(&hits);
        events.register_callback(3, 1, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        events.invoke(3, 1, 1);
        events.invoke(3, 1, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let events = EventRegistry::new();
        assert!(events.register_callback(1, 1, |_| {}));
        assert!(!events.register_callback(1, 1, |_| {}));
    }

    #[tokio::test]
    async fn drain_wakes_all_waiters_with_none() {
        let events = Arc::new(EventRegistry::new());
        let mut waiters = Vec::new();
        for id in 0..4 {
            let events = Arc::clone(&events);
            waiters.push(tokio::spawn(async move { events.wait_for(0, id).await }));
        }
        tokio::task::yield_now().await;

        assert!(events.drain());
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), None);
        }
    }

    #[test]
    fn drain_is_idempotent_and_first_caller_wins() {
        let events = EventRegistry::new();
        assert!(events.drain());
        assert!(!events.drain());
        assert!(events.is_drained());
    }

    #[tokio::test]
    async fn wait_after_drain_returns_none() {
        let events = EventRegistry::new();
        events.drain();
        assert_eq!(events.wait_for(0, 1).await, None);
        assert!(!events.register_callback(0, 1, |_| {}));
    }

    #[test]
    fn invoke_after_drain_is_noop() {
        let events = EventRegistry::new();
        events.drain();
        events.invoke(0, 1, 5);
        // nothing to observe beyond not panicking; the queue stays empty
        assert!(events.is_drained());
    }

    #[tokio::test]
    async fn queue_is_bounded_and_drops_excess() {
        let events = EventRegistry::new();
        for value in 0..(MAX_QUEUED_EVENTS as u32 + 10) {
            events.invoke(7, value, value);
        }
        // the first MAX_QUEUED_EVENTS notifications survived, the rest were
        // dropped without crashing
        assert_eq!(events.wait_for(7, 0).await, Some(0));
        assert_eq!(
            events.wait_for(7, MAX_QUEUED_EVENTS as u32 - 1).await,
            Some(MAX_QUEUED_EVENTS as u32 - 1)
        );
    }

    #[test]
    fn cancel_removes_handler() {
        let events = EventRegistry::new();
        events.register_callback(1, 2, |_| {});
        assert!(events.cancel(1, 2));
        assert!(!events.cancel(1, 2));
        // pair is free again
        assert!(events.register_callback(1, 2, |_| {}));
    }

    mod properties {
        use std::{collections::HashSet, sync::Mutex};

        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// Whatever set of handlers is pending at drain, every one of
            /// them resumes exactly once with the drained sentinel.
            #[test]
            fn drain_resumes_every_pending_handler(
                pairs in prop::collection::hash_set((0u32..8, 0u32..64), 0..24)
            ) {
                let events = EventRegistry::new();
                let fired: Arc<Mutex<Vec<(u32, u32, u32)>>> =
                    Arc::new(Mutex::new(Vec::new()));

                for &(kind, id) in &pairs {
                    let fired = Arc::clone(&fired);
                    let callback = move |value| {
                        fired.lock().unwrap().push((kind, id, value));
                    };
                    let registered = events.register_callback(kind, id, callback);
                    prop_assert!(registered);
                }

                prop_assert!(events.drain());

                let fired = fired.lock().unwrap();
                prop_assert_eq!(fired.len(), pairs.len());
                let seen: HashSet<(u32, u32)> =
                    fired.iter().map(|&(kind, id, _)| (kind, id)).collect();
                prop_assert_eq!(seen, pairs);
                prop_assert!(fired.iter().all(|&(_, _, value)| value == DRAINED_VALUE));
            }

            /// Queued-then-registered and registered-then-invoked deliver
            /// the same value.
            #[test]
            fn delivery_order_is_equivalent(kind in 0u32..8, id in 0u32..64, value in 0u32..1000) {
                let early = EventRegistry::new();
                early.invoke(kind, id, value);
                let got = Arc::new(Mutex::new(None));
                let got2 = Arc::clone(&got);
                early.register_callback(kind, id, move |v| {
                    *got2.lock().unwrap() = Some(v);
                });
                prop_assert_eq!(*got.lock().unwrap(), Some(value));

                let late = EventRegistry::new();
                let got = Arc::new(Mutex::new(None));
                let got2 = Arc::clone(&got);
                late.register_callback(kind, id, move |v| {
                    *got2.lock().unwrap() = Some(v);
                });
                late.invoke(kind, id, value);
                prop_assert_eq!(*got.lock().unwrap(), Some(value));
            }
        }
    }
}
