//! Typed, in-process event fan-out.
//!
//! An [`Event`] keeps a list of observers. Firing clones the value into every
//! observer's queue and returns immediately. Each observer owns one worker
//! task that drains its queue in order, so a slow or blocked observer delays
//! only itself and never the producer. Synchronous handlers run on the
//! blocking pool. A panicking observer is logged and keeps receiving later
//! values.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{trace, warn};

type Handler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle returned by [`Event::add_observer`], used to detach the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct Slot<T> {
    id: ObserverId,
    sender: mpsc::UnboundedSender<T>,
}

pub struct Event<T> {
    name: &'static str,
    slots: RwLock<Vec<Slot<T>>>,
    next_id: AtomicU64,
}

impl<T> std::fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("observers", &self.slots.read().len())
            .finish()
    }
}

impl<T> Event<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Registers a synchronous observer.
    ///
    /// Must be called from within a Tokio runtime; the observer's worker task
    /// is spawned immediately. Each call runs on the blocking pool, one at a
    /// time, so a handler that blocks never holds up a runtime thread.
    pub fn add_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let observer = Arc::new(observer);
        self.add_async_observer(move |value| {
            let observer = observer.clone();
            async move {
                if let Err(err) = tokio::task::spawn_blocking(move || observer(value)).await {
                    if err.is_panic() {
                        std::panic::resume_unwind(err.into_panic());
                    }
                }
            }
        })
    }

    /// Registers an observer whose work is a future. The worker awaits each
    /// future before handing it the next value.
    pub fn add_async_observer<F, Fut>(&self, observer: F) -> ObserverId
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler<T> = Arc::new(move |value| observer(value).boxed());
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.register(sender);
        tokio::spawn(run_observer(self.name, id, handler, receiver));
        id
    }

    /// Returns a raw receiver for callers that prefer to drain events
    /// themselves. Dropping the receiver detaches it on the next fire.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.register(sender);
        receiver
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|slot| slot.id != id);
        slots.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.slots.read().len()
    }

    /// Enqueues `value` for every observer and returns without waiting for
    /// any of them.
    pub fn fire(&self, value: T) {
        let mut closed = false;
        {
            let slots = self.slots.read();
            trace!(
                target: "event_bus",
                event = self.name,
                observers = slots.len(),
                "fire"
            );
            for slot in slots.iter() {
                if slot.sender.send(value.clone()).is_err() {
                    closed = true;
                }
            }
        }
        if closed {
            self.slots.write().retain(|slot| !slot.sender.is_closed());
        }
    }

    fn register(&self, sender: mpsc::UnboundedSender<T>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots.write().push(Slot { id, sender });
        id
    }
}

async fn run_observer<T>(
    event: &'static str,
    id: ObserverId,
    handler: Handler<T>,
    mut receiver: mpsc::UnboundedReceiver<T>,
) where
    T: Send + 'static,
{
    while let Some(value) = receiver.recv().await {
        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(value))) {
            Ok(future) => future,
            Err(_) => {
                warn!(target: "event_bus", event, observer = id.0, "observer panicked");
                continue;
            }
        };
        if AssertUnwindSafe(future).catch_unwind().await.is_err() {
            warn!(target: "event_bus", event, observer = id.0, "observer panicked");
        }
    }
    trace!(target: "event_bus", event, observer = id.0, "observer detached");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::{mpsc, Notify};

    #[test_timeout::tokio_timeout_test]
    async fn observers_receive_values_in_fire_order() {
        let event = Event::<u32>::new("numbers");
        let (tx, mut rx) = mpsc::unbounded_channel();
        event.add_observer(move |value| {
            let _ = tx.send(value);
        });

        for value in 0..50 {
            event.fire(value);
        }

        let mut seen = Vec::new();
        while seen.len() < 50 {
            seen.push(rx.recv().await.expect("observer alive"));
        }
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[test_timeout::tokio_timeout_test]
    async fn blocked_observer_does_not_stall_others() {
        let event = Event::<&'static str>::new("blocking");
        let gate = Arc::new(Notify::new());
        let released = gate.clone();
        event.add_async_observer(move |_| {
            let released = released.clone();
            async move { released.notified().await }
        });

        let mut fast = event.subscribe();
        event.fire("one");
        event.fire("two");

        assert_eq!(fast.recv().await, Some("one"));
        assert_eq!(fast.recv().await, Some("two"));
        gate.notify_one();
    }

    #[test_timeout::tokio_timeout_test]
    async fn blocking_sync_observer_leaves_the_runtime_free() {
        let event = Event::<u32>::new("sync-blocking");
        event.add_observer(|_| std::thread::sleep(Duration::from_secs(2)));
        let mut fast = event.subscribe();
        let (tx, mut rx) = mpsc::unbounded_channel();
        event.add_async_observer(move |value| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(value);
            }
        });

        let started = std::time::Instant::now();
        event.fire(1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fast.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(1));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test_timeout::tokio_timeout_test]
    async fn panicking_observer_keeps_receiving() {
        let event = Event::<u32>::new("panics");
        let (tx, mut rx) = mpsc::unbounded_channel();
        event.add_observer(move |value| {
            if value == 1 {
                panic!("boom");
            }
            let _ = tx.send(value);
        });

        event.fire(1);
        event.fire(2);

        assert_eq!(rx.recv().await, Some(2));
    }

    #[test_timeout::tokio_timeout_test]
    async fn async_observer_finishes_before_next_value() {
        let event = Event::<u32>::new("sequential");
        let (tx, mut rx) = mpsc::unbounded_channel();
        event.add_async_observer(move |value| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(("start", value));
                tokio::time::sleep(Duration::from_millis(5)).await;
                let _ = tx.send(("end", value));
            }
        });

        event.fire(1);
        event.fire(2);

        let mut order = Vec::new();
        while order.len() < 4 {
            order.push(rx.recv().await.expect("observer alive"));
        }
        assert_eq!(
            order,
            vec![("start", 1), ("end", 1), ("start", 2), ("end", 2)]
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn dropped_subscribers_and_removed_observers_detach() {
        let event = Event::<u32>::new("detach");
        let receiver = event.subscribe();
        let id = event.add_observer(|_| {});
        assert_eq!(event.observer_count(), 2);

        drop(receiver);
        event.fire(7);
        assert_eq!(event.observer_count(), 1);

        assert!(event.remove_observer(id));
        assert!(!event.remove_observer(id));
        assert_eq!(event.observer_count(), 0);
        event.fire(8);
    }
}
