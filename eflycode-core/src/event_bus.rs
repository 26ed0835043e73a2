//! Publish/subscribe event bus decoupling the agent from the UI.
//!
//! A bounded [`tokio::sync::mpsc`] channel feeds a single spawned dispatcher
//! task, which invokes inline subscribers directly and hands `threaded=true`
//! subscribers off to a `Semaphore`-bounded worker pool so one slow
//! subscriber can't stall the others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinSet;

/// Default bounded queue capacity, matching the source's default.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
/// Default worker-pool size for `threaded=true` subscribers.
pub const DEFAULT_WORKER_COUNT: usize = 10;

/// A subscriber callback. Invoked with the event's data payload.
pub type Handler = Arc<dyn Fn(Value) + Send + Sync>;

/// Options controlling how a subscriber receives events.
#[derive(Debug, Clone, Copy)]
pub struct SubscribeOptions {
    /// `true` to dispatch this subscriber onto the worker pool rather than
    /// inline on the dispatcher task.
    pub threaded: bool,
    /// `true` to pass the event's data payload to the handler; `false` to
    /// call it with `Value::Null` regardless of the emitted payload.
    pub pass_event: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            threaded: false,
            pass_event: true,
        }
    }
}

/// An opaque handle identifying one subscription, returned by `subscribe`
/// and required by `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handler: Handler,
    options: SubscribeOptions,
}

type SubscriberMap = HashMap<String, Vec<Subscription>>;

/// The event bus. Cheap to clone — all shared state lives behind `Arc`.
#[derive(Clone)]
pub struct EventBus {
    sender: mpsc::Sender<(String, Value)>,
    subscribers: Arc<RwLock<SubscriberMap>>,
    next_id: Arc<AtomicU64>,
    worker_semaphore: Arc<Semaphore>,
    dispatcher: Arc<tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>>,
    worker_tasks: Arc<tokio::sync::Mutex<JoinSet<()>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl EventBus {
    /// Build a bus with the default queue capacity and worker-pool size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_COUNT)
    }

    /// Build a bus with an explicit bounded queue capacity and worker count.
    #[must_use]
    pub fn with_capacity(capacity: usize, worker_count: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let subscribers: Arc<RwLock<SubscriberMap>> = Arc::new(RwLock::new(HashMap::new())); let subs_for_dispatcher = Arc::clone(&subscribers);
        let worker_semaphore = Arc::new(Semaphore::new(worker_count.max(1)));
        let worker_tasks: Arc<tokio::sync::Mutex<JoinSet<()>>> =
            Arc::new(tokio::sync::Mutex::new(JoinSet::new()));
        let worker_tasks_for_dispatcher = Arc::clone(&worker_tasks);
        let semaphore_for_dispatcher = Arc::clone(&worker_semaphore);

        let dispatcher = tokio::spawn(Self::dispatch_loop(
            receiver,
            subs_for_dispatcher,
            semaphore_for_dispatcher,
            worker_tasks_for_dispatcher,
        ));

        Self {
            sender,
            subscribers,
            next_id: Arc::new(AtomicU64::new(1)),
            worker_semaphore,
            dispatcher: Arc::new(tokio::sync::Mutex::new(Some(dispatcher))),
            worker_tasks,
        }
    }

    async fn dispatch_loop(
        mut receiver: mpsc::Receiver<(String, Value)>,
        subscribers: Arc<RwLock<SubscriberMap>>,
        worker_semaphore: Arc<Semaphore>,
        worker_tasks: Arc<tokio::sync::Mutex<JoinSet<()>>>,
    ) {
        while let Some((event, data)) = receiver.recv().await {
            let snapshot: Vec<Subscription> = {
                let guard = subscribers.read().await;
                guard
                    .get(&event)
                    .map(|subs| {
                        subs.iter()
                            .map(|s| Subscription {
                                id: s.id,
                                handler: Arc::clone(&s.handler),
                                options: s.options,
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            };

            for sub in snapshot {
                let payload = if sub.options.pass_event {
                    data.clone()
                } else {
                    Value::Null
                };
                if sub.options.threaded {
                    let permit = Arc::clone(&worker_semaphore);
                    let handler = Arc::clone(&sub.handler);
                    let mut tasks = worker_tasks.lock().await;
                    tasks.spawn(async move {
                        let _permit = permit.acquire_owned().await;
                        Self::invoke_guarded(&handler, payload);
                    });
                } else {
                    Self::invoke_guarded(&sub.handler, payload);
                }
            }
        }
    }

    /// Call a handler, swallowing panics the way the source swallows
    /// exceptions raised by a subscriber — one bad subscriber must never
    /// take down dispatch to the others.
    fn invoke_guarded(handler: &Handler, payload: Value) {
        let handler = Arc::clone(handler);
        if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(payload))) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "subscriber panicked".to_string());
            tracing::warn!(%message, "event bus subscriber failed");
        }
    }

    /// Register a subscriber for `event`, returning an id usable with
    /// [`EventBus::unsubscribe`].
    pub async fn subscribe(
        &self,
        event: impl Into<String>,
        handler: Handler,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.subscribers.write().await;
        guard
            .entry(event.into())
            .or_default()
            .push(Subscription {
                id,
                handler,
                options,
            });
        id
    }

    /// Remove a previously registered subscription from `event`.
    pub async fn unsubscribe(&self, event: &str, id: SubscriptionId) {
        let mut guard = self.subscribers.write().await;
        if let Some(subs) = guard.get_mut(event) {
            subs.retain(|s| s.id != id);
        }
    }

    /// Enqueue an event for asynchronous dispatch. If the bounded queue is
    /// full, the event is logged and dropped rather than blocking forever.
    pub async fn emit(&self, event: impl Into<String>, data: Value) {
        let event = event.into();
        if let Err(err) = self.sender.try_send((event.clone(), data)) {
            tracing::warn!(event, error = %err, "event bus queue full, dropping event");
        }
    }

    /// Dispatch an event synchronously on the calling task, bypassing the
    /// queue. All matching subscribers (threaded or not) run inline.
    pub async fn emit_sync(&self, event: &str, data: Value) {
        let guard = self.subscribers.read().await;
        if let Some(subs) = guard.get(event) {
            for sub in subs {
                let payload = if sub.options.pass_event {
                    data.clone()
                } else {
                    Value::Null
                };
                Self::invoke_guarded(&sub.handler, payload);
            }
        }
    }

    /// Shut the bus down. If `wait`, blocks up to `timeout` for the queue to
    /// drain and the worker pool to idle; subscriptions are dropped either
    /// way and no further emit will be delivered once this returns.
    pub async fn close(&self, wait: bool, timeout: Duration) {
        let dispatcher = self.dispatcher.lock().await.take();
        let Some(dispatcher) = dispatcher else {
            return;
        };
        dispatcher.abort();

        if wait {
            let mut tasks = self.worker_tasks.lock().await;
            let drain = async {
                while tasks.join_next().await.is_some() {}
            };
            if tokio::time::timeout(timeout, drain).await.is_err() {
                tracing::warn!("event bus close timed out, abandoning pending subscribers");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn inline_subscriber_receives_emitted_payload() {
        let bus = EventBus::new();
        let received: Arc<tokio::sync::Mutex<Option<Value>>> =
            Arc::new(tokio::sync::Mutex::new(None));
        let received_clone = Arc::clone(&received);
        bus.subscribe(
            "agent.task.start",
            Arc::new(move |data| {
                let received = Arc::clone(&received_clone);
                let data = data.clone();
                tokio::spawn(async move {
                    *received.lock().await = Some(data);
                });
            }),
            SubscribeOptions::default(),
        )
        .await;

        bus.emit("agent.task.start", serde_json::json!({"ok": true}))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            received.lock().await.clone(),
            Some(serde_json::json!({"ok": true}))
        );
    }

    #[tokio::test]
    async fn pass_event_false_delivers_null() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        bus.subscribe(
            "ui.stop_app",
            Arc::new(move |data| {
                assert_eq!(data, Value::Null);
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }),
            SubscribeOptions {
                threaded: false,
                pass_event: false,
            },
        )
        .await;
        bus.emit("ui.stop_app", serde_json::json!({"ignored": true}))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let id = bus
            .subscribe(
                "agent.error",
                Arc::new(move |_| {
                    seen_clone.fetch_add(1, Ordering::SeqCst);
                }),
                SubscribeOptions::default(),
            )
            .await;
        bus.unsubscribe("agent.error", id).await;
        bus.emit("agent.error", Value::Null).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_stop_dispatch() {
        let bus = EventBus::new();
        bus.subscribe(
            "agent.error",
            Arc::new(|_| panic!("boom")),
            SubscribeOptions::default(),
        )
        .await;
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        bus.subscribe(
            "agent.error",
            Arc::new(move |_| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }),
            SubscribeOptions::default(),
        )
        .await;
        bus.emit("agent.error", Value::Null).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn emit_sync_dispatches_immediately() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        bus.subscribe(
            "agent.task.stop",
            Arc::new(move |_| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }),
            SubscribeOptions::default(),
        )
        .await;
        bus.emit_sync("agent.task.stop", Value::Null).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_returns_within_timeout() {
        let bus = EventBus::new();
        bus.close(true, Duration::from_millis(500)).await;
    }
}
