//! Coalesce bursts of inbound messages into a single dispatch.
//!
//! Each [`DebounceKey`] owns at most one pending batch and one timer. A new
//! entry for the key appends to the batch and restarts the timer; when the
//! timer fires the whole batch is handed to [`DebounceHandler::flush`].
//! Entries the handler marks as not debounceable (commands, empty text) are
//! flushed right away, after whatever was already pending for the key.
//! Flushes for one key never overlap.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::{sync::watch, task::JoinHandle},
    tracing::{debug, trace, warn},
};

/// Identity of a coalescing bucket.
///
/// The account is part of the key so identical sender ids on different
/// accounts never share a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebounceKey {
    pub channel: String,
    pub account_id: String,
    pub conversation_id: String,
    pub sender_id: String,
}

impl std::fmt::Display for DebounceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.channel, self.account_id, self.conversation_id, self.sender_id
        )
    }
}

/// Channel-specific behavior plugged into an [`InboundDebouncer`].
#[async_trait]
pub trait DebounceHandler<T>: Send + Sync + 'static {
    /// Bucket for `entry`, or `None` to drop it.
    fn key(&self, entry: &T) -> Option<DebounceKey>;

    /// Whether `entry` may wait for the window. Returning `false` flushes it
    /// immediately.
    fn should_debounce(&self, entry: &T) -> bool;

    /// Process a flushed batch. Entries are in arrival order.
    async fn flush(&self, entries: Vec<T>) -> anyhow::Result<()>;

    /// Called when `flush` fails. Other keys are unaffected.
    fn on_error(&self, key: &DebounceKey, error: anyhow::Error) {
        warn!(key = %key, "inbound flush failed: {error:#}");
    }
}

struct PendingBatch<T> {
    entries: Vec<T>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

type PendingMap<T> = Arc<Mutex<HashMap<DebounceKey, PendingBatch<T>>>>;

/// Flush queue position for one key.
struct Lane {
    issued: u64,
    served: Arc<watch::Sender<u64>>,
}

/// Orders flushes per key: tickets are handed out when a batch leaves the
/// pending map, and each flush waits until every earlier ticket for its key
/// has finished.
#[derive(Default)]
struct Lanes {
    lanes: Mutex<HashMap<DebounceKey, Lane>>,
}

impl Lanes {
    fn ticket(self: &Arc<Self>, key: &DebounceKey) -> Ticket {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        let lane = lanes.entry(key.clone()).or_insert_with(|| Lane {
            issued: 0,
            served: Arc::new(watch::channel(0).0),
        });
        let number = lane.issued;
        lane.issued += 1;
        Ticket {
            lanes: Arc::clone(self),
            key: key.clone(),
            number,
            served: Arc::clone(&lane.served),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A claim on one flush slot. Dropping it lets the next ticket run, so a
/// panicking or cancelled flush never wedges its key.
struct Ticket {
    lanes: Arc<Lanes>,
    key: DebounceKey,
    number: u64,
    served: Arc<watch::Sender<u64>>,
}

impl Ticket {
    async fn wait_turn(&self) {
        let mut rx = self.served.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|served| *served >= self.number).await;
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut lanes = self.lanes.lanes.lock().unwrap_or_else(|e| e.into_inner());
        self.served.send_modify(|served| *served += 1);
        if let Some(lane) = lanes.get(&self.key)
            && lane.issued == self.number + 1
        {
            lanes.remove(&self.key);
        }
    }
}

/// Per-key debounce engine.
pub struct InboundDebouncer<T> {
    window: Duration,
    handler: Arc<dyn DebounceHandler<T>>,
    pending: PendingMap<T>,
    lanes: Arc<Lanes>,
    next_generation: Arc<AtomicU64>,
}

impl<T> Clone for InboundDebouncer<T> {
    fn clone(&self) -> Self {
        Self {
            window: self.window,
            handler: Arc::clone(&self.handler),
            pending: Arc::clone(&self.pending),
            lanes: Arc::clone(&self.lanes),
            next_generation: Arc::clone(&self.next_generation),
        }
    }
}

impl<T: Send + 'static> InboundDebouncer<T> {
    /// A zero `window` disables coalescing: every entry flushes immediately.
    pub fn new(window: Duration, handler: Arc<dyn DebounceHandler<T>>) -> Self {
        Self {
            window,
            handler,
            pending: Arc::new(Mutex::new(HashMap::new())),
            lanes: Arc::new(Lanes::default()),
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of keys with a pending batch.
    pub fn pending_keys(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Queue an entry. Must be called from within a tokio runtime.
    ///
    /// Flushes for one key run one at a time, in the order their batches
    /// left the queue.
    pub fn enqueue(&self, entry: T) {
        let Some(key) = self.handler.key(&entry) else {
            trace!("inbound entry has no debounce key, dropping");
            return;
        };

        if self.window.is_zero() || !self.handler.should_debounce(&entry) {
            let (earlier, ticket) = {
                let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
                let earlier = pending.remove(&key).map(|batch| {
                    if let Some(timer) = batch.timer {
                        timer.abort();
                    }
                    batch.entries
                });
                (earlier, self.lanes.ticket(&key))
            };
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                ticket.wait_turn().await;
                if let Some(entries) = earlier {
                    run_flush(&handler, &key, entries).await;
                }
                run_flush(&handler, &key, vec![entry]).await;
                drop(ticket);
            });
            return;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let batch = pending.entry(key.clone()).or_insert_with(|| PendingBatch {
            entries: Vec::new(),
            generation,
            timer: None,
        });
        batch.entries.push(entry);
        batch.generation = generation;
        if let Some(timer) = batch.timer.take() {
            timer.abort();
        }
        debug!(key = %key, batched = batch.entries.len(), "inbound entry debounced");
        batch.timer = Some(self.spawn_timer(key, generation));
    }

    /// Abort all timers and drop pending batches without flushing them.
    pub fn shutdown(&self) {
        let drained: Vec<(DebounceKey, PendingBatch<T>)> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().collect()
        };
        for (key, batch) in drained {
            if let Some(timer) = batch.timer {
                timer.abort();
            }
            if !batch.entries.is_empty() {
                debug!(key = %key, dropped = batch.entries.len(), "dropping pending inbound batch");
            }
        }
    }

    fn spawn_timer(&self, key: DebounceKey, generation: u64) -> JoinHandle<()> {
        let window = self.window;
        let pending = Arc::clone(&self.pending);
        let lanes = Arc::clone(&self.lanes);
        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let due = {
                let mut pending = pending.lock().unwrap_or_else(|e| e.into_inner());
                match pending.get(&key) {
                    Some(batch) if batch.generation == generation => pending
                        .remove(&key)
                        .map(|batch| (batch.entries, lanes.ticket(&key))),
                    _ => None,
                }
            };
            if let Some((entries, ticket)) = due {
                ticket.wait_turn().await;
                run_flush(&handler, &key, entries).await;
            }
        })
    }

    #[cfg(test)]
    fn active_lanes(&self) -> usize {
        self.lanes.len()
    }
}

async fn run_flush<T: Send + 'static>(
    handler: &Arc<dyn DebounceHandler<T>>,
    key: &DebounceKey,
    entries: Vec<T>,
) {
    if entries.is_empty() {
        return;
    }
    debug!(key = %key, entries = entries.len(), "flushing inbound batch");
    if let Err(e) = handler.flush(entries).await {
        handler.on_error(key, e);
    }
}
