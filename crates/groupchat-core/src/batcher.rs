//! The outbound rate-limited message pump.
//!
//! One mutex, one "queue became non-empty" signal, and one "flush settled"
//! signal — the async equivalent of the single-mutex-plus-condvar design the
//! spec describes. The queue itself is guarded by a plain `std::sync::Mutex`
//! (every critical section here is a handful of `Vec` pushes, never an
//! `.await`), with `tokio::sync::Notify` standing in for the condition
//! variable between the worker and `enqueue`/`wait_until_drained`.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::transport::{Client, OutboundMessage};

#[derive(Debug, Clone, Copy)]
pub struct BatcherConfig {
    /// Minimum spacing between flush bursts for a given recipient group.
    pub interval: Duration,
    /// When true, each queued line is sent as its own stanza instead of
    /// being joined with newlines into one.
    pub use_separate_messages: bool,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            use_separate_messages: false,
        }
    }
}

struct State {
    queued: IndexMap<String, Vec<String>>,
    last_send: Instant,
    busy: bool,
}

pub struct OutboundBatcher {
    client: Arc<dyn Client>,
    config: BatcherConfig,
    state: Mutex<State>,
    /// Signaled whenever `queued` transitions from empty to non-empty.
    queue_ready: Notify,
    /// Signaled whenever a flush completes and leaves the queue drained.
    drained: Notify,
}

impl OutboundBatcher {
    pub fn new(client: Arc<dyn Client>, config: BatcherConfig) -> Arc<Self> {
        Arc::new(Self {
            client,
            config,
            state: Mutex::new(State {
                queued: IndexMap::new(),
                last_send: Instant::now() - config.interval,
                busy: false,
            }),
            queue_ready: Notify::new(),
            drained: Notify::new(),
        })
    }

    /// Starts the background flush worker. The returned future never
    /// resolves under normal operation; spawn it and let it run for the
    /// process lifetime.
    pub fn run(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            loop {
                self.wait_for_queue().await;
                self.sleep_out_pacing_window().await;
                let snapshot = self.detach_queue();
                self.flush(snapshot).await;
                self.settle();
            }
        })
    }

    /// Non-blocking enqueue. Appends `text` to `jid`'s pending line buffer
    /// and wakes the worker if it was idle.
    pub fn enqueue(&self, jid: impl Into<String>, text: impl Into<String>) {
        let jid = jid.into();
        let text = text.into();
        let became_non_empty = {
            let mut state = self.state.lock().unwrap();
            state.queued.entry(jid).or_default().push(text);
            state.queued.len() == 1
        };
        if became_non_empty {
            self.queue_ready.notify_one();
        }
    }

    /// Blocks until no message is queued and no flush is in flight. Test-only.
    ///
    /// The `Notified` future is created *before* the predicate is checked
    /// under the lock: `notify_waiters` only wakes listeners already
    /// registered, so checking first and constructing the future second
    /// would drop a notification that lands in between and hang forever.
    pub async fn wait_until_drained(&self) {
        loop {
            let notified = self.drained.notified();
            let settled = {
                let state = self.state.lock().unwrap();
                state.queued.is_empty() && !state.busy
            };
            if settled {
                return;
            }
            notified.await;
        }
    }

    /// See [`Self::wait_until_drained`] for why `notified()` is captured
    /// before the predicate check.
    async fn wait_for_queue(&self) {
        loop {
            let notified = self.queue_ready.notified();
            let empty = self.state.lock().unwrap().queued.is_empty();
            if !empty {
                return;
            }
            notified.await;
        }
    }

    async fn sleep_out_pacing_window(&self) {
        let last_send = self.state.lock().unwrap().last_send;
        let elapsed = last_send.elapsed();
        if elapsed < self.config.interval {
            tokio::time::sleep(self.config.interval - elapsed).await;
        }
    }

    fn detach_queue(&self) -> IndexMap<String, Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.busy = true;
        std::mem::take(&mut state.queued)
    }

    async fn flush(&self, snapshot: IndexMap<String, Vec<String>>) {
        for (jid, lines) in snapshot {
            if lines.is_empty() {
                continue;
            }
            if self.config.use_separate_messages {
                for line in &lines {
                    self.send_one(&jid, line.clone()).await;
                }
            } else {
                self.send_one(&jid, lines.join("\n")).await;
            }
        }
    }

    async fn send_one(&self, jid: &str, body: String) {
        let message = OutboundMessage {
            to: jid.to_string(),
            body,
        };
        if let Err(error) = self.client.send(message).await {
            warn!(jid, %error, "outbound flush failed, not retrying");
        } else {
            debug!(jid, "flushed outbound message");
        }
    }

    fn settle(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.last_send = Instant::now();
            state.busy = false;
        }
        self.drained.notify_waiters();
    }
}
