//! Supervisor for many virtual spouts.
//!
//! The coordinator runs each spout on its own worker, multiplexes their
//! messages onto one bounded output queue, and routes acks and fails back
//! to the originating spout through per-spout mailboxes. Spouts never hold
//! a reference back to the coordinator: the mailboxes are the only way in,
//! the output queue is the only way out.
//!
//! A monitor worker sweeps the pending queue every
//! [`monitor_interval`](crate::config::SpoutConfig::monitor_interval) and
//! starts whatever it finds there; `add_spout` is how a stopped sideline's
//! drain spout gets picked up at runtime.

use super::virtual_spout::{StopHandle, VirtualSpout};
use crate::config::SpoutConfig;
use crate::message::{EmittedMessage, MessageId};
use crate::metrics;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A spout shared between its worker and the coordinator's bookkeeping.
pub type SharedSpout = Arc<tokio::sync::Mutex<VirtualSpout>>;

/// How long an idle worker sleeps before polling its spout again.
const IDLE_POLL_BACKOFF: Duration = Duration::from_millis(1);

/// Consecutive broker errors a worker absorbs before giving up.
const MAX_CONSECUTIVE_BROKER_ERRORS: u32 = 10;

/// How often `close()` re-checks whether the running set has drained.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct RunningSpout {
    spout: SharedSpout,
    stop: StopHandle,
}

struct Inner {
    config: Arc<SpoutConfig>,
    /// Spouts awaiting start; drained by the monitor sweep.
    pending: Mutex<VecDeque<SharedSpout>>,
    /// Live spouts by consumer id.
    running: DashMap<String, RunningSpout>,
    /// Per-spout ack mailboxes, fed by the host, drained by the worker.
    ack_boxes: DashMap<String, mpsc::UnboundedSender<MessageId>>,
    /// Per-spout fail mailboxes.
    fail_boxes: DashMap<String, mpsc::UnboundedSender<MessageId>>,
    running_flag: AtomicBool,
}

/// Runs virtual spouts on parallel workers and fans their messages into a
/// single output queue.
pub struct SpoutCoordinator {
    inner: Arc<Inner>,
    firehose: SharedSpout,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl SpoutCoordinator {
    /// Create a coordinator seeded with the firehose spout.
    pub fn new(firehose: VirtualSpout, config: Arc<SpoutConfig>) -> Self {
        let inner = Arc::new(Inner {
            config,
            pending: Mutex::new(VecDeque::new()),
            running: DashMap::new(),
            ack_boxes: DashMap::new(),
            fail_boxes: DashMap::new(),
            running_flag: AtomicBool::new(false),
        });
        let firehose: SharedSpout = Arc::new(tokio::sync::Mutex::new(firehose));
        inner.pending.lock().push_back(Arc::clone(&firehose));
        Self {
            inner,
            firehose,
            monitor: Mutex::new(None),
        }
    }

    /// The unbounded main-stream spout this coordinator was seeded with.
    pub fn firehose(&self) -> SharedSpout {
        Arc::clone(&self.firehose)
    }

    /// Queue a spout for the next monitor sweep.
    pub fn add_spout(&self, spout: VirtualSpout) -> SharedSpout {
        let shared: SharedSpout = Arc::new(tokio::sync::Mutex::new(spout));
        self.inner.pending.lock().push_back(Arc::clone(&shared));
        shared
    }

    /// Start coordinating.
    ///
    /// Spawns the monitor worker and blocks until every spout that was
    /// pending at the time of the call has completed its `open()`.
    pub async fn open(&self, output_queue: mpsc::Sender<EmittedMessage>) {
        self.inner.running_flag.store(true, Ordering::Release);

        let initially_pending = self.inner.pending.lock().len();
        let startup_latch = Arc::new(Semaphore::new(0));

        let inner = Arc::clone(&self.inner);
        let latch = Arc::clone(&startup_latch);
        let monitor = tokio::spawn(async move {
            while inner.running_flag.load(Ordering::Acquire) {
                loop {
                    let next = inner.pending.lock().pop_front();
                    let Some(spout) = next else { break };
                    Inner::open_spout(&inner, spout, output_queue.clone(), Arc::clone(&latch))
                        .await;
                }
                tokio::time::sleep(inner.config.monitor_interval()).await;
            }
            debug!("spout monitor exiting");
        });
        *self.monitor.lock() = Some(monitor);

        if initially_pending > 0 {
            // Each worker adds one permit once its spout has opened.
            if let Ok(opened) = startup_latch.acquire_many(initially_pending as u32).await {
                opened.forget();
            }
        }
        info!(spouts = initially_pending, "spout coordinator open");
    }

    /// Route an ack to the spout that emitted `id`. Unknown consumers are
    /// logged and dropped; their spout has already been torn down.
    pub fn ack(&self, id: MessageId) {
        match self.inner.ack_boxes.get(id.consumer_id()) {
            Some(mailbox) => {
                let _ = mailbox.send(id);
            }
            None => warn!(message = %id, "acking tuple for unknown consumer"),
        }
    }

    /// Route a fail to the spout that emitted `id`.
    pub fn fail(&self, id: MessageId) {
        match self.inner.fail_boxes.get(id.consumer_id()) {
            Some(mailbox) => {
                let _ = mailbox.send(id);
            }
            None => warn!(message = %id, "failing tuple for unknown consumer"),
        }
    }

    /// Number of spouts currently running.
    pub fn running_count(&self) -> usize {
        self.inner.running.len()
    }

    /// A running spout by consumer id, when it is still live.
    pub fn running_spout(&self, consumer_id: &str) -> Option<SharedSpout> {
        self.inner
            .running
            .get(consumer_id)
            .map(|entry| Arc::clone(&entry.value().spout))
    }

    /// Stop every running spout and shut the monitor down.
    ///
    /// Waits up to [`max_stop_wait`](SpoutConfig::max_stop_wait) for the
    /// running set to drain; past the deadline the wait is abandoned and
    /// workers finish on their own.
    pub async fn close(&self) {
        for entry in self.inner.running.iter() {
            entry.value().stop.request_stop();
        }

        let deadline = Instant::now() + self.inner.config.max_stop_wait();
        while !self.inner.running.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
        let remaining = self.inner.running.len();
        if remaining > 0 {
            warn!(remaining, "stop deadline elapsed, abandoning wait for spout workers");
        }

        self.inner.running_flag.store(false, Ordering::Release);
        // The monitor observes the cleared flag on its next wake; dropping
        // the handle detaches it rather than aborting mid-sweep.
        drop(self.monitor.lock().take());
        info!("spout coordinator closed");
    }
}

impl Inner {
    /// Register a pending spout and hand it to its own worker.
    async fn open_spout(
        inner: &Arc<Inner>,
        shared: SharedSpout,
        output_queue: mpsc::Sender<EmittedMessage>,
        startup_latch: Arc<Semaphore>,
    ) {
        let (consumer_id, stop) = {
            let spout = shared.lock().await;
            (spout.consumer_id().to_string(), spout.stop_handle())
        };
        debug!(consumer_id = %consumer_id, "starting worker for spout");

        inner.running.insert(
            consumer_id.clone(),
            RunningSpout {
                spout: Arc::clone(&shared),
                stop: stop.clone(),
            },
        );
        metrics::set_running_spouts(inner.running.len());

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            Inner::run_spout(inner, shared, consumer_id, stop, output_queue, startup_latch)
                .await;
        });
    }

    /// Per-spout worker loop: emit, drain acks, drain fails, flush.
    async fn run_spout(
        inner: Arc<Inner>,
        shared: SharedSpout,
        consumer_id: String,
        stop: StopHandle,
        output_queue: mpsc::Sender<EmittedMessage>,
        startup_latch: Arc<Semaphore>,
    ) {
        if let Err(e) = shared.lock().await.open().await {
            error!(consumer_id = %consumer_id, error = %e, "spout failed to open");
            inner.teardown(&consumer_id);
            startup_latch.add_permits(1);
            return;
        }

        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        let (fail_tx, mut fail_rx) = mpsc::unbounded_channel();
        inner.ack_boxes.insert(consumer_id.clone(), ack_tx);
        inner.fail_boxes.insert(consumer_id.clone(), fail_tx);
        startup_latch.add_permits(1);

        let mut last_flush = Instant::now();
        let mut broker_errors = 0u32;

        while !stop.is_stop_requested() {
            // Emit at most one message, releasing the spout lock before
            // a potentially blocking enqueue.
            let polled = shared.lock().await.next_message().await;
            let mut idle = false;
            match polled {
                Ok(Some(message)) => {
                    broker_errors = 0;
                    if output_queue.send(message).await.is_err() {
                        warn!(consumer_id = %consumer_id, "output queue closed, stopping worker");
                        break;
                    }
                }
                Ok(None) => {
                    broker_errors = 0;
                    idle = true;
                }
                // Lifecycle violations never recover; wind down instead
                // of burning the retry budget.
                Err(e @ crate::SidelineError::IllegalState(_)) => {
                    warn!(consumer_id = %consumer_id, error = %e, "spout is no longer pollable, stopping worker");
                    break;
                }
                Err(e) => {
                    broker_errors += 1;
                    warn!(
                        consumer_id = %consumer_id,
                        error = %e,
                        consecutive = broker_errors,
                        "poll failed, retrying next iteration"
                    );
                    if broker_errors >= MAX_CONSECUTIVE_BROKER_ERRORS {
                        error!(consumer_id = %consumer_id, "broker failure is persistent, terminating worker");
                        break;
                    }
                    idle = true;
                }
            }

            {
                let mut spout = shared.lock().await;

                while let Ok(id) = ack_rx.try_recv() {
                    if let Err(e) = spout.ack(Some(&id)).await {
                        warn!(consumer_id = %consumer_id, message = %id, error = %e, "ack failed");
                    }
                }

                while let Ok(id) = fail_rx.try_recv() {
                    if let Err(e) = spout.fail(Some(&id)).await {
                        warn!(consumer_id = %consumer_id, message = %id, error = %e, "fail failed");
                    }
                }

                if last_flush.elapsed() >= inner.config.flush_interval() {
                    if let Err(e) = spout.flush_state().await {
                        warn!(consumer_id = %consumer_id, error = %e, "state flush failed, retrying next tick");
                    }
                    last_flush = Instant::now();
                }
            }

            if idle {
                tokio::time::sleep(IDLE_POLL_BACKOFF).await;
            }
        }

        debug!(consumer_id = %consumer_id, "worker winding down");
        if let Err(e) = shared.lock().await.close().await {
            warn!(consumer_id = %consumer_id, error = %e, "spout close failed");
        }
        inner.teardown(&consumer_id);
    }

    fn teardown(&self, consumer_id: &str) {
        self.ack_boxes.remove(consumer_id);
        self.fail_boxes.remove(consumer_id);
        self.running.remove(consumer_id);
        metrics::set_running_spouts(self.running.len());
    }
}

impl std::fmt::Debug for SpoutCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpoutCoordinator")
            .field("pending", &self.inner.pending.lock().len())
            .field("running", &self.inner.running.len())
            .finish()
    }
}
