//! The mutable root of the engine.
//!
//! A [`Collection`] owns the currently published segment stack, the gate
//! that holds writers back when the stack grows too tall, and the
//! lifecycle of the background workers. All shared mutable state is the
//! stack reference inside [`Shared`]; publication is one exclusive
//! section — lock, swap the `Arc`, signal the gate, unlock, ping the
//! merger — which is also the linearization point for batch visibility.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::batch::Batch;
use crate::config::CollectionConfig;
use crate::error::{Error, Result};
use crate::merger::{self, MergerContext};
use crate::persist;
use crate::snapshot::Snapshot;
use crate::stack::SegmentStack;

/// Wake pings beyond this many coalesce.
const WAKE_BUFFER: usize = 10;
/// Persister handoffs beyond this many are skipped.
const PERSIST_BUFFER: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Unstarted,
    Running,
    Stopping,
    Stopped,
}

pub(crate) struct State {
    pub(crate) stack: Arc<SegmentStack>,
    pub(crate) lifecycle: Lifecycle,
}

/// State shared between the collection handle and its workers.
pub(crate) struct Shared {
    pub(crate) state: Mutex<State>,
    /// Signaled whenever the stack shrinks or the collection stops, to
    /// release writers waiting in `execute_batch`.
    pub(crate) stack_open: Condvar,
    pub(crate) stats: Counters,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) tot_execute_batch: AtomicU64,
    pub(crate) tot_snapshot: AtomicU64,
    pub(crate) tot_merger_wakeups: AtomicU64,
    pub(crate) tot_merges: AtomicU64,
    pub(crate) tot_persist_handoffs: AtomicU64,
}

/// Point-in-time counters for monitoring and tests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub tot_execute_batch: u64,
    pub tot_snapshot: u64,
    pub tot_merger_wakeups: u64,
    pub tot_merges: u64,
    pub tot_persist_handoffs: u64,
    pub cur_stack_height: usize,
}

/// An ordered, snapshot-able mapping of key-value entries, updated in
/// atomic batches and compacted by a background merger.
///
/// ```text
///            execute_batch                    merger
///   Batch ──sort──► Segment ──push──► ┌─────────────┐
///                                     │ top (newest)│──┐
///                                     ├─────────────┤  │ N-way merge
///                                     │     ...     │◄─┘ (suffix)
///                                     ├─────────────┤
///                                     │ bottom      │
///                                     └─────────────┘
///                                        ▲
///   Snapshot ──── pins a stack ──────────┘  (copy-on-write; readers and
///                                            writers never block each other)
/// ```
pub struct Collection {
    config: CollectionConfig,
    shared: Arc<Shared>,
    wake_tx: Sender<()>,
    wake_rx: Mutex<Option<Receiver<()>>>,
    /// Dropping the sender broadcasts shutdown to every worker.
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
    merger_handle: Mutex<Option<JoinHandle<()>>>,
    persister_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Collection {
    /// Creates a new, unstarted collection.
    pub fn new(config: CollectionConfig) -> Self {
        let (wake_tx, wake_rx) = bounded(WAKE_BUFFER);
        let (stop_tx, stop_rx) = bounded(0);
        Self {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    stack: Arc::new(SegmentStack::empty()),
                    lifecycle: Lifecycle::Unstarted,
                }),
                stack_open: Condvar::new(),
                stats: Counters::default(),
            }),
            wake_tx,
            wake_rx: Mutex::new(Some(wake_rx)),
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
            merger_handle: Mutex::new(None),
            persister_handle: Mutex::new(None),
        }
    }

    /// Spawns the merger (and, when configured, the persister). Calling
    /// `start` on a running collection is a no-op; after `close` it fails
    /// with [`Error::Closed`].
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            match state.lifecycle {
                Lifecycle::Running => return Ok(()),
                Lifecycle::Stopping | Lifecycle::Stopped => return Err(Error::Closed),
                Lifecycle::Unstarted => state.lifecycle = Lifecycle::Running,
            }
        }

        let Some(wake) = self.wake_rx.lock().take() else {
            return Ok(());
        };

        let persist_handoff = self.config.persister.as_ref().map(|persister| {
            let (handoff_tx, handoff_rx) = bounded(PERSIST_BUFFER);
            let persister = Arc::clone(persister);
            let stop = self.stop_rx.clone();
            let handle = std::thread::spawn(move || {
                persist::run(persister.as_ref(), handoff_rx, stop);
            });
            *self.persister_handle.lock() = Some(handle);
            handoff_tx
        });

        let ctx = MergerContext {
            shared: Arc::clone(&self.shared),
            operator: self.config.merge_operator.clone(),
            min_merge_percentage: self.config.min_merge_percentage,
            max_stack_open_height: self.config.max_stack_open_height,
            wake,
            stop: self.stop_rx.clone(),
            persist_handoff,
        };
        *self.merger_handle.lock() = Some(std::thread::spawn(move || merger::run(ctx)));
        Ok(())
    }

    /// Stops the workers and releases the published stack. Writers blocked
    /// in `execute_batch` fail with [`Error::Closed`]; snapshots and
    /// iterators taken earlier stay valid until dropped. Idempotent.
    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            match state.lifecycle {
                Lifecycle::Stopped => return Ok(()),
                Lifecycle::Unstarted => {
                    state.lifecycle = Lifecycle::Stopped;
                    state.stack = Arc::new(SegmentStack::empty());
                    return Ok(());
                }
                Lifecycle::Stopping => {}
                Lifecycle::Running => {
                    state.lifecycle = Lifecycle::Stopping;
                    self.shared.stack_open.notify_all();
                }
            }
        }

        self.stop_tx.lock().take();
        if let Some(handle) = self.merger_handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!("merger thread panicked");
            }
        }
        if let Some(handle) = self.persister_handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!("persister thread panicked");
            }
        }

        let mut state = self.shared.state.lock();
        state.stack = Arc::new(SegmentStack::empty());
        state.lifecycle = Lifecycle::Stopped;
        Ok(())
    }

    /// Returns a stable snapshot of the current key-value entries.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let state = self.shared.state.lock();
        match state.lifecycle {
            Lifecycle::Stopping | Lifecycle::Stopped => return Err(Error::Closed),
            Lifecycle::Unstarted | Lifecycle::Running => {}
        }
        self.shared
            .stats
            .tot_snapshot
            .fetch_add(1, Ordering::SeqCst);
        Ok(Snapshot::new(
            Arc::clone(&state.stack),
            self.config.merge_operator.clone(),
        ))
    }

    /// Returns a new batch presized for `total_ops` records and
    /// `total_bytes` of key/value data; zero hints mean "unknown".
    pub fn new_batch(&self, total_ops: usize, total_bytes: usize) -> Result<Batch> {
        match self.shared.state.lock().lifecycle {
            Lifecycle::Stopping | Lifecycle::Stopped => return Err(Error::Closed),
            Lifecycle::Unstarted | Lifecycle::Running => {}
        }
        Batch::new(total_ops, total_bytes)
    }

    /// Atomically incorporates the batch: its records are sorted into a
    /// segment and the segment is pushed onto a new copy-on-write stack. A
    /// snapshot taken before this call returns never sees the batch; one
    /// taken after always does.
    ///
    /// When the stack has reached `max_stack_open_height` the call blocks
    /// until the merger reduces it (or fails with [`Error::Closed`] if the
    /// collection closes first).
    pub fn execute_batch(&self, batch: Batch) -> Result<()> {
        let stats = &self.shared.stats;
        let segment = batch.into_segment().map(Arc::new);

        {
            let mut state = self.shared.state.lock();
            loop {
                match state.lifecycle {
                    Lifecycle::Stopping | Lifecycle::Stopped => return Err(Error::Closed),
                    Lifecycle::Unstarted | Lifecycle::Running => {}
                }
                // An empty batch publishes nothing, but only a live
                // collection may execute it.
                let Some(segment) = &segment else {
                    stats.tot_execute_batch.fetch_add(1, Ordering::SeqCst);
                    return Ok(());
                };
                if state.stack.height() < self.config.max_stack_open_height {
                    state.stack = Arc::new(state.stack.push(Arc::clone(segment)));
                    stats.tot_execute_batch.fetch_add(1, Ordering::SeqCst);
                    break;
                }
                self.shared.stack_open.wait(&mut state);
            }
        }

        // Full means enough pings are already queued; the merger will see
        // this publication anyway.
        let _ = self.wake_tx.try_send(());
        Ok(())
    }

    /// The configuration in use.
    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn stats(&self) -> CollectionStats {
        let cur_stack_height = self.shared.state.lock().stack.height();
        let stats = &self.shared.stats;
        CollectionStats {
            tot_execute_batch: stats.tot_execute_batch.load(Ordering::SeqCst),
            tot_snapshot: stats.tot_snapshot.load(Ordering::SeqCst),
            tot_merger_wakeups: stats.tot_merger_wakeups.load(Ordering::SeqCst),
            tot_merges: stats.tot_merges.load(Ordering::SeqCst),
            tot_persist_handoffs: stats.tot_persist_handoffs.load(Ordering::SeqCst),
            cur_stack_height,
        }
    }
}

impl Drop for Collection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
