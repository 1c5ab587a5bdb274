// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background L2 writer for the `write_back` strategy.
//!
//! `set` pushes onto a bounded channel and returns once L1 is written; a
//! worker task collects queued writes into a batch and applies it when
//! either threshold is hit:
//!
//! - `flush_count` writes queued
//! - `flush_ms` elapsed since the batch started
//!
//! Delivery is at-least-once. Every write is an idempotent `SETEX`, a
//! failed write stays in the batch for the next flush until it has been
//! tried `max_attempts` times, and within a batch only the newest write
//! per key is applied so a retried value never overwrites a later one.
//! A full channel makes `set` wait (back-pressure) rather than drop.
//! Deleting a key discards its queued writes first.

use crate::config::WriteBackConfig;
use crate::store::SharedStore;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Why a batch was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Count,
    Time,
    Manual,
    Shutdown,
}

#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    pub(crate) key: String,
    pub(crate) value: Vec<u8>,
    pub(crate) ttl: Duration,
    attempts: u32,
}

impl PendingWrite {
    pub(crate) fn new(key: String, value: Vec<u8>, ttl: Duration) -> Self {
        Self { key, value, ttl, attempts: 0 }
    }
}

enum Command {
    Write(PendingWrite),
    Discard(Vec<String>, oneshot::Sender<usize>),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Writes waiting for the next flush.
struct WriteBatch {
    items: Vec<PendingWrite>,
    started_at: Instant,
    flush_count: usize,
    flush_after: Duration,
}

impl WriteBatch {
    fn new(config: &WriteBackConfig) -> Self {
        Self {
            items: Vec::new(),
            started_at: Instant::now(),
            flush_count: config.flush_count.max(1),
            flush_after: Duration::from_millis(config.flush_ms),
        }
    }

    fn push(&mut self, item: PendingWrite) -> Option<FlushReason> {
        if self.items.is_empty() {
            self.started_at = Instant::now();
        }
        self.items.push(item);
        (self.items.len() >= self.flush_count).then_some(FlushReason::Count)
    }

    fn should_flush_time(&self) -> bool {
        !self.items.is_empty() && self.started_at.elapsed() >= self.flush_after
    }

    /// Items to apply, newest write per key only, plus how many older
    /// writes were superseded.
    fn take(&mut self) -> (Vec<PendingWrite>, usize) {
        let items = std::mem::take(&mut self.items);
        self.started_at = Instant::now();

        let total = items.len();
        let mut seen = HashSet::new();
        let mut latest: Vec<PendingWrite> = items
            .into_iter()
            .rev()
            .filter(|item| seen.insert(item.key.clone()))
            .collect();
        latest.reverse();
        let superseded = total - latest.len();
        (latest, superseded)
    }

    /// Failed writes go back in front of anything queued since.
    fn requeue(&mut self, mut failed: Vec<PendingWrite>) {
        if failed.is_empty() {
            return;
        }
        failed.append(&mut self.items);
        self.items = failed;
        self.started_at = Instant::now();
    }

    /// Remove every queued write for `keys`; returns how many went.
    fn discard(&mut self, keys: &HashSet<&str>) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !keys.contains(item.key.as_str()));
        before - self.items.len()
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Handle to the background writer.
pub struct WriteBackQueue {
    tx: mpsc::Sender<Command>,
    pending: Arc<AtomicUsize>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WriteBackQueue {
    /// Start the worker on the current runtime (or the crate's fallback
    /// runtime when called outside one).
    pub(crate) fn start(store: Arc<dyn SharedStore>, config: WriteBackConfig) -> std::io::Result<Self> {
        let handle = crate::blocking::spawn_handle()?;
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let pending = Arc::new(AtomicUsize::new(0));
        let worker = handle.spawn(run_worker(rx, store, config, Arc::clone(&pending)));
        Ok(Self {
            tx,
            pending,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue a write. Gives the write back if the worker has stopped.
    pub(crate) async fn enqueue(&self, write: PendingWrite) -> Result<(), PendingWrite> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.tx.send(Command::Write(write)).await {
            Ok(()) => {
                crate::metrics::set_write_back_pending(self.pending());
                Ok(())
            }
            Err(mpsc::error::SendError(command)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                match command {
                    Command::Write(write) => Err(write),
                    // Only writes are sent from here
                    Command::Discard(..) | Command::Flush(_) | Command::Shutdown(_) => Ok(()),
                }
            }
        }
    }

    /// Writes queued or in a batch, not yet applied or dropped.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Drop every write for `keys` queued before this call and not yet
    /// applied. Used by deletes, so a queued value cannot land in L2 after
    /// the key was removed. Returns the number of writes dropped.
    pub async fn discard(&self, keys: &[String]) -> usize {
        if keys.is_empty() {
            return 0;
        }
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Discard(keys.to_vec(), done_tx)).await.is_err() {
            return 0;
        }
        done_rx.await.unwrap_or(0)
    }

    /// Wait until every write queued before this call has been applied
    /// (or dropped after `max_attempts`).
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Apply everything still queued and stop the worker. Later writes are
    /// refused and the caller writes them directly.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl Drop for WriteBackQueue {
    fn drop(&mut self) {
        // Dropping the sender lets the worker drain and exit on its own.
        let pending = self.pending();
        if pending > 0 {
            debug!(pending, "Write-back queue dropped with writes in flight");
        }
    }
}

impl std::fmt::Debug for WriteBackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBackQueue")
            .field("pending", &self.pending())
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Command>,
    store: Arc<dyn SharedStore>,
    config: WriteBackConfig,
    pending: Arc<AtomicUsize>,
) {
    let mut batch = WriteBatch::new(&config);
    let tick = Duration::from_millis(config.flush_ms.max(1));
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let max_attempts = config.max_attempts.max(1);

    debug!(flush_count = config.flush_count, flush_ms = config.flush_ms, "Write-back worker started");

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Write(write)) => {
                    if let Some(reason) = batch.push(write) {
                        apply(&mut batch, &*store, &pending, max_attempts, reason).await;
                    }
                }
                Some(Command::Discard(keys, done)) => {
                    let keys: HashSet<&str> = keys.iter().map(String::as_str).collect();
                    let removed = batch.discard(&keys);
                    if removed > 0 {
                        pending.fetch_sub(removed, Ordering::SeqCst);
                        crate::metrics::record_write_back("discarded", removed);
                        crate::metrics::set_write_back_pending(pending.load(Ordering::SeqCst));
                        debug!(removed, "Queued writes discarded for deleted keys");
                    }
                    let _ = done.send(removed);
                }
                Some(Command::Flush(done)) => {
                    drain(&mut batch, &*store, &pending, max_attempts, tick, FlushReason::Manual).await;
                    let _ = done.send(());
                }
                Some(Command::Shutdown(done)) => {
                    rx.close();
                    while let Ok(Command::Write(write)) = rx.try_recv() {
                        batch.push(write);
                    }
                    drain(&mut batch, &*store, &pending, max_attempts, tick, FlushReason::Shutdown).await;
                    let _ = done.send(());
                    info!("Write-back worker stopped");
                    return;
                }
                None => {
                    drain(&mut batch, &*store, &pending, max_attempts, tick, FlushReason::Shutdown).await;
                    debug!("Write-back channel closed, worker exiting");
                    return;
                }
            },
            _ = ticker.tick() => {
                if batch.should_flush_time() {
                    apply(&mut batch, &*store, &pending, max_attempts, FlushReason::Time).await;
                }
            }
        }
    }
}

/// Flush until the batch is empty. Each round costs failed writes one
/// attempt, so this ends after at most `max_attempts` rounds.
async fn drain(
    batch: &mut WriteBatch,
    store: &dyn SharedStore,
    pending: &AtomicUsize,
    max_attempts: u32,
    pause: Duration,
    reason: FlushReason,
) {
    while !batch.is_empty() {
        apply(batch, store, pending, max_attempts, reason).await;
        if !batch.is_empty() {
            tokio::time::sleep(pause).await;
        }
    }
}

async fn apply(
    batch: &mut WriteBatch,
    store: &dyn SharedStore,
    pending: &AtomicUsize,
    max_attempts: u32,
    reason: FlushReason,
) {
    let (items, superseded) = batch.take();
    if superseded > 0 {
        pending.fetch_sub(superseded, Ordering::SeqCst);
    }
    let count = items.len();
    let mut written = 0usize;
    let mut dropped = 0usize;
    let mut failed = Vec::new();

    for mut item in items {
        match store.set_ex(&item.key, &item.value, item.ttl).await {
            Ok(()) => written += 1,
            Err(e) => {
                item.attempts += 1;
                if item.attempts >= max_attempts {
                    error!(key = %item.key, attempts = item.attempts, error = %e, "Write-back dropped after repeated failures");
                    dropped += 1;
                } else {
                    warn!(key = %item.key, attempt = item.attempts, error = %e, "Write-back failed, will retry");
                    failed.push(item);
                }
            }
        }
    }

    let retried = failed.len();
    batch.requeue(failed);
    pending.fetch_sub(written + dropped, Ordering::SeqCst);

    crate::metrics::record_write_back("written", written);
    crate::metrics::record_write_back("retried", retried);
    crate::metrics::record_write_back("dropped", dropped);
    crate::metrics::set_write_back_pending(pending.load(Ordering::SeqCst));
    debug!(?reason, count, written, retried, dropped, superseded, "Write-back batch applied");
}
