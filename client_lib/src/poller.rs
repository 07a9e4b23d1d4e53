//! Fixed-interval auto-refresh.
//!
//! Fetches may overlap. Each one takes a sequence ticket when it starts, and
//! its result is published only if no newer fetch has already been applied.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

#[derive(Debug)]
pub struct Snapshot<T> {
    pub sequence: u64,
    pub value: T,
}

type Slot<T> = Option<Arc<Snapshot<T>>>;

/// Replace `slot` with `snapshot` unless the slot already holds a newer one.
pub fn apply_if_newer<T>(slot: &mut Slot<T>, snapshot: Snapshot<T>) -> bool {
    match slot {
        Some(current) if current.sequence >= snapshot.sequence => false,
        _ => {
            *slot = Some(Arc::new(snapshot));
            true
        }
    }
}

#[derive(Default)]
struct Counters {
    next_ticket: AtomicU64,
    discarded: AtomicU64,
    failed: AtomicU64,
}

pub struct PollHandle<T> {
    updates: watch::Receiver<Slot<T>>,
    counters: Arc<Counters>,
    task: JoinHandle<()>,
}

impl<T> PollHandle<T> {
    pub fn latest(&self) -> Slot<T> {
        self.updates.borrow().clone()
    }

    /// Wait for the next applied snapshot. Errors once the poller is gone.
    pub async fn changed(&mut self) -> Result<Arc<Snapshot<T>>, watch::error::RecvError> {
        loop {
            self.updates.changed().await?;
            if let Some(snapshot) = self.updates.borrow_and_update().clone() {
                return Ok(snapshot);
            }
        }
    }

    /// Responses that arrived after a newer one had been applied.
    pub fn discarded(&self) -> u64 {
        self.counters.discarded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }
}

impl<T> Drop for PollHandle<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn spawn_poller<T, F, Fut>(interval: Duration, fetch: F) -> PollHandle<T>
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let (tx, rx) = watch::channel(None);
    let tx = Arc::new(tx);
    let counters = Arc::new(Counters::default());

    let task = {
        let counters = Arc::clone(&counters);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Aborting this task drops the set, which aborts fetches still in flight.
            let mut in_flight = JoinSet::new();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sequence = counters.next_ticket.fetch_add(1, Ordering::Relaxed) + 1;
                        let pending = fetch();
                        let tx = Arc::clone(&tx);
                        let counters = Arc::clone(&counters);
                        in_flight.spawn(async move {
                            run_fetch(sequence, pending, &tx, &counters).await;
                        });
                    }
                    Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                }
            }
        })
    };

    PollHandle {
        updates: rx,
        counters,
        task,
    }
}

async fn run_fetch<T, Fut>(
    sequence: u64,
    pending: Fut,
    tx: &watch::Sender<Slot<T>>,
    counters: &Counters,
) where
    Fut: Future<Output = anyhow::Result<T>>,
{
    match pending.await {
        Ok(value) => {
            let snapshot = Snapshot { sequence, value };
            // Compare and publish under the channel lock.
            let applied = tx.send_if_modified(|slot| apply_if_newer(slot, snapshot));
            if applied {
                log::debug!("Applied poll #{}", sequence);
            } else {
                counters.discarded.fetch_add(1, Ordering::Relaxed);
                log::debug!("Discarded stale poll #{}", sequence);
            }
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            log::warn!("Poll #{} failed: {:#}", sequence, e);
        }
    }
}
