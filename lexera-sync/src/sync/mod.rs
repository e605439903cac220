/// Background synchronizer.
///
/// One cycle: fetch the remote board, three-way merge it with the local
/// board against the confirmed base, and either publish the conflicts or
/// apply the merge and drain the operation queue.
///
/// Cycles are single-flight and skipped while conflicts wait for the user,
/// while offline, and while optimistic mutations are in flight. The
/// background loop runs a cycle on a fixed interval, on every transition to
/// online, and whenever `trigger()` is called.
pub mod base;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SyncSettings;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{RemoteError, SyncError};
use crate::merge::{apply_resolution, three_way_merge, Conflict, Resolution};
use crate::queue::{OperationQueue, QueueItem};
use crate::remote::{RemoteBoard, RemoteCall};
use crate::store::BoardStore;
use crate::types::Board;

pub use base::SyncBase;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    CycleCompleted { sent: usize, remaining: usize },
    ConflictsDetected { count: usize },
    ConflictsResolved,
    OperationDropped {
        item_id: u64,
        kind: &'static str,
        error: String,
    },
    CycleFailed { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning,
    ConflictsPending,
    Offline,
    MutationsInFlight,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DroppedOperation {
    pub item: QueueItem,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub sent: usize,
    pub dropped: Vec<DroppedOperation>,
    /// Items still queued when the drain stopped.
    pub remaining: usize,
    /// The drain stopped on a 409; another cycle was triggered.
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    Conflicted { count: usize },
    Synced(DrainReport),
}

/// Conflicts from the last cycle, waiting for the user.
struct PendingConflicts {
    /// Provisional merge, conflicting fields carry server values.
    merged: Board,
    /// Local board the merge was computed from.
    local: Arc<Board>,
    conflicts: Vec<Conflict>,
    choices: Vec<Option<Resolution>>,
}

/// Keeps cycles from applying merges while an optimistic mutation is
/// waiting on its remote commit.
pub struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Synchronizer {
    store: Arc<BoardStore>,
    queue: Arc<OperationQueue>,
    base: Arc<SyncBase>,
    remote: Arc<dyn RemoteBoard>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    settings: SyncSettings,
    running: AtomicBool,
    in_flight: AtomicUsize,
    pending: Mutex<Option<PendingConflicts>>,
    /// Serializes queue drains between cycles and conflict resolution.
    drain_lock: tokio::sync::Mutex<()>,
    trigger: Notify,
    events: broadcast::Sender<SyncEvent>,
}

impl Synchronizer {
    pub fn new(
        store: Arc<BoardStore>,
        queue: Arc<OperationQueue>,
        base: Arc<SyncBase>,
        remote: Arc<dyn RemoteBoard>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        settings: SyncSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            queue,
            base,
            remote,
            connectivity,
            settings,
            running: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            pending: Mutex::new(None),
            drain_lock: tokio::sync::Mutex::new(()),
            trigger: Notify::new(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Ask the background loop for a cycle as soon as possible.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark an optimistic mutation as in flight until the guard drops.
    pub fn hold(&self) -> InFlight<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight {
            counter: &self.in_flight,
        }
    }

    pub fn has_pending_conflicts(&self) -> bool {
        self.lock_pending().is_some()
    }

    /// Conflicts waiting for resolution, in detection order.
    pub fn conflicts(&self) -> Vec<Conflict> {
        self.lock_pending()
            .as_ref()
            .map(|p| p.conflicts.clone())
            .unwrap_or_default()
    }

    /// Record the user's choice for conflict `index`. Nothing is applied
    /// until `apply_resolutions`.
    pub fn resolve_conflict(&self, index: usize, choice: Resolution) -> Result<(), SyncError> {
        let mut pending = self.lock_pending();
        let pending = pending.as_mut().ok_or(SyncError::NoPendingConflicts)?;
        let len = pending.conflicts.len();
        let slot = pending
            .choices
            .get_mut(index)
            .ok_or(SyncError::ConflictIndex { index, len })?;
        *slot = Some(choice);
        Ok(())
    }

    /// Run one cycle now.
    pub async fn run_cycle(&self) -> Result<SyncOutcome, SyncError> {
        if !self.connectivity.is_online() {
            return Ok(self.skip(SkipReason::Offline));
        }
        if self.has_pending_conflicts() {
            return Ok(self.skip(SkipReason::ConflictsPending));
        }
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            return Ok(self.skip(SkipReason::MutationsInFlight));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(self.skip(SkipReason::AlreadyRunning));
        }
        let _running = RunningFlag(&self.running);

        match self.cycle().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                log::warn!("[lexera.sync] Cycle failed: {}", e);
                self.emit(SyncEvent::CycleFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn cycle(&self) -> Result<SyncOutcome, SyncError> {
        let server = self.remote.fetch_board().await?;
        let local = self.store.snapshot();
        let base = self.base.get_or(&local);

        let result = three_way_merge(&base, &local, &server);
        if !result.conflicts.is_empty() {
            let count = result.conflicts.len();
            log::info!("[lexera.sync] {} conflict(s) need resolution", count);
            *self.lock_pending() = Some(PendingConflicts {
                merged: result.merged,
                local,
                choices: vec![None; count],
                conflicts: result.conflicts,
            });
            self.emit(SyncEvent::ConflictsDetected { count });
            return Ok(SyncOutcome::Conflicted { count });
        }

        // A dispatch may have started while the board was being fetched.
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            return Ok(self.skip(SkipReason::MutationsInFlight));
        }
        if result.merged != *local {
            self.store.replace(Arc::new(result.merged));
        }
        self.base.record(Arc::new(server))?;

        let report = self.drain().await?;
        log::info!(
            "[lexera.sync] Cycle completed: {} sent, {} dropped, {} pending",
            report.sent,
            report.dropped.len(),
            report.remaining
        );
        self.emit(SyncEvent::CycleCompleted {
            sent: report.sent,
            remaining: report.remaining,
        });
        Ok(SyncOutcome::Synced(report))
    }

    /// Apply the recorded choices (unresolved entries keep the server
    /// value), fold in local edits made since the conflicting cycle, save the
    /// result as the new remote board and drain what is left in the queue.
    pub async fn apply_resolutions(&self) -> Result<DrainReport, SyncError> {
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }
        let (mut resolved, snapshot) = {
            let pending = self.lock_pending();
            let pending = pending.as_ref().ok_or(SyncError::NoPendingConflicts)?;
            let mut resolved = pending.merged.clone();
            for (conflict, choice) in pending.conflicts.iter().zip(&pending.choices) {
                apply_resolution(&mut resolved, conflict, choice.unwrap_or(Resolution::Server));
            }
            (resolved, pending.local.clone())
        };

        let current = self.store.snapshot();
        if !Arc::ptr_eq(&current, &snapshot) {
            resolved = three_way_merge(&snapshot, &current, &resolved).merged;
        }
        // Everything queued so far is part of `current` and goes out with
        // the saved board.
        let settled: Vec<u64> = self.queue.items().iter().map(|i| i.id).collect();

        let saved = self.remote.save_board(&resolved).await?;

        let now = self.store.snapshot();
        let final_board = if Arc::ptr_eq(&now, &current) {
            resolved
        } else {
            three_way_merge(&current, &now, &resolved).merged
        };
        self.store.replace(Arc::new(final_board));
        self.base.record(Arc::new(saved))?;
        for id in settled {
            self.queue.remove(id)?;
        }
        *self.lock_pending() = None;
        log::info!("[lexera.sync] Conflicts resolved and saved");
        self.emit(SyncEvent::ConflictsResolved);

        self.drain().await
    }

    /// Replay the queue in FIFO order. Stops at the first item that cannot
    /// be sent now so nothing overtakes it.
    async fn drain(&self) -> Result<DrainReport, SyncError> {
        let _drain = self.drain_lock.lock().await;
        let mut report = DrainReport::default();

        while let Some(item) = self.queue.peek() {
            if !self.connectivity.is_online() {
                break;
            }
            let local = self.store.snapshot();
            let version = self
                .base
                .version_for(&item.mutation, item.known_version, &local);
            let Some(call) = RemoteCall::from_mutation(&item.mutation, version) else {
                self.queue.remove(item.id)?;
                continue;
            };

            match call.invoke(self.remote.as_ref()).await {
                Ok(ack) => {
                    self.queue.remove(item.id)?;
                    self.base
                        .advance(&item.mutation, ack.as_ref(), &self.store.snapshot())?;
                    report.sent += 1;
                }
                Err(e) if e.is_transient() => {
                    log::info!(
                        "[lexera.sync] Network unavailable, {} operation(s) stay queued",
                        self.queue.len()
                    );
                    break;
                }
                Err(e @ RemoteError::Stale { .. }) => {
                    log::info!(
                        "[lexera.sync] Queued {} #{} is stale ({}), resyncing",
                        item.mutation.kind(),
                        item.id,
                        e
                    );
                    report.stale = true;
                    self.trigger();
                    break;
                }
                Err(e) if e.is_retryable() => {
                    let attempts = self.queue.record_failure(item.id)?;
                    if attempts > self.settings.max_retries {
                        self.drop_item(&item, &e, &mut report)?;
                    } else {
                        let delay = self.settings.retry_delay(attempts);
                        log::info!(
                            "[lexera.sync] {} #{} failed ({}), retry {} in {:?}",
                            item.mutation.kind(),
                            item.id,
                            e,
                            attempts,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => self.drop_item(&item, &e, &mut report)?,
            }
        }

        report.remaining = self.queue.len();
        Ok(report)
    }

    fn drop_item(
        &self,
        item: &QueueItem,
        error: &RemoteError,
        report: &mut DrainReport,
    ) -> Result<(), SyncError> {
        log::warn!(
            "[lexera.sync] Dropping {} #{} after {} attempt(s): {}",
            item.mutation.kind(),
            item.id,
            item.attempts + 1,
            error
        );
        self.queue.remove(item.id)?;
        self.emit(SyncEvent::OperationDropped {
            item_id: item.id,
            kind: item.mutation.kind(),
            error: error.to_string(),
        });
        report.dropped.push(DroppedOperation {
            item: item.clone(),
            error: error.to_string(),
        });
        Ok(())
    }

    /// Start the background loop. Stops on `SyncHandle::shutdown` or when
    /// the handle is dropped.
    pub fn spawn(self: &Arc<Self>) -> SyncHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let sync = self.clone();
        let mut online_rx = sync.connectivity.watch();
        let period = sync.settings.sync_interval();

        let task = tokio::spawn(async move {
            log::info!("[lexera.sync] Background sync started, every {:?}", period);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut watching = true;
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    changed = online_rx.changed(), if watching => {
                        if changed.is_err() {
                            watching = false;
                            continue;
                        }
                        if !*online_rx.borrow_and_update() {
                            continue;
                        }
                        log::info!("[lexera.sync] Back online, syncing");
                    }
                    _ = sync.trigger.notified() => {}
                    _ = shutdown_rx.changed() => {
                        log::info!("[lexera.sync] Background sync shutting down");
                        break;
                    }
                }
                // Failures are reported through events and retried next time.
                let _ = sync.run_cycle().await;
            }
        });

        SyncHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    fn skip(&self, reason: SkipReason) -> SyncOutcome {
        log::debug!("[lexera.sync] Cycle skipped: {:?}", reason);
        SyncOutcome::Skipped(reason)
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingConflicts>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Stop the loop and wait for the current cycle to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            log::warn!("[lexera.sync] Background task ended abnormally: {}", e);
        }
    }
}
