/// Optimistic dispatch.
///
/// `dispatch` applies a mutation to the store immediately, then commits it
/// to the remote. Depending on the answer the change is kept (committed),
/// handed to the operation queue (offline or unreachable), kept and routed
/// to the synchronizer (stale version), or rolled back (any other failure).
///
/// Mutations waiting on their commit form a chain. Rolling one back restores
/// the state before the chain and replays the others, so a failure never
/// takes unrelated optimistic changes with it. Changes that reached the store
/// some other way survive a rollback as well.
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::connectivity::ConnectivityMonitor;
use crate::error::DispatchError;
use crate::merge::{apply_resolution, three_way_merge, Resolution};
use crate::mutation::Mutation;
use crate::queue::OperationQueue;
use crate::remote::{RemoteBoard, RemoteCall};
use crate::store::{reducer, BoardStore};
use crate::sync::{SyncBase, Synchronizer};
use crate::types::Board;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The mutation did not change the board; nothing was sent.
    Unchanged,
    /// Bulk load or clear, applied directly.
    Applied,
    /// Accepted by the remote.
    Committed,
    /// Kept locally and queued for the next sync.
    Queued,
    /// The remote holds a newer version. The change is kept and queued, and
    /// a sync cycle was requested to merge it.
    Conflicted,
}

#[derive(Debug)]
struct ChainEntry {
    id: u64,
    mutation: Mutation,
    /// Store state this entry was applied to.
    before: Arc<Board>,
    /// Store state right after this entry was applied.
    after: Arc<Board>,
    settled: bool,
}

/// State before the oldest unresolved optimistic mutation, plus every
/// mutation applied since, in dispatch order.
#[derive(Debug, Default)]
struct RollbackChain {
    base: Option<Arc<Board>>,
    entries: Vec<ChainEntry>,
    next_id: u64,
}

impl RollbackChain {
    fn begin(&mut self, before: Arc<Board>, mutation: Mutation, after: Arc<Board>) -> u64 {
        if self.entries.is_empty() {
            self.base = Some(before.clone());
        }
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(ChainEntry {
            id,
            mutation,
            before,
            after,
            settled: false,
        });
        id
    }

    /// The entry no longer needs a way back.
    fn settle(&mut self, id: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.settled = true;
        }
        self.fold();
    }

    /// Drop entry `id` and return the state `current` should become without
    /// it. `None` when the entry is unknown.
    ///
    /// While the store holds exactly what the chain produced, the result is
    /// the replay of the remaining entries over the chain base. Once
    /// something else moved the store (a load, a clear, undo/redo, a sync
    /// merge), only the failed step is taken back out of `current`.
    fn rollback(&mut self, id: u64, current: &Arc<Board>) -> Option<Arc<Board>> {
        let position = self.entries.iter().position(|e| e.id == id)?;
        let base = self.base.clone()?;
        let with_failed = if self.tracks(current) {
            None
        } else {
            Some(replay(&base, self.entries.iter().map(|e| &e.mutation)))
        };
        self.entries.remove(position);

        let mut state = base;
        for entry in &mut self.entries {
            let next = Arc::new(reducer::reduce(&state, &entry.mutation, Utc::now()));
            entry.before = std::mem::replace(&mut state, next.clone());
            entry.after = next;
        }
        self.fold();

        match with_failed {
            None => Some(state),
            Some(with_failed) => {
                log::debug!("[lexera.dispatch] Store moved outside the chain, rebasing rollback");
                Some(Arc::new(take_back(&with_failed, current, &state)))
            }
        }
    }

    /// Whether every entry was applied on top of the previous one and
    /// `current` is still the last result.
    fn tracks(&self, current: &Arc<Board>) -> bool {
        let mut expected = self.base.as_ref();
        for entry in &self.entries {
            if !expected.is_some_and(|state| Arc::ptr_eq(state, &entry.before)) {
                return false;
            }
            expected = Some(&entry.after);
        }
        expected.is_some_and(|state| Arc::ptr_eq(state, current))
    }

    fn fold(&mut self) {
        while self.entries.first().is_some_and(|e| e.settled) {
            let entry = self.entries.remove(0);
            self.base = Some(entry.after);
        }
        if self.entries.is_empty() {
            self.base = None;
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn replay<'a>(base: &Arc<Board>, mutations: impl Iterator<Item = &'a Mutation>) -> Arc<Board> {
    let mut state = base.clone();
    for mutation in mutations {
        state = Arc::new(reducer::reduce(&state, mutation, Utc::now()));
    }
    state
}

/// Apply the step `with_failed -> without` to `current`. Changes that only
/// `current` carries are kept; where both touched a field, `current` wins.
fn take_back(with_failed: &Board, current: &Board, without: &Board) -> Board {
    let result = three_way_merge(with_failed, current, without);
    let mut board = result.merged;
    for conflict in &result.conflicts {
        apply_resolution(&mut board, conflict, Resolution::Local);
    }
    board
}

pub struct Coordinator {
    store: Arc<BoardStore>,
    queue: Arc<OperationQueue>,
    base: Arc<SyncBase>,
    remote: Arc<dyn RemoteBoard>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    sync: Arc<Synchronizer>,
    chain: Mutex<RollbackChain>,
}

impl Coordinator {
    pub fn new(
        store: Arc<BoardStore>,
        queue: Arc<OperationQueue>,
        base: Arc<SyncBase>,
        remote: Arc<dyn RemoteBoard>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        sync: Arc<Synchronizer>,
    ) -> Self {
        Self {
            store,
            queue,
            base,
            remote,
            connectivity,
            sync,
            chain: Mutex::new(RollbackChain::default()),
        }
    }

    /// Optimistic mutations still waiting on their commit.
    pub fn unresolved(&self) -> usize {
        self.lock_chain().len()
    }

    pub async fn dispatch(&self, mutation: Mutation) -> Result<DispatchOutcome, DispatchError> {
        mutation.validate()?;

        if mutation.is_direct() {
            self.store.apply(&mutation);
            log::info!("[lexera.dispatch] Applied {} directly", mutation.kind());
            return Ok(DispatchOutcome::Applied);
        }

        let in_flight = self.sync.hold();
        let result = self.optimistic(mutation).await;
        drop(in_flight);

        // Requested after the hold is released so the cycle is not skipped.
        if matches!(
            result,
            Ok(DispatchOutcome::Queued | DispatchOutcome::Conflicted)
        ) && self.connectivity.is_online()
        {
            self.sync.trigger();
        }
        result
    }

    async fn optimistic(&self, mutation: Mutation) -> Result<DispatchOutcome, DispatchError> {
        let (id, mutation, known, applied) = {
            let mut chain = self.lock_chain();
            let before = self.store.snapshot();
            let mutation = mutation.resolve(&before);
            let known = mutation
                .target(&before)
                .and_then(|target| before.entity_version(&target));
            let applied = self.store.apply(&mutation);
            if Arc::ptr_eq(&before, &applied) {
                log::debug!("[lexera.dispatch] {} changed nothing", mutation.kind());
                return Ok(DispatchOutcome::Unchanged);
            }
            let id = chain.begin(before, mutation.clone(), applied.clone());
            (id, mutation, known, applied)
        };

        if !self.connectivity.is_online() || !self.queue.is_empty() {
            return self.enqueue(id, mutation, known, DispatchOutcome::Queued);
        }

        let version = self.base.version_for(&mutation, known, &applied);
        let Some(call) = RemoteCall::from_mutation(&mutation, version) else {
            self.lock_chain().settle(id);
            return Ok(DispatchOutcome::Applied);
        };

        match call.invoke(self.remote.as_ref()).await {
            Ok(ack) => {
                self.lock_chain().settle(id);
                self.base
                    .advance(&mutation, ack.as_ref(), &self.store.snapshot())?;
                log::debug!(
                    "[lexera.dispatch] Committed {} on {:?}",
                    mutation.kind(),
                    call.target()
                );
                Ok(DispatchOutcome::Committed)
            }
            Err(e) if e.is_transient() => {
                log::info!(
                    "[lexera.dispatch] Remote unreachable ({}), queueing {}",
                    e,
                    mutation.kind()
                );
                self.enqueue(id, mutation, known, DispatchOutcome::Queued)
            }
            Err(e) if e.is_stale() => {
                log::info!(
                    "[lexera.dispatch] {} is stale, deferring to merge",
                    mutation.kind()
                );
                self.enqueue(id, mutation, known, DispatchOutcome::Conflicted)
            }
            Err(e) => {
                log::warn!(
                    "[lexera.dispatch] {} on {:?} failed, rolling back: {}",
                    mutation.kind(),
                    call.target(),
                    e
                );
                self.rollback(id);
                Err(DispatchError::Remote(e))
            }
        }
    }

    fn enqueue(
        &self,
        id: u64,
        mutation: Mutation,
        known: Option<u64>,
        outcome: DispatchOutcome,
    ) -> Result<DispatchOutcome, DispatchError> {
        match self.queue.enqueue(mutation, known) {
            Ok(_) => {
                self.lock_chain().settle(id);
                Ok(outcome)
            }
            Err(e) => {
                log::warn!("[lexera.dispatch] Could not queue mutation, rolling back: {}", e);
                self.rollback(id);
                Err(e.into())
            }
        }
    }

    fn rollback(&self, id: u64) {
        let mut chain = self.lock_chain();
        self.store.replace_with(|current| chain.rollback(id, current));
    }

    fn lock_chain(&self) -> MutexGuard<'_, RollbackChain> {
        match self.chain.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
