/// One offline-capable board: store, queue, base, synchronizer, coordinator
/// and history wired together over a single key-value store.
///
/// `open` restores the persisted document, queue and confirmed base, and
/// keeps the document record current by persisting every new store state.
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::SyncSettings;
use crate::connectivity::ConnectivityMonitor;
use crate::coordinator::{Coordinator, DispatchOutcome};
use crate::error::{DispatchError, SessionError, StorageError, SyncError};
use crate::history::BoardHistory;
use crate::merge::{Conflict, Resolution};
use crate::mutation::Mutation;
use crate::queue::{OperationQueue, QueueItem};
use crate::remote::{HttpRemote, RemoteBoard};
use crate::storage::file::FileStore;
use crate::storage::{load_json, save_json, KeyValueStore, BOARD_KEY};
use crate::store::{BoardStore, ListenerId};
use crate::sync::{DrainReport, SyncBase, SyncEvent, SyncHandle, SyncOutcome, Synchronizer};
use crate::types::Board;

pub struct OfflineBoard {
    settings: SyncSettings,
    store: Arc<BoardStore>,
    queue: Arc<OperationQueue>,
    sync: Arc<Synchronizer>,
    coordinator: Coordinator,
    history: BoardHistory,
    persist_listener: ListenerId,
}

impl OfflineBoard {
    pub fn open(
        settings: SyncSettings,
        kv: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteBoard>,
        connectivity: Arc<dyn ConnectivityMonitor>,
    ) -> Result<Self, StorageError> {
        let board: Board = load_json(kv.as_ref(), BOARD_KEY)?.unwrap_or_default();
        let violations = board.invariant_violations();
        if !violations.is_empty() {
            log::warn!(
                "[lexera.session] Restored board has {} problem(s): {}",
                violations.len(),
                violations.join("; ")
            );
        }

        let store = Arc::new(BoardStore::new(board));
        let queue = Arc::new(OperationQueue::open(kv.clone())?);
        let base = Arc::new(SyncBase::open(kv.clone())?);
        log::info!(
            "[lexera.session] Opened board: {} list(s), {} card(s), {} queued operation(s)",
            store.snapshot().lists.len(),
            store.snapshot().card_count(),
            queue.len()
        );

        let persist_kv = kv;
        let persist_listener = store.subscribe(move |board| {
            if let Err(e) = save_json(persist_kv.as_ref(), BOARD_KEY, board.as_ref()) {
                log::warn!("[lexera.session] Failed to persist board: {}", e);
            }
        });

        let sync = Arc::new(Synchronizer::new(
            store.clone(),
            queue.clone(),
            base.clone(),
            remote.clone(),
            connectivity.clone(),
            settings.clone(),
        ));
        let coordinator = Coordinator::new(
            store.clone(),
            queue.clone(),
            base,
            remote,
            connectivity,
            sync.clone(),
        );
        let history = BoardHistory::attach(store.clone(), settings.history_capacity);

        Ok(Self {
            settings,
            store,
            queue,
            sync,
            coordinator,
            history,
            persist_listener,
        })
    }

    /// Open against the configured REST server, persisting under the
    /// configured data directory.
    pub fn connect(
        settings: SyncSettings,
        connectivity: Arc<dyn ConnectivityMonitor>,
    ) -> Result<Self, SessionError> {
        let url = settings
            .server_url
            .clone()
            .ok_or(SessionError::NoServerUrl)?;
        let remote = Arc::new(HttpRemote::new(url, settings.request_timeout())?);
        let kv = Arc::new(FileStore::open(settings.resolved_data_dir())?);
        Ok(Self::open(settings, kv, remote, connectivity)?)
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn board(&self) -> Arc<Board> {
        self.store.snapshot()
    }

    pub fn store(&self) -> &Arc<BoardStore> {
        &self.store
    }

    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.sync
    }

    pub fn history(&self) -> &BoardHistory {
        &self.history
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Arc<Board>) + Send + Sync + 'static,
    {
        self.store.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.store.unsubscribe(id)
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.sync.subscribe()
    }

    pub async fn dispatch(&self, mutation: Mutation) -> Result<DispatchOutcome, DispatchError> {
        self.coordinator.dispatch(mutation).await
    }

    pub fn pending_operations(&self) -> Vec<QueueItem> {
        self.queue.items()
    }

    pub fn undo(&self) -> Option<Arc<Board>> {
        self.history.undo()
    }

    pub fn redo(&self) -> Option<Arc<Board>> {
        self.history.redo()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub async fn sync_now(&self) -> Result<SyncOutcome, SyncError> {
        self.sync.run_cycle().await
    }

    pub fn spawn_sync(&self) -> SyncHandle {
        self.sync.spawn()
    }

    pub fn conflicts(&self) -> Vec<Conflict> {
        self.sync.conflicts()
    }

    pub fn resolve_conflict(&self, index: usize, choice: Resolution) -> Result<(), SyncError> {
        self.sync.resolve_conflict(index, choice)
    }

    pub async fn apply_resolutions(&self) -> Result<DrainReport, SyncError> {
        self.sync.apply_resolutions().await
    }
}

impl Drop for OfflineBoard {
    fn drop(&mut self) {
        self.store.unsubscribe(self.persist_listener);
    }
}
