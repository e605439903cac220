/// The last board state known to be confirmed by the remote.
///
/// Replaced wholesale after a clean sync cycle and advanced one mutation at
/// a time after each confirmed commit. Persisted under `BASE_KEY` so the
/// next session merges against the right ancestor.
use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::mutation::Mutation;
use crate::remote::RemoteEntity;
use crate::storage::{load_json, save_json, KeyValueStore, StorageError, BASE_KEY};
use crate::store::reducer;
use crate::types::{Board, EntityRef};

pub struct SyncBase {
    kv: Arc<dyn KeyValueStore>,
    board: RwLock<Option<Arc<Board>>>,
}

impl SyncBase {
    pub fn open(kv: Arc<dyn KeyValueStore>) -> Result<Self, StorageError> {
        let board: Option<Board> = load_json(kv.as_ref(), BASE_KEY)?;
        Ok(Self {
            kv,
            board: RwLock::new(board.map(Arc::new)),
        })
    }

    pub fn get(&self) -> Option<Arc<Board>> {
        match self.board.read() {
            Ok(board) => board.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The recorded base, or `fallback` when nothing was confirmed yet.
    pub fn get_or(&self, fallback: &Arc<Board>) -> Arc<Board> {
        self.get().unwrap_or_else(|| fallback.clone())
    }

    pub fn version_of(&self, entity: &EntityRef) -> Option<u64> {
        self.get().and_then(|board| board.entity_version(entity))
    }

    /// Version to send with `mutation`: the newer of what the client saw
    /// before mutating (`known`) and what the remote last confirmed.
    pub fn version_for(&self, mutation: &Mutation, known: Option<u64>, board: &Board) -> u64 {
        let confirmed = mutation
            .target(board)
            .and_then(|target| self.version_of(&target));
        known.max(confirmed).unwrap_or(0)
    }

    pub fn record(&self, board: Arc<Board>) -> Result<(), StorageError> {
        save_json(self.kv.as_ref(), BASE_KEY, board.as_ref())?;
        match self.board.write() {
            Ok(mut slot) => *slot = Some(board),
            Err(poisoned) => *poisoned.into_inner() = Some(board),
        }
        Ok(())
    }

    /// Fold one remote-confirmed mutation into the base and adopt the
    /// entity exactly as the remote returned it. With no base yet the
    /// `current` local state is recorded instead.
    pub fn advance(
        &self,
        mutation: &Mutation,
        ack: Option<&RemoteEntity>,
        current: &Arc<Board>,
    ) -> Result<(), StorageError> {
        let mut next = match self.get() {
            Some(base) => reducer::reduce(&base, mutation, Utc::now()),
            None => current.as_ref().clone(),
        };
        if let Some(entity) = ack {
            adopt(&mut next, entity);
        }
        self.record(Arc::new(next))
    }
}

fn adopt(board: &mut Board, entity: &RemoteEntity) {
    match entity {
        RemoteEntity::List(remote) => {
            if let Some(list) = board.lists.iter_mut().find(|l| l.id == remote.id) {
                *list = remote.clone();
            }
        }
        RemoteEntity::Card(remote) => {
            if let Some(card) = board
                .cards
                .values_mut()
                .flat_map(|cards| cards.iter_mut())
                .find(|c| c.id == remote.id)
            {
                *card = remote.clone();
            }
        }
    }
}
