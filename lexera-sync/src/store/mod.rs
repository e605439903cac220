pub mod reducer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;

use crate::mutation::Mutation;
use crate::types::Board;

pub use reducer::reduce;

type Listener = Arc<dyn Fn(&Arc<Board>) + Send + Sync>;

/// Handle returned by [`BoardStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Single source of truth for the board.
///
/// The only writer of the document: every change goes through `apply`
/// (reducer) or `replace` (rollback, merge results, undo/redo). Listeners
/// are called synchronously after each change, outside the state lock, so a
/// listener may read the store again.
pub struct BoardStore {
    state: RwLock<Arc<Board>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl BoardStore {
    pub fn new(initial: Board) -> Self {
        Self {
            state: RwLock::new(Arc::new(initial)),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn snapshot(&self) -> Arc<Board> {
        match self.state.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Reduce a mutation into the current state. Returns the resulting
    /// state; listeners only hear about it when something changed.
    pub fn apply(&self, mutation: &Mutation) -> Arc<Board> {
        let (next, changed) = {
            let mut state = self.write_state();
            let reduced = reduce(&state, mutation, Utc::now());
            if reduced == **state {
                (state.clone(), false)
            } else {
                *state = Arc::new(reduced);
                (state.clone(), true)
            }
        };
        if changed {
            log::debug!("[lexera.store] Applied {}", mutation.kind());
            self.notify(&next);
        }
        next
    }

    /// Swap in a whole new state (rollback, merge result, undo/redo).
    pub fn replace(&self, board: Arc<Board>) {
        self.replace_with(|_| Some(board));
    }

    /// Compute the next state from the current one under the write lock.
    /// `None` keeps the current state.
    pub fn replace_with<F>(&self, next: F)
    where
        F: FnOnce(&Arc<Board>) -> Option<Arc<Board>>,
    {
        let board = {
            let mut state = self.write_state();
            match next(&state) {
                Some(board) if !Arc::ptr_eq(&*state, &board) => {
                    *state = board.clone();
                    board
                }
                _ => return,
            }
        };
        self.notify(&board);
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Arc<Board>) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.lock_listeners().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn notify(&self, board: &Arc<Board>) {
        let listeners: Vec<Listener> = self
            .lock_listeners()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(board);
        }
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, Arc<Board>> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<(ListenerId, Listener)>> {
        match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for BoardStore {
    fn default() -> Self {
        Self::new(Board::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::CardDraft;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_apply_notifies_listeners() {
        let store = BoardStore::new(Board::new("Test"));
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let add = Mutation::add_list("Todo");
        store.apply(&add);
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        // Same list id again is a no-op, no notification.
        store.apply(&add);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(store.snapshot().lists.len(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let store = BoardStore::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let id = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.apply(&Mutation::add_list("Todo"));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_can_read_store() {
        let store = Arc::new(BoardStore::default());
        let titles = Arc::new(Mutex::new(Vec::new()));
        let inner_store = Arc::downgrade(&store);
        let sink = titles.clone();
        store.subscribe(move |_| {
            if let Some(store) = inner_store.upgrade() {
                let count = store.snapshot().lists.len();
                sink.lock().unwrap().push(count);
            }
        });
        store.apply(&Mutation::add_list("A"));
        store.apply(&Mutation::add_list("B"));
        assert_eq!(*titles.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_replace_restores_snapshot() {
        let store = BoardStore::default();
        let before = store.snapshot();
        let list = Mutation::add_list("Todo");
        store.apply(&list);
        if let Mutation::AddList { list_id, .. } = &list {
            store.apply(&Mutation::add_card(list_id.clone(), CardDraft::new("x")));
        }
        store.replace(before.clone());
        assert_eq!(*store.snapshot(), *before);
    }

    #[test]
    fn test_replace_with_sees_current_state() {
        let store = BoardStore::default();
        store.apply(&Mutation::add_list("Todo"));
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.replace_with(|current| {
            assert_eq!(current.lists.len(), 1);
            None
        });
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        store.replace_with(|_| Some(Arc::new(Board::new("Fresh"))));
        assert_eq!(store.snapshot().title, "Fresh");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
