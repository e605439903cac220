/// Undo/redo over whole-board snapshots.
///
/// `UndoHistory` is a bounded stack with a current pointer. `BoardHistory`
/// attaches one to a `BoardStore`: every new store state is pushed, and
/// undo/redo write the selected snapshot back into the store. Navigation is
/// purely local; nothing here is queued or sent to the remote.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::store::{BoardStore, ListenerId};
use crate::types::Board;

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub state: Arc<Board>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct UndoHistory {
    entries: VecDeque<HistoryEntry>,
    pointer: usize,
    capacity: usize,
    /// Set by a successful undo/redo; the next push is its echo and is
    /// ignored.
    navigating: bool,
}

impl UndoHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            pointer: 0,
            capacity: capacity.max(1),
            navigating: false,
        }
    }

    /// Record a new state. Any redo branch beyond the pointer is discarded.
    /// Returns false when the push was the echo of a navigation.
    pub fn push_state(&mut self, state: Arc<Board>) -> bool {
        if self.navigating {
            self.navigating = false;
            return false;
        }
        if !self.entries.is_empty() {
            self.entries.truncate(self.pointer + 1);
        }
        self.entries.push_back(HistoryEntry {
            state,
            timestamp: Utc::now(),
        });
        if self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        self.pointer = self.entries.len() - 1;
        true
    }

    /// Step back. At the oldest entry this is a no-op returning the current
    /// state; `None` only when nothing was recorded.
    pub fn undo(&mut self) -> Option<Arc<Board>> {
        if self.can_undo() {
            self.pointer -= 1;
            self.navigating = true;
        }
        self.current()
    }

    /// Step forward; symmetric to `undo`.
    pub fn redo(&mut self) -> Option<Arc<Board>> {
        if self.can_redo() {
            self.pointer += 1;
            self.navigating = true;
        }
        self.current()
    }

    pub fn can_undo(&self) -> bool {
        self.pointer > 0
    }

    pub fn can_redo(&self) -> bool {
        self.pointer + 1 < self.entries.len()
    }

    pub fn current(&self) -> Option<Arc<Board>> {
        self.entries.get(self.pointer).map(|e| e.state.clone())
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop a pending navigation echo that will never arrive.
    pub fn cancel_navigation(&mut self) {
        self.navigating = false;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.pointer = 0;
        self.navigating = false;
    }
}

/// History wired to a store. Detaches itself when dropped.
pub struct BoardHistory {
    store: Arc<BoardStore>,
    history: Arc<Mutex<UndoHistory>>,
    listener: ListenerId,
}

impl BoardHistory {
    pub fn attach(store: Arc<BoardStore>, capacity: usize) -> Self {
        let mut initial = UndoHistory::new(capacity);
        initial.push_state(store.snapshot());
        let history = Arc::new(Mutex::new(initial));

        let recorder = history.clone();
        let listener = store.subscribe(move |board| {
            lock(&recorder).push_state(board.clone());
        });

        Self {
            store,
            history,
            listener,
        }
    }

    /// Restore the previous snapshot into the store. At the oldest entry
    /// nothing changes and the current state is returned.
    pub fn undo(&self) -> Option<Arc<Board>> {
        self.navigate(UndoHistory::can_undo, UndoHistory::undo)
    }

    pub fn redo(&self) -> Option<Arc<Board>> {
        self.navigate(UndoHistory::can_redo, UndoHistory::redo)
    }

    pub fn can_undo(&self) -> bool {
        lock(&self.history).can_undo()
    }

    pub fn can_redo(&self) -> bool {
        lock(&self.history).can_redo()
    }

    pub fn len(&self) -> usize {
        lock(&self.history).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.history).is_empty()
    }

    fn navigate(
        &self,
        can_move: fn(&UndoHistory) -> bool,
        step: fn(&mut UndoHistory) -> Option<Arc<Board>>,
    ) -> Option<Arc<Board>> {
        let target = {
            let mut history = lock(&self.history);
            if !can_move(&history) {
                return history.current();
            }
            let target = step(&mut history)?;
            // The store only notifies on an actual change.
            if Arc::ptr_eq(&target, &self.store.snapshot()) {
                history.cancel_navigation();
            }
            target
        };
        self.store.replace(target.clone());
        Some(target)
    }
}

impl Drop for BoardHistory {
    fn drop(&mut self) {
        self.store.unsubscribe(self.listener);
    }
}

fn lock(history: &Mutex<UndoHistory>) -> MutexGuard<'_, UndoHistory> {
    match history.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::Mutation;

    fn state(title: &str) -> Arc<Board> {
        Arc::new(Board::new(title))
    }

    fn titles(history: &UndoHistory) -> Vec<String> {
        history.entries().map(|e| e.state.title.clone()).collect()
    }

    #[test]
    fn test_undo_redo_moves_pointer() {
        let mut history = UndoHistory::new(50);
        for t in ["a", "b", "c"] {
            history.push_state(state(t));
        }
        assert_eq!(history.undo().unwrap().title, "b");
        // Echo of the navigation is ignored.
        assert!(!history.push_state(state("b")));
        assert_eq!(history.undo().unwrap().title, "a");
        history.cancel_navigation();
        assert!(!history.can_undo());
        assert_eq!(history.undo().unwrap().title, "a");
        assert_eq!(history.redo().unwrap().title, "b");
        history.cancel_navigation();
        assert!(history.can_redo());
    }

    #[test]
    fn test_undo_then_redo_is_identity() {
        let mut history = UndoHistory::new(50);
        for t in ["a", "b", "c"] {
            history.push_state(state(t));
        }
        let before = history.current().unwrap();
        history.undo();
        let after = history.redo().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_push_after_undo_discards_redo_branch() {
        let mut history = UndoHistory::new(50);
        for t in ["a", "b", "c"] {
            history.push_state(state(t));
        }
        history.undo();
        history.cancel_navigation();
        assert!(history.push_state(state("d")));
        assert!(!history.can_redo());
        assert_eq!(titles(&history), vec!["a", "b", "d"]);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut history = UndoHistory::new(3);
        for t in ["a", "b", "c", "d", "e"] {
            history.push_state(state(t));
        }
        assert_eq!(titles(&history), vec!["c", "d", "e"]);
        assert_eq!(history.pointer(), 2);
        history.undo();
        history.cancel_navigation();
        history.undo();
        assert!(!history.can_undo());
        assert_eq!(history.current().unwrap().title, "c");
    }

    #[test]
    fn test_empty_history() {
        let mut history = UndoHistory::new(0);
        assert_eq!(history.capacity(), 1);
        assert!(history.undo().is_none());
        assert!(history.redo().is_none());
        assert!(history.is_empty());
    }

    #[test]
    fn test_board_history_follows_store() {
        let store = Arc::new(BoardStore::new(Board::new("Test")));
        let history = BoardHistory::attach(store.clone(), 50);
        let first = Mutation::AddList {
            list_id: "l1".into(),
            title: "Todo".into(),
        };
        let second = Mutation::AddList {
            list_id: "l2".into(),
            title: "Done".into(),
        };
        store.apply(&first);
        store.apply(&second);
        assert_eq!(history.len(), 3);

        let undone = history.undo().unwrap();
        assert_eq!(undone.lists.len(), 1);
        assert_eq!(store.snapshot().lists.len(), 1);
        // Writing the snapshot back did not add an entry.
        assert_eq!(history.len(), 3);
        assert!(history.can_redo());

        history.redo().unwrap();
        assert_eq!(store.snapshot().lists.len(), 2);
        assert_eq!(history.len(), 3);

        history.undo();
        history.undo();
        assert!(store.snapshot().lists.is_empty());
        let oldest = store.snapshot();
        let again = history.undo().unwrap();
        assert!(Arc::ptr_eq(&again, &oldest));
        assert!(Arc::ptr_eq(&store.snapshot(), &oldest));

        // A new edit after undo drops the redo branch.
        store.apply(&Mutation::AddList {
            list_id: "l3".into(),
            title: "Later".into(),
        });
        assert!(!history.can_redo());
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_detaches_on_drop() {
        let store = Arc::new(BoardStore::new(Board::new("Test")));
        let history = BoardHistory::attach(store.clone(), 50);
        let recorded = history.history.clone();
        drop(history);
        store.apply(&Mutation::add_list("Todo"));
        assert_eq!(lock(&recorded).len(), 1);
    }

    #[test]
    fn test_redo_at_newest_returns_current() {
        let store = Arc::new(BoardStore::new(Board::new("Test")));
        let history = BoardHistory::attach(store.clone(), 50);
        store.apply(&Mutation::add_list("Todo"));
        let newest = store.snapshot();

        let redone = history.redo().unwrap();
        assert!(Arc::ptr_eq(&redone, &newest));
        assert_eq!(history.len(), 2);

        // The no-op redo left no pending echo behind: the next edit is recorded.
        store.apply(&Mutation::add_list("Done"));
        assert_eq!(history.len(), 3);
        assert!(history.can_undo());
    }
}
