/// In-process board authority.
///
/// Implements the same contract as the REST service: versions start at 1,
/// every accepted change increments the entity's version, and a call whose
/// version is behind the stored one is answered with `Stale`. Failures can
/// be injected to exercise offline and error paths.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{CardMove, ListUpdate, RemoteBoard, RemoteEntity};
use crate::error::RemoteError;
use crate::mutation::{CardDraft, CardPatch, Mutation};
use crate::store::reducer;
use crate::types::{Board, BoardList, Card};

pub struct InMemoryRemote {
    board: Mutex<Board>,
    reachable: AtomicBool,
    failures: Mutex<VecDeque<RemoteError>>,
    write_failures: Mutex<VecDeque<RemoteError>>,
    calls: AtomicUsize,
}

impl InMemoryRemote {
    pub fn new(board: Board) -> Self {
        Self {
            board: Mutex::new(board),
            reachable: AtomicBool::new(true),
            failures: Mutex::new(VecDeque::new()),
            write_failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn board(&self) -> Board {
        self.lock_board().clone()
    }

    pub fn set_board(&self, board: Board) {
        *self.lock_board() = board;
    }

    /// Apply a change as another client would.
    pub fn apply(&self, mutation: &Mutation) {
        let mut board = self.lock_board();
        *board = reducer::reduce(&board, mutation, Utc::now());
    }

    /// While unreachable every call fails with `RemoteError::Network`.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Fail the next call with `error`. Queued errors are used in order.
    pub fn fail_next(&self, error: RemoteError) {
        push_failure(&self.failures, error);
    }

    /// Like `fail_next`, but only list and card writes consume the error;
    /// board fetches and saves pass through.
    pub fn fail_next_write(&self, error: RemoteError) {
        push_failure(&self.write_failures, error);
    }

    /// Number of calls received, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("connection refused".into()));
        }
        match pop_failure(&self.failures) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn begin_write(&self) -> Result<(), RemoteError> {
        self.begin()?;
        match pop_failure(&self.write_failures) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn lock_board(&self) -> MutexGuard<'_, Board> {
        match self.board.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new(Board::default())
    }
}

fn push_failure(failures: &Mutex<VecDeque<RemoteError>>, error: RemoteError) {
    match failures.lock() {
        Ok(mut failures) => failures.push_back(error),
        Err(poisoned) => poisoned.into_inner().push_back(error),
    }
}

fn pop_failure(failures: &Mutex<VecDeque<RemoteError>>) -> Option<RemoteError> {
    match failures.lock() {
        Ok(mut failures) => failures.pop_front(),
        Err(poisoned) => poisoned.into_inner().pop_front(),
    }
}

fn check_list(board: &Board, list_id: &str, version: u64) -> Result<BoardList, RemoteError> {
    let list = board
        .find_list(list_id)
        .ok_or_else(|| RemoteError::NotFound(format!("list {}", list_id)))?;
    if version < list.version {
        return Err(RemoteError::Stale {
            server: Box::new(RemoteEntity::List(list.clone())),
        });
    }
    Ok(list.clone())
}

fn check_card(board: &Board, card_id: &str, version: u64) -> Result<Card, RemoteError> {
    let (_, _, card) = board
        .find_card(card_id)
        .ok_or_else(|| RemoteError::NotFound(format!("card {}", card_id)))?;
    if version < card.version {
        return Err(RemoteError::Stale {
            server: Box::new(RemoteEntity::Card(card.clone())),
        });
    }
    Ok(card.clone())
}

/// Accepted calls always advance the version, even when the reducer found
/// nothing to change.
fn stored_card(board: &mut Board, card_id: &str, before: &Card) -> Result<Card, RemoteError> {
    let card = board
        .cards
        .values_mut()
        .flat_map(|cards| cards.iter_mut())
        .find(|c| c.id == card_id)
        .ok_or_else(|| RemoteError::NotFound(format!("card {}", card_id)))?;
    if card.version == before.version {
        card.version += 1;
        card.last_modified_at = Utc::now();
    }
    Ok(card.clone())
}

#[async_trait]
impl RemoteBoard for InMemoryRemote {
    async fn fetch_board(&self) -> Result<Board, RemoteError> {
        self.begin()?;
        Ok(self.board())
    }

    async fn save_board(&self, board: &Board) -> Result<Board, RemoteError> {
        self.begin()?;
        self.set_board(board.clone());
        Ok(board.clone())
    }

    async fn create_list(&self, list_id: &str, title: &str) -> Result<BoardList, RemoteError> {
        self.begin_write()?;
        let mut board = self.lock_board();
        *board = reducer::add_list(&board, list_id, title, Utc::now());
        board
            .find_list(list_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("list {}", list_id)))
    }

    async fn update_list(
        &self,
        list_id: &str,
        update: &ListUpdate,
        version: u64,
    ) -> Result<BoardList, RemoteError> {
        self.begin_write()?;
        let mut board = self.lock_board();
        check_list(&board, list_id, version)?;
        let now = Utc::now();
        let list = board
            .lists
            .iter_mut()
            .find(|l| l.id == list_id)
            .ok_or_else(|| RemoteError::NotFound(format!("list {}", list_id)))?;
        if let Some(title) = &update.title {
            list.title = title.clone();
        }
        if let Some(archived) = update.archived {
            list.archived = archived;
        }
        list.version += 1;
        list.last_modified_at = now;
        let updated = list.clone();
        board.last_modified = now;
        Ok(updated)
    }

    async fn delete_list(&self, list_id: &str, version: u64) -> Result<(), RemoteError> {
        self.begin_write()?;
        let mut board = self.lock_board();
        check_list(&board, list_id, version)?;
        *board = reducer::delete_list(&board, list_id, Utc::now());
        Ok(())
    }

    async fn create_card(
        &self,
        list_id: &str,
        card: &CardDraft,
        index: Option<usize>,
    ) -> Result<Card, RemoteError> {
        self.begin_write()?;
        let mut board = self.lock_board();
        if board.find_list(list_id).is_none() {
            return Err(RemoteError::NotFound(format!("list {}", list_id)));
        }
        *board = reducer::add_card(&board, list_id, card, index, Utc::now());
        board
            .find_card(&card.id)
            .map(|(_, _, c)| c.clone())
            .ok_or_else(|| RemoteError::NotFound(format!("card {}", card.id)))
    }

    async fn update_card(
        &self,
        card_id: &str,
        patch: &CardPatch,
        version: u64,
    ) -> Result<Card, RemoteError> {
        self.begin_write()?;
        let mut board = self.lock_board();
        let before = check_card(&board, card_id, version)?;
        *board = reducer::update_card(&board, card_id, patch, Utc::now());
        stored_card(&mut board, card_id, &before)
    }

    async fn delete_card(&self, card_id: &str, version: u64) -> Result<(), RemoteError> {
        self.begin_write()?;
        let mut board = self.lock_board();
        check_card(&board, card_id, version)?;
        *board = reducer::delete_card(&board, card_id, Utc::now());
        Ok(())
    }

    async fn move_card(&self, request: &CardMove, version: u64) -> Result<Card, RemoteError> {
        self.begin_write()?;
        let mut board = self.lock_board();
        let before = check_card(&board, &request.card_id, version)?;
        if board.find_list(&request.to_list).is_none() {
            return Err(RemoteError::NotFound(format!("list {}", request.to_list)));
        }
        // The client's idea of the source list may be outdated.
        let from_list = board
            .find_card(&request.card_id)
            .map(|(list_id, _, _)| list_id.to_string())
            .unwrap_or_else(|| request.from_list.clone());
        *board = reducer::move_card(
            &board,
            &request.card_id,
            &from_list,
            &request.to_list,
            request.to_index,
            Utc::now(),
        );
        stored_card(&mut board, &request.card_id, &before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_with_card() -> InMemoryRemote {
        let remote = InMemoryRemote::default();
        remote.apply(&Mutation::AddList {
            list_id: "l1".into(),
            title: "Todo".into(),
        });
        remote.apply(&Mutation::add_card("l1", CardDraft::new("Task").with_id("c1")));
        remote
    }

    #[tokio::test]
    async fn test_update_increments_version() {
        let remote = remote_with_card();
        let card = remote.update_card("c1", &CardPatch::title("Renamed"), 1).await.unwrap();
        assert_eq!(card.title, "Renamed");
        assert_eq!(card.version, 2);

        // Unchanged content still counts as an accepted write.
        let card = remote.update_card("c1", &CardPatch::title("Renamed"), 2).await.unwrap();
        assert_eq!(card.version, 3);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let remote = remote_with_card();
        remote.apply(&Mutation::update_card("l1", "c1", CardPatch::title("Elsewhere")));

        let err = remote.update_card("c1", &CardPatch::title("Mine"), 1).await.unwrap_err();
        match err {
            RemoteError::Stale { server } => {
                assert_eq!(server.version(), 2);
                assert_eq!(server.id(), "c1");
            }
            other => panic!("expected stale, got {:?}", other),
        }
        assert_eq!(remote.board().find_card("c1").unwrap().2.title, "Elsewhere");
    }

    #[tokio::test]
    async fn test_missing_entities() {
        let remote = remote_with_card();
        assert!(matches!(
            remote.delete_card("nope", 1).await,
            Err(RemoteError::NotFound(_))
        ));
        assert!(matches!(
            remote.create_card("nope", &CardDraft::new("x"), None).await,
            Err(RemoteError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let remote = remote_with_card();
        remote.set_reachable(false);
        assert!(matches!(remote.fetch_board().await, Err(RemoteError::Network(_))));
        remote.set_reachable(true);

        remote.fail_next(RemoteError::Server {
            status: 500,
            message: "boom".into(),
        });
        assert!(remote.fetch_board().await.is_err());
        assert!(remote.fetch_board().await.is_ok());
        assert_eq!(remote.call_count(), 3);

        remote.fail_next_write(RemoteError::NotFound("gone".into()));
        assert!(remote.fetch_board().await.is_ok());
        assert!(remote.delete_card("c1", 1).await.is_err());
        assert!(remote.delete_card("c1", 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let remote = remote_with_card();
        let draft = CardDraft::new("Task").with_id("c1");
        let card = remote.create_card("l1", &draft, None).await.unwrap();
        assert_eq!(card.version, 1);
        assert_eq!(remote.board().card_count(), 1);
    }
}
