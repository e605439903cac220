/// Contract with the remote board authority.
///
/// One async method per endpoint. Every call on an existing entity carries
/// the client's known version; the authority answers 409 (`RemoteError::Stale`)
/// when that version is behind its own. Implementations: `HttpRemote`
/// (REST over reqwest) and `InMemoryRemote` (in-process, for tests and demos).
pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::mutation::{CardDraft, CardPatch, Mutation};
use crate::types::{Board, BoardList, Card, CardId, EntityRef, ListId};

pub use http::HttpRemote;
pub use memory::InMemoryRemote;

/// Body of `PUT list/:id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}

/// Body of `POST card/move`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardMove {
    pub card_id: CardId,
    pub from_list: ListId,
    pub to_list: ListId,
    pub to_index: usize,
}

/// An entity as the remote reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteEntity {
    List(BoardList),
    Card(Card),
}

impl RemoteEntity {
    pub fn version(&self) -> u64 {
        match self {
            RemoteEntity::List(list) => list.version,
            RemoteEntity::Card(card) => card.version,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            RemoteEntity::List(list) => &list.id,
            RemoteEntity::Card(card) => &card.id,
        }
    }
}

#[async_trait]
pub trait RemoteBoard: Send + Sync {
    /// `GET board`
    async fn fetch_board(&self) -> Result<Board, RemoteError>;

    /// `POST board`: replace the whole board.
    async fn save_board(&self, board: &Board) -> Result<Board, RemoteError>;

    /// `POST list`
    async fn create_list(&self, list_id: &str, title: &str) -> Result<BoardList, RemoteError>;

    /// `PUT list/:id`
    async fn update_list(
        &self,
        list_id: &str,
        update: &ListUpdate,
        version: u64,
    ) -> Result<BoardList, RemoteError>;

    /// `DELETE list/:id`
    async fn delete_list(&self, list_id: &str, version: u64) -> Result<(), RemoteError>;

    /// `POST card`
    async fn create_card(
        &self,
        list_id: &str,
        card: &CardDraft,
        index: Option<usize>,
    ) -> Result<Card, RemoteError>;

    /// `PUT card/:id`
    async fn update_card(
        &self,
        card_id: &str,
        patch: &CardPatch,
        version: u64,
    ) -> Result<Card, RemoteError>;

    /// `DELETE card/:id`
    async fn delete_card(&self, card_id: &str, version: u64) -> Result<(), RemoteError>;

    /// `POST card/move`
    async fn move_card(&self, request: &CardMove, version: u64) -> Result<Card, RemoteError>;
}

/// The remote invocation that commits one mutation, derived from the
/// mutation when it is sent rather than stored alongside it.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    CreateList {
        list_id: ListId,
        title: String,
    },
    UpdateList {
        list_id: ListId,
        update: ListUpdate,
        version: u64,
    },
    DeleteList {
        list_id: ListId,
        version: u64,
    },
    CreateCard {
        list_id: ListId,
        card: CardDraft,
        index: Option<usize>,
    },
    UpdateCard {
        card_id: CardId,
        patch: CardPatch,
        version: u64,
    },
    DeleteCard {
        card_id: CardId,
        version: u64,
    },
    MoveCard {
        request: CardMove,
        version: u64,
    },
}

impl RemoteCall {
    /// `None` for mutations with nothing to send: bulk load, clear, unknown
    /// kinds, and reorders that were never pinned to a card.
    pub fn from_mutation(mutation: &Mutation, version: u64) -> Option<RemoteCall> {
        let call = match mutation {
            Mutation::AddList { list_id, title } => RemoteCall::CreateList {
                list_id: list_id.clone(),
                title: title.clone(),
            },
            Mutation::RenameList { list_id, title } => RemoteCall::UpdateList {
                list_id: list_id.clone(),
                update: ListUpdate {
                    title: Some(title.clone()),
                    archived: None,
                },
                version,
            },
            Mutation::ArchiveList { list_id } | Mutation::RestoreList { list_id } => {
                RemoteCall::UpdateList {
                    list_id: list_id.clone(),
                    update: ListUpdate {
                        title: None,
                        archived: Some(matches!(mutation, Mutation::ArchiveList { .. })),
                    },
                    version,
                }
            }
            Mutation::DeleteList { list_id } => RemoteCall::DeleteList {
                list_id: list_id.clone(),
                version,
            },
            Mutation::AddCard {
                list_id,
                card,
                index,
            } => RemoteCall::CreateCard {
                list_id: list_id.clone(),
                card: card.clone(),
                index: *index,
            },
            Mutation::UpdateCard { card_id, patch, .. } => RemoteCall::UpdateCard {
                card_id: card_id.clone(),
                patch: patch.clone(),
                version,
            },
            Mutation::DeleteCard { card_id, .. } => RemoteCall::DeleteCard {
                card_id: card_id.clone(),
                version,
            },
            Mutation::MoveCard {
                card_id,
                from_list,
                to_list,
                to_index,
            } => RemoteCall::MoveCard {
                request: CardMove {
                    card_id: card_id.clone(),
                    from_list: from_list.clone(),
                    to_list: to_list.clone(),
                    to_index: *to_index,
                },
                version,
            },
            Mutation::ReorderCards { .. }
            | Mutation::Load { .. }
            | Mutation::Clear
            | Mutation::Unknown => return None,
        };
        Some(call)
    }

    pub fn target(&self) -> EntityRef {
        match self {
            RemoteCall::CreateList { list_id, .. }
            | RemoteCall::UpdateList { list_id, .. }
            | RemoteCall::DeleteList { list_id, .. } => EntityRef::List(list_id.clone()),
            RemoteCall::CreateCard { card, .. } => EntityRef::Card(card.id.clone()),
            RemoteCall::UpdateCard { card_id, .. } | RemoteCall::DeleteCard { card_id, .. } => {
                EntityRef::Card(card_id.clone())
            }
            RemoteCall::MoveCard { request, .. } => EntityRef::Card(request.card_id.clone()),
        }
    }

    /// Perform the call. Deletions confirm with `None`.
    pub async fn invoke(&self, remote: &dyn RemoteBoard) -> Result<Option<RemoteEntity>, RemoteError> {
        let entity = match self {
            RemoteCall::CreateList { list_id, title } => {
                RemoteEntity::List(remote.create_list(list_id, title).await?)
            }
            RemoteCall::UpdateList {
                list_id,
                update,
                version,
            } => RemoteEntity::List(remote.update_list(list_id, update, *version).await?),
            RemoteCall::DeleteList { list_id, version } => {
                remote.delete_list(list_id, *version).await?;
                return Ok(None);
            }
            RemoteCall::CreateCard {
                list_id,
                card,
                index,
            } => RemoteEntity::Card(remote.create_card(list_id, card, *index).await?),
            RemoteCall::UpdateCard {
                card_id,
                patch,
                version,
            } => RemoteEntity::Card(remote.update_card(card_id, patch, *version).await?),
            RemoteCall::DeleteCard { card_id, version } => {
                remote.delete_card(card_id, *version).await?;
                return Ok(None);
            }
            RemoteCall::MoveCard { request, version } => {
                RemoteEntity::Card(remote.move_card(request, *version).await?)
            }
        };
        Ok(Some(entity))
    }
}
