/// Serializable mutation descriptors.
///
/// A `Mutation` is plain data: the store reduces it locally, the queue
/// persists it, and the remote call that commits it is derived from it at
/// send time (see `remote::RemoteCall`).
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{Board, CardId, EntityRef, ListId, Priority};

/// Content of a card about to be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDraft {
    pub id: CardId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl CardDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            title: title.into(),
            description: String::new(),
            tags: Vec::new(),
            priority: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Field changes for an existing card. `None` leaves the field alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Remove the priority. Wins over `priority` when both are set.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub clear_priority: bool,
}

impl CardPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn description(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.tags.is_none()
            && self.priority.is_none()
            && !self.clear_priority
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Mutation {
    AddList {
        list_id: ListId,
        title: String,
    },
    RenameList {
        list_id: ListId,
        title: String,
    },
    ArchiveList {
        list_id: ListId,
    },
    RestoreList {
        list_id: ListId,
    },
    DeleteList {
        list_id: ListId,
    },
    AddCard {
        list_id: ListId,
        card: CardDraft,
        /// Insert position; appended when absent or past the end.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
    UpdateCard {
        list_id: ListId,
        card_id: CardId,
        patch: CardPatch,
    },
    DeleteCard {
        list_id: ListId,
        card_id: CardId,
    },
    MoveCard {
        card_id: CardId,
        from_list: ListId,
        to_list: ListId,
        to_index: usize,
    },
    /// Positional splice inside a single list.
    ReorderCards {
        list_id: ListId,
        from_index: usize,
        to_index: usize,
    },
    /// Replace the whole board (bulk load). Never optimistic, never queued.
    Load {
        board: Box<Board>,
    },
    /// Reset to an empty board. Never optimistic, never queued.
    Clear,
    /// A kind this build does not understand (e.g. read back from a queue
    /// written by a newer version). Reduces to a no-op.
    #[serde(other)]
    Unknown,
}

/// Fresh client-side identifier for a new list or card.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Mutation {
    pub fn add_list(title: impl Into<String>) -> Self {
        Mutation::AddList {
            list_id: new_id(),
            title: title.into(),
        }
    }

    pub fn add_card(list_id: impl Into<String>, card: CardDraft) -> Self {
        Mutation::AddCard {
            list_id: list_id.into(),
            card,
            index: None,
        }
    }

    pub fn update_card(
        list_id: impl Into<String>,
        card_id: impl Into<String>,
        patch: CardPatch,
    ) -> Self {
        Mutation::UpdateCard {
            list_id: list_id.into(),
            card_id: card_id.into(),
            patch,
        }
    }

    pub fn move_card(
        card_id: impl Into<String>,
        from_list: impl Into<String>,
        to_list: impl Into<String>,
        to_index: usize,
    ) -> Self {
        Mutation::MoveCard {
            card_id: card_id.into(),
            from_list: from_list.into(),
            to_list: to_list.into(),
            to_index,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::AddList { .. } => "ADD_LIST",
            Mutation::RenameList { .. } => "RENAME_LIST",
            Mutation::ArchiveList { .. } => "ARCHIVE_LIST",
            Mutation::RestoreList { .. } => "RESTORE_LIST",
            Mutation::DeleteList { .. } => "DELETE_LIST",
            Mutation::AddCard { .. } => "ADD_CARD",
            Mutation::UpdateCard { .. } => "UPDATE_CARD",
            Mutation::DeleteCard { .. } => "DELETE_CARD",
            Mutation::MoveCard { .. } => "MOVE_CARD",
            Mutation::ReorderCards { .. } => "REORDER_CARDS",
            Mutation::Load { .. } => "LOAD",
            Mutation::Clear => "CLEAR",
            Mutation::Unknown => "UNKNOWN",
        }
    }

    /// Bulk load and clear skip the optimistic/commit machinery entirely.
    pub fn is_direct(&self) -> bool {
        matches!(self, Mutation::Load { .. } | Mutation::Clear)
    }

    /// The entity whose version guards this mutation on the remote.
    /// `ReorderCards` is addressed by index, so it needs the board to
    /// resolve which card moves.
    pub fn target(&self, board: &Board) -> Option<EntityRef> {
        match self {
            Mutation::AddList { list_id, .. }
            | Mutation::RenameList { list_id, .. }
            | Mutation::ArchiveList { list_id }
            | Mutation::RestoreList { list_id }
            | Mutation::DeleteList { list_id } => Some(EntityRef::List(list_id.clone())),
            Mutation::AddCard { card, .. } => Some(EntityRef::Card(card.id.clone())),
            Mutation::UpdateCard { card_id, .. }
            | Mutation::DeleteCard { card_id, .. }
            | Mutation::MoveCard { card_id, .. } => Some(EntityRef::Card(card_id.clone())),
            Mutation::ReorderCards {
                list_id,
                from_index,
                ..
            } => board
                .cards_in(list_id)
                .get(*from_index)
                .map(|c| EntityRef::Card(c.id.clone())),
            Mutation::Load { .. } | Mutation::Clear | Mutation::Unknown => None,
        }
    }

    /// Pin index-addressed reorders to the card they move, as a same-list
    /// `MoveCard`. Queued mutations must stay meaningful after the list
    /// changes underneath them.
    pub fn resolve(self, board: &Board) -> Mutation {
        match self {
            Mutation::ReorderCards {
                list_id,
                from_index,
                to_index,
            } => match board.cards_in(&list_id).get(from_index) {
                Some(card) => Mutation::MoveCard {
                    card_id: card.id.clone(),
                    from_list: list_id.clone(),
                    to_list: list_id,
                    to_index,
                },
                None => Mutation::ReorderCards {
                    list_id,
                    from_index,
                    to_index,
                },
            },
            other => other,
        }
    }

    /// Reject malformed input before it reaches the optimistic path.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Mutation::AddList { list_id, title } => {
                require_id(list_id, "list")?;
                require_title(title, "list")
            }
            Mutation::RenameList { list_id, title } => {
                require_id(list_id, "list")?;
                require_title(title, "list")
            }
            Mutation::ArchiveList { list_id }
            | Mutation::RestoreList { list_id }
            | Mutation::DeleteList { list_id } => require_id(list_id, "list"),
            Mutation::AddCard { list_id, card, .. } => {
                require_id(list_id, "list")?;
                require_id(&card.id, "card")?;
                require_title(&card.title, "card")
            }
            Mutation::UpdateCard {
                list_id,
                card_id,
                patch,
            } => {
                require_id(list_id, "list")?;
                require_id(card_id, "card")?;
                match &patch.title {
                    Some(title) => require_title(title, "card"),
                    None => Ok(()),
                }
            }
            Mutation::DeleteCard { list_id, card_id } => {
                require_id(list_id, "list")?;
                require_id(card_id, "card")
            }
            Mutation::MoveCard {
                card_id,
                from_list,
                to_list,
                ..
            } => {
                require_id(card_id, "card")?;
                require_id(from_list, "list")?;
                require_id(to_list, "list")
            }
            Mutation::ReorderCards { list_id, .. } => require_id(list_id, "list"),
            Mutation::Load { .. } | Mutation::Clear | Mutation::Unknown => Ok(()),
        }
    }
}

fn require_title(title: &str, entity: &'static str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle { entity });
    }
    Ok(())
}

fn require_id(id: &str, entity: &'static str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        return Err(ValidationError::EmptyId { entity });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_is_tagged() {
        let m = Mutation::move_card("c1", "l1", "l2", 0);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["type"], "MOVE_CARD");
        assert_eq!(json["cardId"], "c1");
        assert_eq!(json["fromList"], "l1");
        assert_eq!(json["toIndex"], 0);
    }

    #[test]
    fn test_unknown_kind_deserializes() {
        let m: Mutation =
            serde_json::from_str(r#"{"type":"SET_BOARD_COLOR","color":"red"}"#).unwrap();
        assert_eq!(m, Mutation::Unknown);
        assert_eq!(m.kind(), "UNKNOWN");
    }

    #[test]
    fn test_validation_rejects_empty_titles() {
        assert_eq!(
            Mutation::add_list("   ").validate(),
            Err(ValidationError::EmptyTitle { entity: "list" })
        );
        assert_eq!(
            Mutation::add_card("l1", CardDraft::new("")).validate(),
            Err(ValidationError::EmptyTitle { entity: "card" })
        );
        assert_eq!(
            Mutation::update_card("l1", "c1", CardPatch::title("")).validate(),
            Err(ValidationError::EmptyTitle { entity: "card" })
        );
        assert!(Mutation::update_card("l1", "c1", CardPatch::description(""))
            .validate()
            .is_ok());
        assert!(Mutation::add_list("Todo").validate().is_ok());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = CardDraft::new("a");
        let b = CardDraft::new("b");
        assert_ne!(a.id, b.id);
        assert!(!a.id.is_empty());
    }

    #[test]
    fn test_resolve_pins_reorder_to_card() {
        use crate::store::reducer::{add_card, add_list};
        let now = chrono::Utc::now();
        let mut board = add_list(&Board::new("Test"), "l1", "Todo", now);
        for id in ["a", "b"] {
            board = add_card(&board, "l1", &CardDraft::new(id).with_id(id), None, now);
        }
        let reorder = Mutation::ReorderCards {
            list_id: "l1".into(),
            from_index: 1,
            to_index: 0,
        };
        assert_eq!(
            reorder.resolve(&board),
            Mutation::move_card("b", "l1", "l1", 0)
        );

        let out_of_range = Mutation::ReorderCards {
            list_id: "l1".into(),
            from_index: 5,
            to_index: 0,
        };
        assert_eq!(out_of_range.clone().resolve(&board), out_of_range);
        assert_eq!(Mutation::Clear.resolve(&board), Mutation::Clear);
    }

    #[test]
    fn test_direct_mutations() {
        assert!(Mutation::Clear.is_direct());
        assert!(Mutation::Load {
            board: Box::new(Board::new("x"))
        }
        .is_direct());
        assert!(!Mutation::add_list("Todo").is_direct());
    }
}
