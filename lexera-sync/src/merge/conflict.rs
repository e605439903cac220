/// Field-level conflicts left over by a three-way merge, and applying the
/// user's choice back onto the provisional (server-wins) board.
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Board, BoardList, Card, ListId};

/// Wire name of the card placement pseudo-field.
pub const PLACEMENT_FIELD: &str = "listId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    List,
    Card,
}

/// One field whose base, local and server values are pairwise distinct.
/// Values are kept as JSON so lists and cards share one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDiff {
    pub field: String,
    pub base: Value,
    pub local: Value,
    pub server: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConflictEntity {
    List(BoardList),
    Card(Card),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub entity_type: EntityType,
    pub entity_id: String,
    /// List holding the card on the server side. `None` for list conflicts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_id: Option<ListId>,
    pub field_diffs: Vec<FieldDiff>,
    pub local: ConflictEntity,
    pub server: ConflictEntity,
}

impl Conflict {
    pub fn field(&self, name: &str) -> Option<&FieldDiff> {
        self.field_diffs.iter().find(|d| d.field == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Local,
    Server,
}

/// Write the chosen side of `conflict` into `board`.
///
/// The merged board already carries the server values, so `Server` changes
/// nothing. `Local` restores every conflicting field from the local side;
/// a placement conflict moves the card to its local list (appended) when
/// that list still exists.
pub fn apply_resolution(board: &mut Board, conflict: &Conflict, choice: Resolution) {
    if choice == Resolution::Server {
        return;
    }
    match conflict.entity_type {
        EntityType::List => {
            let Some(list) = board.lists.iter_mut().find(|l| l.id == conflict.entity_id) else {
                return;
            };
            for diff in &conflict.field_diffs {
                if let Some(patched) = with_field(list, &diff.field, &diff.local) {
                    *list = patched;
                }
            }
        }
        EntityType::Card => {
            for diff in &conflict.field_diffs {
                if diff.field == PLACEMENT_FIELD {
                    if let Some(target) = diff.local.as_str() {
                        relocate_card(board, &conflict.entity_id, target);
                    }
                    continue;
                }
                let Some(card) = board
                    .cards
                    .values_mut()
                    .flat_map(|cards| cards.iter_mut())
                    .find(|c| c.id == conflict.entity_id)
                else {
                    return;
                };
                if let Some(patched) = with_field(card, &diff.field, &diff.local) {
                    *card = patched;
                }
            }
        }
    }
}

fn relocate_card(board: &mut Board, card_id: &str, target: &str) {
    if !board.cards.contains_key(target) {
        return;
    }
    let Some((current, idx)) = board
        .find_card(card_id)
        .map(|(list_id, idx, _)| (list_id.to_string(), idx))
    else {
        return;
    };
    if current == target {
        return;
    }
    let Some(card) = board.cards.get_mut(&current).map(|cards| cards.remove(idx)) else {
        return;
    };
    board.cards.entry(target.to_string()).or_default().push(card);
}

/// Copy of `entity` with one camelCase field replaced, or `None` when the
/// value does not fit the field.
fn with_field<T: Serialize + DeserializeOwned>(entity: &T, field: &str, value: &Value) -> Option<T> {
    let mut json = serde_json::to_value(entity).ok()?;
    json.as_object_mut()?.insert(field.to_string(), value.clone());
    serde_json::from_value(json).ok()
}
