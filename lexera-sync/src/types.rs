use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub type ListId = String;
pub type CardId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardList {
    pub id: ListId,
    pub title: String,
    pub order: u32,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: CardId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub version: u64,
}

/// The collaboratively edited document: ordered lists, each owning an
/// ordered run of cards.
///
/// Every list id is a key in `cards`, and every card lives in exactly one
/// list's vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub title: String,
    pub lists: Vec<BoardList>,
    pub cards: BTreeMap<ListId, Vec<Card>>,
    pub last_modified: DateTime<Utc>,
}

/// Addresses a single mutable entity of a board.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "entityType", content = "entityId", rename_all = "lowercase")]
pub enum EntityRef {
    List(ListId),
    Card(CardId),
}

impl Board {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            lists: Vec::new(),
            cards: BTreeMap::new(),
            last_modified: Utc::now(),
        }
    }

    pub fn find_list(&self, list_id: &str) -> Option<&BoardList> {
        self.lists.iter().find(|l| l.id == list_id)
    }

    pub fn list_index(&self, list_id: &str) -> Option<usize> {
        self.lists.iter().position(|l| l.id == list_id)
    }

    /// Cards of a list in display order. Unknown lists yield an empty slice.
    pub fn cards_in(&self, list_id: &str) -> &[Card] {
        self.cards.get(list_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Locate a card anywhere on the board: (list id, index, card).
    pub fn find_card(&self, card_id: &str) -> Option<(&str, usize, &Card)> {
        self.cards.iter().find_map(|(list_id, cards)| {
            cards
                .iter()
                .position(|c| c.id == card_id)
                .map(|idx| (list_id.as_str(), idx, &cards[idx]))
        })
    }

    pub fn entity_version(&self, entity: &EntityRef) -> Option<u64> {
        match entity {
            EntityRef::List(id) => self.find_list(id).map(|l| l.version),
            EntityRef::Card(id) => self.find_card(id).map(|(_, _, c)| c.version),
        }
    }

    pub fn card_count(&self) -> usize {
        self.cards.values().map(Vec::len).sum()
    }

    /// Describe every violation of the list/card ownership rules.
    /// An empty result means the board is well formed.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut list_ids = HashSet::new();
        for list in &self.lists {
            if !list_ids.insert(list.id.as_str()) {
                problems.push(format!("list {} appears more than once", list.id));
            }
            if !self.cards.contains_key(&list.id) {
                problems.push(format!("list {} has no card entry", list.id));
            }
        }
        let mut card_ids = HashSet::new();
        for (list_id, cards) in &self.cards {
            if !list_ids.contains(list_id.as_str()) {
                problems.push(format!("card entry {} has no matching list", list_id));
            }
            for card in cards {
                if !card_ids.insert(card.id.as_str()) {
                    problems.push(format!("card {} is in more than one place", card.id));
                }
            }
        }
        problems
    }
}
