/// Pure state transitions over an immutable board.
///
/// `reduce` never fails: a mutation that names a missing list or card, or
/// that would not change anything, returns the state unchanged. Every
/// mutation that does change an entity stamps `last_modified_at = now` and
/// bumps that entity's `version` by exactly one.
use chrono::{DateTime, Utc};

use crate::mutation::{CardDraft, CardPatch, Mutation};
use crate::types::{Board, BoardList, Card};

pub fn reduce(state: &Board, mutation: &Mutation, now: DateTime<Utc>) -> Board {
    match mutation {
        Mutation::AddList { list_id, title } => add_list(state, list_id, title, now),
        Mutation::RenameList { list_id, title } => rename_list(state, list_id, title, now),
        Mutation::ArchiveList { list_id } => set_archived(state, list_id, true, now),
        Mutation::RestoreList { list_id } => set_archived(state, list_id, false, now),
        Mutation::DeleteList { list_id } => delete_list(state, list_id, now),
        Mutation::AddCard {
            list_id,
            card,
            index,
        } => add_card(state, list_id, card, *index, now),
        Mutation::UpdateCard { card_id, patch, .. } => update_card(state, card_id, patch, now),
        Mutation::DeleteCard { card_id, .. } => delete_card(state, card_id, now),
        Mutation::MoveCard {
            card_id,
            from_list,
            to_list,
            to_index,
        } => move_card(state, card_id, from_list, to_list, *to_index, now),
        Mutation::ReorderCards {
            list_id,
            from_index,
            to_index,
        } => reorder_cards(state, list_id, *from_index, *to_index, now),
        Mutation::Load { board } => load(board),
        Mutation::Clear => clear(state, now),
        Mutation::Unknown => state.clone(),
    }
}

pub fn add_list(state: &Board, list_id: &str, title: &str, now: DateTime<Utc>) -> Board {
    if state.find_list(list_id).is_some() {
        return state.clone();
    }
    let order = state.lists.iter().map(|l| l.order + 1).max().unwrap_or(0);
    let mut next = state.clone();
    next.lists.push(BoardList {
        id: list_id.to_string(),
        title: title.to_string(),
        order,
        archived: false,
        created_at: now,
        last_modified_at: now,
        version: 1,
    });
    next.cards.insert(list_id.to_string(), Vec::new());
    next.last_modified = now;
    next
}

pub fn rename_list(state: &Board, list_id: &str, title: &str, now: DateTime<Utc>) -> Board {
    edit_list(state, list_id, now, |list| {
        if list.title == title {
            return false;
        }
        list.title = title.to_string();
        true
    })
}

pub fn set_archived(state: &Board, list_id: &str, archived: bool, now: DateTime<Utc>) -> Board {
    edit_list(state, list_id, now, |list| {
        if list.archived == archived {
            return false;
        }
        list.archived = archived;
        true
    })
}

pub fn delete_list(state: &Board, list_id: &str, now: DateTime<Utc>) -> Board {
    let Some(idx) = state.list_index(list_id) else {
        return state.clone();
    };
    let mut next = state.clone();
    next.lists.remove(idx);
    next.cards.remove(list_id);
    next.last_modified = now;
    next
}

pub fn add_card(
    state: &Board,
    list_id: &str,
    draft: &CardDraft,
    index: Option<usize>,
    now: DateTime<Utc>,
) -> Board {
    if state.find_list(list_id).is_none() || state.find_card(&draft.id).is_some() {
        return state.clone();
    }
    let mut next = state.clone();
    let cards = next.cards.entry(list_id.to_string()).or_default();
    let at = index.unwrap_or(cards.len()).min(cards.len());
    cards.insert(
        at,
        Card {
            id: draft.id.clone(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            tags: draft.tags.clone(),
            priority: draft.priority,
            created_at: now,
            last_modified_at: now,
            version: 1,
        },
    );
    next.last_modified = now;
    next
}

/// Patches the card wherever it currently lives; a replayed update must
/// still land after a concurrent move.
pub fn update_card(state: &Board, card_id: &str, patch: &CardPatch, now: DateTime<Utc>) -> Board {
    let Some((list_id, idx, card)) = state.find_card(card_id) else {
        return state.clone();
    };
    let mut updated = card.clone();
    if let Some(title) = &patch.title {
        updated.title = title.clone();
    }
    if let Some(description) = &patch.description {
        updated.description = description.clone();
    }
    if let Some(tags) = &patch.tags {
        updated.tags = tags.clone();
    }
    if patch.clear_priority {
        updated.priority = None;
    } else if patch.priority.is_some() {
        updated.priority = patch.priority;
    }
    if updated == *card {
        return state.clone();
    }
    touch_card(&mut updated, now);

    let list_id = list_id.to_string();
    let mut next = state.clone();
    if let Some(cards) = next.cards.get_mut(&list_id) {
        cards[idx] = updated;
    }
    next.last_modified = now;
    next
}

pub fn delete_card(state: &Board, card_id: &str, now: DateTime<Utc>) -> Board {
    let Some((list_id, idx, _)) = state.find_card(card_id) else {
        return state.clone();
    };
    let list_id = list_id.to_string();
    let mut next = state.clone();
    if let Some(cards) = next.cards.get_mut(&list_id) {
        cards.remove(idx);
    }
    next.last_modified = now;
    next
}

/// Atomic remove-then-insert. `to_index` addresses the destination list
/// after the card has left its source, so within one list it is the final
/// position of the card. Out-of-range indices clamp to the end.
pub fn move_card(
    state: &Board,
    card_id: &str,
    from_list: &str,
    to_list: &str,
    to_index: usize,
    now: DateTime<Utc>,
) -> Board {
    if state.find_list(to_list).is_none() {
        return state.clone();
    }
    let Some(from_idx) = state.cards_in(from_list).iter().position(|c| c.id == card_id) else {
        return state.clone();
    };

    let mut next = state.clone();
    let Some(mut card) = next.cards.get_mut(from_list).map(|cards| cards.remove(from_idx)) else {
        return state.clone();
    };
    let dest = next.cards.entry(to_list.to_string()).or_default();
    let at = to_index.min(dest.len());
    if from_list == to_list && at == from_idx {
        return state.clone();
    }
    touch_card(&mut card, now);
    dest.insert(at, card);
    next.last_modified = now;
    next
}

pub fn reorder_cards(
    state: &Board,
    list_id: &str,
    from_index: usize,
    to_index: usize,
    now: DateTime<Utc>,
) -> Board {
    match state.cards_in(list_id).get(from_index) {
        Some(card) => move_card(state, &card.id, list_id, list_id, to_index, now),
        None => state.clone(),
    }
}

pub fn load(board: &Board) -> Board {
    board.clone()
}

pub fn clear(state: &Board, now: DateTime<Utc>) -> Board {
    Board {
        title: state.title.clone(),
        lists: Vec::new(),
        cards: Default::default(),
        last_modified: now,
    }
}

fn edit_list(
    state: &Board,
    list_id: &str,
    now: DateTime<Utc>,
    edit: impl FnOnce(&mut BoardList) -> bool,
) -> Board {
    let Some(idx) = state.list_index(list_id) else {
        return state.clone();
    };
    let mut next = state.clone();
    let list = &mut next.lists[idx];
    if !edit(list) {
        return state.clone();
    }
    list.version += 1;
    list.last_modified_at = now;
    next.last_modified = now;
    next
}

fn touch_card(card: &mut Card, now: DateTime<Utc>) {
    card.version += 1;
    card.last_modified_at = now;
}
