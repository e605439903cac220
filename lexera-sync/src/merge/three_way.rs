/// Three-way merge of board snapshots.
///
/// Given three versions of the board:
/// - base: last state confirmed by the remote
/// - local: what this client has now
/// - server: what the remote has now
///
/// Per field of every list and card:
/// - local == server -> keep
/// - only server changed -> take server
/// - only local changed -> take local
/// - all three differ -> CONFLICT, provisional value is server's
///
/// Per entity (matched by id):
/// - only in local, not in base -> local creation, keep
/// - only in server, not in base -> server creation, keep
/// - in base, missing on either side -> deleted, drop (deletion beats edits)
/// - in local and server but not base -> both created it, merge fields
///   against an empty base
///
/// Card placement is merged like a field (`listId`). Card order inside a
/// list follows whichever side reordered it; when neither or both did,
/// server order wins and cards placed by local edits keep their local index.
use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;

use super::conflict::{Conflict, ConflictEntity, EntityType, FieldDiff, PLACEMENT_FIELD};
use crate::types::{Board, BoardList, Card, CardId, ListId};

#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    /// Merged board; conflicting fields carry the server value.
    pub merged: Board,
    pub conflicts: Vec<Conflict>,
}

impl MergeResult {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

pub fn three_way_merge(base: &Board, local: &Board, server: &Board) -> MergeResult {
    let mut conflicts = Vec::new();

    let lists = merge_lists(base, local, server, &mut conflicts);
    let kept_lists: HashSet<&str> = lists.iter().map(|l| l.id.as_str()).collect();

    let placed = merge_cards(base, local, server, &kept_lists, &mut conflicts);

    let mut cards = std::collections::BTreeMap::new();
    for list in &lists {
        let members: Vec<&(ListId, Card)> = placed.iter().filter(|(l, _)| *l == list.id).collect();
        let ordered = order_cards(
            base.cards_in(&list.id),
            local.cards_in(&list.id),
            server.cards_in(&list.id),
            members.iter().map(|(_, c)| c.id.as_str()).collect(),
        );
        let by_id: HashMap<&str, &Card> =
            members.iter().map(|(_, c)| (c.id.as_str(), c)).collect();
        let run: Vec<Card> = ordered
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).map(|c| (*c).clone()))
            .collect();
        cards.insert(list.id.clone(), run);
    }

    let title = pick(&base.title, &local.title, &server.title).clone();
    let merged = Board {
        title,
        lists,
        cards,
        last_modified: local.last_modified.max(server.last_modified),
    };

    if !conflicts.is_empty() {
        log::info!(
            "[lexera.merge] Merge left {} conflict(s) for resolution",
            conflicts.len()
        );
    }

    MergeResult { merged, conflicts }
}

fn merge_lists(
    base: &Board,
    local: &Board,
    server: &Board,
    conflicts: &mut Vec<Conflict>,
) -> Vec<BoardList> {
    // Server sequence first, then lists only the local side knows about.
    let mut ids: Vec<&str> = server.lists.iter().map(|l| l.id.as_str()).collect();
    for list in &local.lists {
        if server.find_list(&list.id).is_none() {
            ids.push(&list.id);
        }
    }

    let mut merged = Vec::new();
    for id in ids {
        let b = base.find_list(id);
        match (b, local.find_list(id), server.find_list(id)) {
            (_, Some(l), Some(s)) => {
                let mut diffs = Vec::new();
                let mut list = s.clone();
                list.title = merge_field("title", b.map(|b| &b.title), &l.title, &s.title, &mut diffs);
                list.order = merge_field("order", b.map(|b| &b.order), &l.order, &s.order, &mut diffs);
                list.archived = merge_field(
                    "archived",
                    b.map(|b| &b.archived),
                    &l.archived,
                    &s.archived,
                    &mut diffs,
                );
                list.version = l.version.max(s.version);
                list.last_modified_at = l.last_modified_at.max(s.last_modified_at);
                if !diffs.is_empty() {
                    conflicts.push(Conflict {
                        entity_type: EntityType::List,
                        entity_id: id.to_string(),
                        list_id: None,
                        field_diffs: diffs,
                        local: ConflictEntity::List(l.clone()),
                        server: ConflictEntity::List(s.clone()),
                    });
                }
                merged.push(list);
            }
            (None, Some(l), None) => merged.push(l.clone()),
            (None, None, Some(s)) => merged.push(s.clone()),
            // Present in base and gone on one side: deleted.
            _ => {}
        }
    }
    merged
}

/// Merged cards with the list each one lands in, in no particular order.
fn merge_cards(
    base: &Board,
    local: &Board,
    server: &Board,
    kept_lists: &HashSet<&str>,
    conflicts: &mut Vec<Conflict>,
) -> Vec<(ListId, Card)> {
    let base_idx = index_cards(base);
    let local_idx = index_cards(local);
    let server_idx = index_cards(server);

    let mut ids: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();
    for board in [server, local] {
        for cards in board.cards.values() {
            for card in cards {
                if seen.insert(card.id.as_str()) {
                    ids.push(&card.id);
                }
            }
        }
    }

    let mut placed = Vec::new();
    for id in ids {
        let b = base_idx.get(id);
        let (list_id, card) = match (b, local_idx.get(id), server_idx.get(id)) {
            (_, Some((l_list, l)), Some((s_list, s))) => {
                let mut diffs = Vec::new();
                let mut card = (*s).clone();
                card.title = merge_field("title", b.map(|(_, b)| &b.title), &l.title, &s.title, &mut diffs);
                card.description = merge_field(
                    "description",
                    b.map(|(_, b)| &b.description),
                    &l.description,
                    &s.description,
                    &mut diffs,
                );
                card.tags = merge_field("tags", b.map(|(_, b)| &b.tags), &l.tags, &s.tags, &mut diffs);
                card.priority = merge_field(
                    "priority",
                    b.map(|(_, b)| &b.priority),
                    &l.priority,
                    &s.priority,
                    &mut diffs,
                );
                let list_id = merge_field(
                    PLACEMENT_FIELD,
                    b.map(|(b_list, _)| b_list),
                    l_list,
                    s_list,
                    &mut diffs,
                );
                card.version = l.version.max(s.version);
                card.last_modified_at = l.last_modified_at.max(s.last_modified_at);
                if !diffs.is_empty() {
                    conflicts.push(Conflict {
                        entity_type: EntityType::Card,
                        entity_id: id.to_string(),
                        list_id: Some(s_list.clone()),
                        field_diffs: diffs,
                        local: ConflictEntity::Card((*l).clone()),
                        server: ConflictEntity::Card((*s).clone()),
                    });
                }
                (list_id, card)
            }
            (None, Some((l_list, l)), None) => (l_list.clone(), (*l).clone()),
            (None, None, Some((s_list, s))) => (s_list.clone(), (*s).clone()),
            _ => continue,
        };
        if kept_lists.contains(list_id.as_str()) {
            placed.push((list_id, card));
        } else {
            log::debug!("[lexera.merge] Dropping card {}: its list {} was deleted", id, list_id);
        }
    }
    placed
}

fn index_cards(board: &Board) -> HashMap<&str, (ListId, &Card)> {
    board
        .cards
        .iter()
        .flat_map(|(list_id, cards)| cards.iter().map(move |c| (c.id.as_str(), (list_id.clone(), c))))
        .collect()
}

/// Display order for the cards `members` that end up in one list.
fn order_cards(base: &[Card], local: &[Card], server: &[Card], members: HashSet<&str>) -> Vec<CardId> {
    let local_ids: Vec<&str> = local.iter().map(|c| c.id.as_str()).collect();
    let server_ids: Vec<&str> = server.iter().map(|c| c.id.as_str()).collect();

    let local_wins = reordered(base, &local_ids) && !reordered(base, &server_ids);
    let (primary, other) = if local_wins {
        (&local_ids, &server_ids)
    } else {
        (&server_ids, &local_ids)
    };

    let mut order: Vec<CardId> = primary
        .iter()
        .filter(|id| members.contains(**id))
        .map(|id| id.to_string())
        .collect();

    // Cards only the other side placed here go back to that side's index.
    let mut missing: Vec<(usize, &str)> = members
        .iter()
        .filter(|id| !order.iter().any(|o| o == **id))
        .map(|id| (other.iter().position(|o| o == id).unwrap_or(usize::MAX), *id))
        .collect();
    missing.sort();
    for (at, id) in missing {
        let at = at.min(order.len());
        order.insert(at, id.to_string());
    }
    order
}

/// Whether `side` changed the relative order of the cards it shares with
/// `base`.
fn reordered(base: &[Card], side: &[&str]) -> bool {
    let side_set: HashSet<&str> = side.iter().copied().collect();
    let base_set: HashSet<&str> = base.iter().map(|c| c.id.as_str()).collect();
    let base_common = base.iter().map(|c| c.id.as_str()).filter(|id| side_set.contains(id));
    let side_common = side.iter().copied().filter(|id| base_set.contains(id));
    !base_common.eq(side_common)
}

fn merge_field<T>(field: &str, base: Option<&T>, local: &T, server: &T, diffs: &mut Vec<FieldDiff>) -> T
where
    T: PartialEq + Clone + Serialize,
{
    if local == server {
        return local.clone();
    }
    if base == Some(local) {
        return server.clone();
    }
    if base == Some(server) {
        return local.clone();
    }
    diffs.push(FieldDiff {
        field: field.to_string(),
        base: base
            .and_then(|b| serde_json::to_value(b).ok())
            .unwrap_or(Value::Null),
        local: serde_json::to_value(local).unwrap_or(Value::Null),
        server: serde_json::to_value(server).unwrap_or(Value::Null),
    });
    server.clone()
}

/// Field merge without conflict reporting; ties go to the server.
fn pick<'a, T: PartialEq>(base: &'a T, local: &'a T, server: &'a T) -> &'a T {
    if local != server && server == base {
        local
    } else {
        server
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{CardDraft, CardPatch, Mutation};
    use crate::store::reducer::{add_card, add_list, reduce};
    use chrono::Utc;
    use serde_json::json;

    fn ids(board: &Board, list_id: &str) -> Vec<String> {
        board.cards_in(list_id).iter().map(|c| c.id.clone()).collect()
    }

    fn apply(board: &Board, mutation: Mutation) -> Board {
        reduce(board, &mutation, Utc::now())
    }

    /// l1 = [a, b, c], l2 = []
    fn base() -> Board {
        let now = Utc::now();
        let mut board = add_list(&Board::new("Test"), "l1", "Todo", now);
        board = add_list(&board, "l2", "Done", now);
        for id in ["a", "b", "c"] {
            board = add_card(&board, "l1", &CardDraft::new("Original").with_id(id), None, now);
        }
        board
    }

    #[test]
    fn test_identical_sides_are_idempotent() {
        let base = base();
        let local = apply(&base, Mutation::update_card("l1", "a", CardPatch::title("A")));
        let local = apply(&local, Mutation::move_card("b", "l1", "l2", 0));
        let result = three_way_merge(&base, &local, &local);
        assert!(result.is_clean());
        assert_eq!(result.merged, local);
    }

    #[test]
    fn test_disjoint_field_changes_merge_cleanly() {
        let base = base();
        let local = apply(&base, Mutation::update_card("l1", "a", CardPatch::title("A")));
        let server = apply(&base, Mutation::update_card("l1", "a", CardPatch::description("B")));

        let result = three_way_merge(&base, &local, &server);
        assert!(result.is_clean());
        let (_, _, card) = result.merged.find_card("a").unwrap();
        assert_eq!(card.title, "A");
        assert_eq!(card.description, "B");
        assert_eq!(card.version, 2);
    }

    #[test]
    fn test_same_field_conflict_defaults_to_server() {
        let base = base();
        let local = apply(&base, Mutation::update_card("l1", "a", CardPatch::title("A")));
        let server = apply(&base, Mutation::update_card("l1", "a", CardPatch::title("B")));

        let result = three_way_merge(&base, &local, &server);
        assert_eq!(result.conflicts.len(), 1);
        let conflict = &result.conflicts[0];
        assert_eq!(conflict.entity_type, EntityType::Card);
        assert_eq!(conflict.entity_id, "a");
        assert_eq!(conflict.field_diffs.len(), 1);
        let diff = conflict.field("title").unwrap();
        assert_eq!(diff.base, json!("Original"));
        assert_eq!(diff.local, json!("A"));
        assert_eq!(diff.server, json!("B"));
        assert_eq!(result.merged.find_card("a").unwrap().2.title, "B");
    }

    #[test]
    fn test_one_sided_change_never_conflicts() {
        let base = base();
        let server = apply(&base, Mutation::update_card("l1", "b", CardPatch::title("Server")));
        let result = three_way_merge(&base, &base, &server);
        assert!(result.is_clean());
        assert_eq!(result.merged.find_card("b").unwrap().2.title, "Server");

        let local = apply(
            &base,
            Mutation::RenameList {
                list_id: "l2".into(),
                title: "Shipped".into(),
            },
        );
        let result = three_way_merge(&base, &local, &base);
        assert!(result.is_clean());
        assert_eq!(result.merged.find_list("l2").unwrap().title, "Shipped");
    }

    #[test]
    fn test_list_title_conflict() {
        let base = base();
        let rename = |title: &str| Mutation::RenameList {
            list_id: "l1".into(),
            title: title.into(),
        };
        let local = apply(&base, rename("Local"));
        let server = apply(&base, rename("Server"));
        let result = three_way_merge(&base, &local, &server);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].entity_type, EntityType::List);
        assert!(result.conflicts[0].list_id.is_none());
    }

    #[test]
    fn test_creations_on_both_sides_are_kept() {
        let base = base();
        let local = apply(&base, Mutation::add_card("l1", CardDraft::new("mine").with_id("x")));
        let server = apply(&base, Mutation::add_card("l2", CardDraft::new("theirs").with_id("y")));
        let result = three_way_merge(&base, &local, &server);
        assert!(result.is_clean());
        assert_eq!(ids(&result.merged, "l1"), vec!["a", "b", "c", "x"]);
        assert_eq!(ids(&result.merged, "l2"), vec!["y"]);
    }

    #[test]
    fn test_local_deletion_is_respected() {
        let base = base();
        let local = apply(
            &base,
            Mutation::DeleteCard {
                list_id: "l1".into(),
                card_id: "b".into(),
            },
        );
        let result = three_way_merge(&base, &local, &base);
        assert_eq!(ids(&result.merged, "l1"), vec!["a", "c"]);
    }

    #[test]
    fn test_deletion_wins_over_concurrent_edit() {
        let base = base();
        let delete = Mutation::DeleteCard {
            list_id: "l1".into(),
            card_id: "a".into(),
        };
        let edit = Mutation::update_card("l1", "a", CardPatch::title("edited"));

        // Local delete vs server edit.
        let result = three_way_merge(&base, &apply(&base, delete.clone()), &apply(&base, edit.clone()));
        assert!(result.is_clean());
        assert!(result.merged.find_card("a").is_none());

        // Server delete vs local edit.
        let result = three_way_merge(&base, &apply(&base, edit), &apply(&base, delete));
        assert!(result.is_clean());
        assert!(result.merged.find_card("a").is_none());
    }

    #[test]
    fn test_cards_of_deleted_list_are_dropped() {
        let base = base();
        let local = apply(&base, Mutation::add_card("l2", CardDraft::new("late").with_id("z")));
        let server = apply(&base, Mutation::DeleteList { list_id: "l2".into() });
        let result = three_way_merge(&base, &local, &server);
        assert!(result.merged.find_list("l2").is_none());
        assert!(result.merged.find_card("z").is_none());
        assert!(result.merged.invariant_violations().is_empty());
    }

    #[test]
    fn test_same_id_created_on_both_sides() {
        let base = base();
        let local = apply(&base, Mutation::add_card("l1", CardDraft::new("mine").with_id("x")));
        let server = apply(&base, Mutation::add_card("l1", CardDraft::new("theirs").with_id("x")));
        let result = three_way_merge(&base, &local, &server);
        assert_eq!(result.conflicts.len(), 1);
        let diff = result.conflicts[0].field("title").unwrap();
        assert_eq!(diff.base, Value::Null);
        assert_eq!(result.merged.card_count(), 4);
    }

    #[test]
    fn test_local_move_merges_with_server_edit() {
        let base = base();
        let local = apply(&base, Mutation::move_card("a", "l1", "l2", 0));
        let server = apply(&base, Mutation::update_card("l1", "a", CardPatch::title("edited")));
        let result = three_way_merge(&base, &local, &server);
        assert!(result.is_clean());
        assert_eq!(ids(&result.merged, "l1"), vec!["b", "c"]);
        assert_eq!(ids(&result.merged, "l2"), vec!["a"]);
        assert_eq!(result.merged.find_card("a").unwrap().2.title, "edited");
    }

    #[test]
    fn test_placement_conflict() {
        let mut base = base();
        base = add_list(&base, "l3", "Later", Utc::now());
        let local = apply(&base, Mutation::move_card("a", "l1", "l2", 0));
        let server = apply(&base, Mutation::move_card("a", "l1", "l3", 0));
        let result = three_way_merge(&base, &local, &server);
        assert_eq!(result.conflicts.len(), 1);
        let diff = result.conflicts[0].field(PLACEMENT_FIELD).unwrap();
        assert_eq!(diff.local, json!("l2"));
        assert_eq!(diff.server, json!("l3"));
        assert_eq!(ids(&result.merged, "l3"), vec!["a"]);
        assert!(result.merged.invariant_violations().is_empty());
    }

    #[test]
    fn test_one_sided_reorder_wins() {
        let base = base();
        let local = apply(
            &base,
            Mutation::ReorderCards {
                list_id: "l1".into(),
                from_index: 2,
                to_index: 0,
            },
        );
        let server = apply(&base, Mutation::add_card("l1", CardDraft::new("new").with_id("d")));
        let result = three_way_merge(&base, &local, &server);
        assert_eq!(ids(&result.merged, "l1"), vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn test_server_reorder_keeps_local_insert_position() {
        let base = base();
        let local = apply(
            &base,
            Mutation::AddCard {
                list_id: "l1".into(),
                card: CardDraft::new("new").with_id("x"),
                index: Some(1),
            },
        );
        let server = apply(
            &base,
            Mutation::ReorderCards {
                list_id: "l1".into(),
                from_index: 0,
                to_index: 2,
            },
        );
        let result = three_way_merge(&base, &local, &server);
        assert_eq!(ids(&result.merged, "l1"), vec!["b", "x", "c", "a"]);
    }

    #[test]
    fn test_versions_never_decrease() {
        let base = base();
        let mut local = base.clone();
        for title in ["1", "2", "3"] {
            local = apply(&local, Mutation::update_card("l1", "c", CardPatch::title(title)));
        }
        let server = apply(&base, Mutation::update_card("l1", "c", CardPatch::description("d")));
        let result = three_way_merge(&base, &local, &server);
        assert_eq!(result.merged.find_card("c").unwrap().2.version, 4);
    }
}
