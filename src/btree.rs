//! Copy-on-write B+tree operations: lookup, range scan, insert, remove.
//!
//! Grounded in the CoW tree walk of `nexuslite`'s (now-removed) `tree.rs`:
//! recursive descent that returns a tagged outcome instead of mutating
//! parent pointers in place, so every level decides independently whether
//! it needs to restage itself. Because node ids are stable across
//! copy-on-write rewrites (only their nodes-file offset changes — see
//! [`crate::txn::Transaction::get_node`]), an `Updated` outcome never needs
//! to touch the parent: the parent still points at the same child id, it
//! just resolves to new content next time it's read.

use std::collections::BTreeMap;
use std::ops::Bound;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::node::{InternalNode, Key, LeafNode, Node, NodeId, Separator};
use crate::txn::Transaction;

const MIN: usize = crate::ORDER / 2;

fn nth_key<K: Ord + Clone, V>(map: &BTreeMap<K, V>, idx: usize) -> K {
    map.keys().nth(idx).expect("split index within map bounds").clone()
}

/// Find the child that `key` must live under (§4.4). `NegInf` always
/// sorts below every real key, so the range below is never empty.
fn matching_child(internal: &InternalNode, key: &[u8]) -> NodeId {
    internal
        .records
        .range(..=Separator::Key(key.to_vec()))
        .next_back()
        .map(|(_, &id)| id)
        .unwrap_or_else(|| internal.records.values().next().copied().expect("internal node has no records"))
}

/// Walk from the root to the leaf that would hold `key`.
fn matching_leaf<V>(txn: &Transaction<'_, V>, key: &[u8]) -> Result<std::sync::Arc<Node<V>>, Error>
where
    V: Clone + Serialize + DeserializeOwned,
{
    let mut node = txn.get_node(txn.root_id())?;
    loop {
        match &*node {
            Node::Leaf(_) => return Ok(node),
            Node::Internal(internal) => {
                let child_id = matching_child(internal, key);
                node = txn.get_node(child_id)?;
            }
        }
    }
}

fn leftmost_leaf<V>(txn: &Transaction<'_, V>) -> Result<std::sync::Arc<Node<V>>, Error>
where
    V: Clone + Serialize + DeserializeOwned,
{
    let mut node = txn.get_node(txn.root_id())?;
    loop {
        match &*node {
            Node::Leaf(_) => return Ok(node),
            Node::Internal(internal) => {
                let (_, &child_id) = internal
                    .records
                    .iter()
                    .next()
                    .ok_or_else(|| Error::CorruptState { detail: "internal node has no records".to_string() })?;
                node = txn.get_node(child_id)?;
            }
        }
    }
}

/// Point lookup (§4.5).
///
/// # Errors
/// Returns an [`Error`] if a node on the path cannot be read.
pub fn get<V>(txn: &Transaction<'_, V>, key: &[u8]) -> Result<Option<V>, Error>
where
    V: Clone + Serialize + DeserializeOwned,
{
    let leaf = matching_leaf(txn, key)?;
    match &*leaf {
        Node::Leaf(l) => Ok(l.records.get(key).cloned()),
        Node::Internal(_) => unreachable!("matching_leaf always returns a leaf"),
    }
}

fn to_owned_bound(b: Bound<&[u8]>) -> Bound<Key> {
    match b {
        Bound::Included(k) => Bound::Included(k.to_vec()),
        Bound::Excluded(k) => Bound::Excluded(k.to_vec()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Range scan over `[start, end)` in key order, following leaf `next`
/// links (§4.6). Terminates when a leaf's `next` is `None` or when the
/// current leaf's last key already exceeds `end` — not on any bare
/// nil-check of the leaf contents, which is the bug this design
/// deliberately avoids.
///
/// # Errors
/// Returns an [`Error`] if a node on the scan path cannot be read, or if
/// the leaf chain is corrupt (a `next` id that resolves to an internal
/// node).
pub fn seek<V>(
    txn: &Transaction<'_, V>,
    start: Bound<&[u8]>,
    end: Bound<&[u8]>,
    limit: Option<usize>,
) -> Result<Vec<(Key, V)>, Error>
where
    V: Clone + Serialize + DeserializeOwned,
{
    let mut results = Vec::new();
    let mut leaf_id = match start {
        Bound::Unbounded => leftmost_leaf(txn)?.id(),
        Bound::Included(k) | Bound::Excluded(k) => matching_leaf(txn, k)?.id(),
    };
    let end_owned = to_owned_bound(end);
    let mut first = true;

    loop {
        let node = txn.get_node(leaf_id)?;
        let Node::Leaf(leaf) = &*node else {
            return Err(Error::CorruptState { detail: "leaf chain led to an internal node".to_string() });
        };
        let low = if first { to_owned_bound(start) } else { Bound::Unbounded };
        first = false;

        for (k, v) in leaf.records.range((low, end_owned.clone())) {
            if let Some(limit) = limit {
                if results.len() >= limit {
                    return Ok(results);
                }
            }
            results.push((k.clone(), v.clone()));
        }

        let leaf_exceeds_end = match &end_owned {
            Bound::Unbounded => false,
            Bound::Included(e) => leaf.records.keys().next_back().is_some_and(|k| k > e),
            Bound::Excluded(e) => leaf.records.keys().next_back().is_some_and(|k| k >= e),
        };
        if leaf_exceeds_end {
            return Ok(results);
        }
        if let Some(limit) = limit {
            if results.len() >= limit {
                return Ok(results);
            }
        }
        match leaf.next {
            Some(next_id) => leaf_id = next_id,
            None => return Ok(results),
        }
    }
}

enum InsertOutcome {
    Updated,
    Split { separator: Key, right: NodeId },
}

fn b_insert<V>(txn: &Transaction<'_, V>, node_id: NodeId, key: &[u8], value: V) -> Result<InsertOutcome, Error>
where
    V: Clone + Serialize + DeserializeOwned,
{
    let node = txn.get_node(node_id)?;
    match &*node {
        Node::Leaf(leaf) => {
            let mut records = leaf.records.clone();
            records.insert(key.to_vec(), value);
            if records.len() < crate::ORDER {
                txn.put_node(Node::Leaf(LeafNode { id: node_id, records, next: leaf.next }));
                Ok(InsertOutcome::Updated)
            } else {
                let mid = records.len().div_ceil(2);
                let boundary = nth_key(&records, mid);
                let right_records = records.split_off(&boundary);
                let right_id = txn.new_id();
                txn.put_node(Node::Leaf(LeafNode { id: right_id, records: right_records, next: leaf.next }));
                txn.put_node(Node::Leaf(LeafNode { id: node_id, records, next: Some(right_id) }));
                Ok(InsertOutcome::Split { separator: boundary, right: right_id })
            }
        }
        Node::Internal(internal) => {
            let child_id = matching_child(internal, key);
            match b_insert(txn, child_id, key, value)? {
                InsertOutcome::Updated => Ok(InsertOutcome::Updated),
                InsertOutcome::Split { separator, right } => {
                    let mut records = internal.records.clone();
                    records.insert(Separator::Key(separator), right);
                    if records.len() <= crate::ORDER {
                        txn.put_node(Node::Internal(InternalNode { id: node_id, records }));
                        Ok(InsertOutcome::Updated)
                    } else {
                        let mid = records.len().div_ceil(2);
                        let boundary = nth_key(&records, mid);
                        let mut right_records = records.split_off(&boundary);
                        let (promoted_sep, first_child) =
                            right_records.pop_first().expect("right half non-empty");
                        let promoted = match promoted_sep {
                            Separator::Key(k) => k,
                            Separator::NegInf => {
                                unreachable!("split boundary is never the node's own NegInf entry")
                            }
                        };
                        right_records.insert(Separator::NegInf, first_child);
                        let right_id = txn.new_id();
                        txn.put_node(Node::Internal(InternalNode { id: right_id, records: right_records }));
                        txn.put_node(Node::Internal(InternalNode { id: node_id, records }));
                        Ok(InsertOutcome::Split { separator: promoted, right: right_id })
                    }
                }
            }
        }
    }
}

/// Insert or overwrite `key -> value` (§4.7). Splits cascade up from the
/// leaf; if the root itself splits, a fresh internal root is created.
///
/// # Errors
/// Returns an [`Error`] if a node on the insert path cannot be read or
/// re-encoded.
pub fn insert<V>(txn: &Transaction<'_, V>, key: &[u8], value: V) -> Result<(), Error>
where
    V: Clone + Serialize + DeserializeOwned,
{
    let root_id = txn.root_id();
    match b_insert(txn, root_id, key, value)? {
        InsertOutcome::Updated => {}
        InsertOutcome::Split { separator, right } => {
            let new_root_id = txn.new_id();
            let mut records = BTreeMap::new();
            records.insert(Separator::NegInf, root_id);
            records.insert(Separator::Key(separator), right);
            txn.put_node(Node::Internal(InternalNode { id: new_root_id, records }));
            txn.set_root_id(new_root_id);
        }
    }
    Ok(())
}

enum RemoveOutcome {
    Updated,
    Underflow,
}

fn borrow_from_right_leaf<V: Clone>(child: &mut BTreeMap<Key, V>, sibling: &mut BTreeMap<Key, V>) -> Key {
    let (k, v) = sibling.pop_first().expect("sibling has a surplus record");
    child.insert(k, v);
    sibling.keys().next().expect("sibling non-empty after borrow").clone()
}

fn borrow_from_left_leaf<V: Clone>(child: &mut BTreeMap<Key, V>, sibling: &mut BTreeMap<Key, V>) -> Key {
    let (k, v) = sibling.pop_last().expect("sibling has a surplus record");
    let new_sep = k.clone();
    child.insert(k, v);
    new_sep
}

fn borrow_from_right_internal(
    left: &mut BTreeMap<Separator, NodeId>,
    right: &mut BTreeMap<Separator, NodeId>,
    sep_for_right: Key,
) -> Key {
    let (_, moved_child) = right.pop_first().expect("right sibling has a surplus record");
    left.insert(Separator::Key(sep_for_right), moved_child);
    let (new_first_sep, new_first_child) = right.iter().next().map(|(s, &c)| (s.clone(), c)).expect("right non-empty");
    let promoted = match new_first_sep {
        Separator::Key(k) => k,
        Separator::NegInf => unreachable!("only the first entry of a node is NegInf"),
    };
    right.remove(&Separator::Key(promoted.clone()));
    right.insert(Separator::NegInf, new_first_child);
    promoted
}

fn borrow_from_left_internal(
    left: &mut BTreeMap<Separator, NodeId>,
    right: &mut BTreeMap<Separator, NodeId>,
    sep_for_right: Key,
) -> Key {
    let (moved_sep, moved_child) = left.pop_last().expect("left sibling has a surplus record");
    let promoted = match moved_sep {
        Separator::Key(k) => k,
        Separator::NegInf => unreachable!("a surplus sibling keeps at least its own NegInf entry"),
    };
    let (_, old_first_child) = right.iter().next().map(|(s, &c)| (s.clone(), c)).expect("right non-empty");
    right.remove(&Separator::NegInf);
    right.insert(Separator::Key(sep_for_right), old_first_child);
    right.insert(Separator::NegInf, moved_child);
    promoted
}

fn merge_internal(
    mut left: BTreeMap<Separator, NodeId>,
    mut right: BTreeMap<Separator, NodeId>,
    sep_for_right: Key,
) -> BTreeMap<Separator, NodeId> {
    let (_, right_first_child) = right.pop_first().expect("right non-empty");
    left.insert(Separator::Key(sep_for_right), right_first_child);
    left.extend(right);
    left
}

fn b_remove<V>(txn: &Transaction<'_, V>, node_id: NodeId, key: &[u8], is_root: bool) -> Result<RemoveOutcome, Error>
where
    V: Clone + Serialize + DeserializeOwned,
{
    let node = txn.get_node(node_id)?;
    match &*node {
        Node::Leaf(leaf) => {
            if !leaf.records.contains_key(key) {
                // Idempotent: removing an absent key is a no-op, not an error.
                return Ok(RemoveOutcome::Updated);
            }
            let mut records = leaf.records.clone();
            records.remove(key);
            let new_len = records.len();
            txn.put_node(Node::Leaf(LeafNode { id: node_id, records, next: leaf.next }));
            Ok(if is_root || new_len >= MIN { RemoveOutcome::Updated } else { RemoveOutcome::Underflow })
        }
        Node::Internal(internal) => {
            let child_id = matching_child(internal, key);
            if matches!(b_remove(txn, child_id, key, false)?, RemoveOutcome::Updated) {
                return Ok(RemoveOutcome::Updated);
            }

            let mut records = internal.records.clone();
            let child_sep = records
                .iter()
                .find(|(_, &id)| id == child_id)
                .map(|(s, _)| s.clone())
                .expect("child present in parent");
            let left_neighbor = records.range(..child_sep.clone()).next_back().map(|(s, &id)| (s.clone(), id));
            let right_neighbor = records
                .range((Bound::Excluded(child_sep.clone()), Bound::Unbounded))
                .next()
                .map(|(s, &id)| (s.clone(), id));

            // §4.8's combine-children priority: redistribute from a surplus
            // right sibling first, else a surplus left sibling, else merge
            // with whichever sibling exists (right preferred). Surplus has
            // to be checked by actually reading each candidate sibling's
            // size, not inferred from which neighbor happens to exist.
            let right_surplus = match &right_neighbor {
                Some((_, r_id)) => txn.get_node(*r_id)?.len() > MIN,
                None => false,
            };
            let left_surplus = match &left_neighbor {
                Some((_, l_id)) => txn.get_node(*l_id)?.len() > MIN,
                None => false,
            };

            fn sep_key(sep: Separator) -> Key {
                match sep {
                    Separator::Key(k) => k,
                    Separator::NegInf => unreachable!("a non-leftmost node's separator is never NegInf"),
                }
            }

            let (left_id, right_id, right_sep_key, redistribute) = if right_surplus {
                let (r_sep, r_id) = right_neighbor.expect("right_surplus implies a right neighbor");
                (child_id, r_id, sep_key(r_sep), true)
            } else if left_surplus {
                let (_, l_id) = left_neighbor.expect("left_surplus implies a left neighbor");
                (l_id, child_id, sep_key(child_sep.clone()), true)
            } else if let Some((r_sep, r_id)) = right_neighbor {
                (child_id, r_id, sep_key(r_sep), false)
            } else if let Some((_, l_id)) = left_neighbor {
                (l_id, child_id, sep_key(child_sep.clone()), false)
            } else {
                txn.put_node(Node::Internal(InternalNode { id: node_id, records: records.clone() }));
                return Ok(if is_root || records.len() >= MIN {
                    RemoveOutcome::Updated
                } else {
                    RemoveOutcome::Underflow
                });
            };
            let child_is_left = left_id == child_id;

            let left_node = txn.get_node(left_id)?;
            let right_node = txn.get_node(right_id)?;

            match (&*left_node, &*right_node) {
                (Node::Leaf(left_leaf), Node::Leaf(right_leaf)) => {
                    let mut left_records = left_leaf.records.clone();
                    let mut right_records = right_leaf.records.clone();

                    if redistribute {
                        let new_sep = if child_is_left {
                            borrow_from_right_leaf(&mut left_records, &mut right_records)
                        } else {
                            borrow_from_left_leaf(&mut right_records, &mut left_records)
                        };
                        txn.put_node(Node::Leaf(LeafNode {
                            id: left_id,
                            records: left_records,
                            next: Some(right_id),
                        }));
                        txn.put_node(Node::Leaf(LeafNode {
                            id: right_id,
                            records: right_records,
                            next: right_leaf.next,
                        }));
                        records.remove(&Separator::Key(right_sep_key));
                        records.insert(Separator::Key(new_sep), right_id);
                        txn.put_node(Node::Internal(InternalNode { id: node_id, records }));
                        Ok(RemoveOutcome::Updated)
                    } else {
                        let merged_next = right_leaf.next;
                        left_records.extend(right_records);
                        txn.put_node(Node::Leaf(LeafNode { id: left_id, records: left_records, next: merged_next }));
                        txn.tombstone(right_id);
                        records.remove(&Separator::Key(right_sep_key));
                        let new_len = records.len();
                        txn.put_node(Node::Internal(InternalNode { id: node_id, records }));
                        Ok(if is_root || new_len >= MIN { RemoveOutcome::Updated } else { RemoveOutcome::Underflow })
                    }
                }
                (Node::Internal(_), Node::Internal(_)) => {
                    let mut left_records = match &*left_node {
                        Node::Internal(i) => i.records.clone(),
                        Node::Leaf(_) => unreachable!(),
                    };
                    let mut right_records = match &*right_node {
                        Node::Internal(i) => i.records.clone(),
                        Node::Leaf(_) => unreachable!(),
                    };
                    if redistribute {
                        let new_sep = if child_is_left {
                            borrow_from_right_internal(&mut left_records, &mut right_records, right_sep_key.clone())
                        } else {
                            borrow_from_left_internal(&mut left_records, &mut right_records, right_sep_key.clone())
                        };
                        txn.put_node(Node::Internal(InternalNode { id: left_id, records: left_records }));
                        txn.put_node(Node::Internal(InternalNode { id: right_id, records: right_records }));
                        records.remove(&Separator::Key(right_sep_key));
                        records.insert(Separator::Key(new_sep), right_id);
                        txn.put_node(Node::Internal(InternalNode { id: node_id, records }));
                        Ok(RemoveOutcome::Updated)
                    } else {
                        let merged = merge_internal(left_records, right_records, right_sep_key.clone());
                        txn.put_node(Node::Internal(InternalNode { id: left_id, records: merged }));
                        txn.tombstone(right_id);
                        records.remove(&Separator::Key(right_sep_key));
                        let new_len = records.len();
                        txn.put_node(Node::Internal(InternalNode { id: node_id, records }));
                        Ok(if is_root || new_len >= MIN { RemoveOutcome::Updated } else { RemoveOutcome::Underflow })
                    }
                }
                _ => Err(Error::CorruptState { detail: "sibling leaf/internal kind mismatch".to_string() }),
            }
        }
    }
}

/// Remove `key` if present (§4.8). Removing an absent key is a no-op, not
/// an error. Collapses the root one level if it becomes a single-child
/// internal node.
///
/// # Errors
/// Returns an [`Error`] if a node on the remove path cannot be read or
/// re-encoded.
pub fn remove<V>(txn: &Transaction<'_, V>, key: &[u8]) -> Result<(), Error>
where
    V: Clone + Serialize + DeserializeOwned,
{
    let root_id = txn.root_id();
    b_remove(txn, root_id, key, true)?;
    let root = txn.get_node(txn.root_id())?;
    if let Node::Internal(internal) = &*root {
        if internal.records.len() == 1 {
            let (_, &only_child) = internal.records.iter().next().expect("len == 1");
            let old_root_id = txn.root_id();
            txn.tombstone(old_root_id);
            txn.set_root_id(only_child);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OpenOptions;
    use crate::Database;

    fn open_tmp() -> (tempfile::TempDir, Database<i64>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = OpenOptions::new().open(dir.path()).expect("open");
        (dir, db)
    }

    #[test]
    fn get_on_empty_database_is_none() {
        let (_dir, db) = open_tmp();
        let txn = db.read_transaction();
        assert_eq!(get(&txn, b"missing").expect("get"), None);
    }

    #[test]
    fn insert_then_get_round_trips() {
        let (_dir, db) = open_tmp();
        let txn = db.write_transaction();
        insert(&txn, b"a", 1).expect("insert a");
        insert(&txn, b"b", 2).expect("insert b");
        txn.commit().expect("commit");

        let txn = db.read_transaction();
        assert_eq!(get(&txn, b"a").expect("get a"), Some(1));
        assert_eq!(get(&txn, b"b").expect("get b"), Some(2));
        assert_eq!(get(&txn, b"c").expect("get c"), None);
    }

    #[test]
    fn insert_past_node_capacity_splits_and_stays_queryable() {
        let (_dir, db) = open_tmp();
        let txn = db.write_transaction();
        for i in 0..200u32 {
            insert(&txn, &i.to_be_bytes(), i64::from(i)).expect("insert");
        }
        txn.commit().expect("commit");

        let txn = db.read_transaction();
        for i in 0..200u32 {
            assert_eq!(get(&txn, &i.to_be_bytes()).expect("get"), Some(i64::from(i)));
        }
    }

    #[test]
    fn seek_returns_keys_in_order_within_bounds() {
        let (_dir, db) = open_tmp();
        let txn = db.write_transaction();
        for i in 0..50u32 {
            insert(&txn, &i.to_be_bytes(), i64::from(i)).expect("insert");
        }
        txn.commit().expect("commit");

        let txn = db.read_transaction();
        let lo = 10u32.to_be_bytes();
        let hi = 20u32.to_be_bytes();
        let results = seek(&txn, Bound::Included(&lo), Bound::Excluded(&hi), None).expect("seek");
        assert_eq!(results.len(), 10);
        for (idx, (k, v)) in results.iter().enumerate() {
            let expected = 10 + u32::try_from(idx).expect("small index");
            assert_eq!(k, &expected.to_be_bytes().to_vec());
            assert_eq!(*v, i64::from(expected));
        }
    }

    #[test]
    fn seek_respects_limit() {
        let (_dir, db) = open_tmp();
        let txn = db.write_transaction();
        for i in 0..50u32 {
            insert(&txn, &i.to_be_bytes(), i64::from(i)).expect("insert");
        }
        txn.commit().expect("commit");

        let txn = db.read_transaction();
        let results = seek(&txn, Bound::Unbounded, Bound::Unbounded, Some(5)).expect("seek");
        assert_eq!(results.len(), 5);
    }

    #[test]
    fn remove_then_get_is_none() {
        let (_dir, db) = open_tmp();
        let txn = db.write_transaction();
        insert(&txn, b"a", 1).expect("insert");
        txn.commit().expect("commit");

        let txn = db.write_transaction();
        remove(&txn, b"a").expect("remove");
        txn.commit().expect("commit");

        let txn = db.read_transaction();
        assert_eq!(get(&txn, b"a").expect("get"), None);
    }

    #[test]
    fn remove_of_absent_key_is_a_no_op() {
        let (_dir, db) = open_tmp();
        let txn = db.write_transaction();
        insert(&txn, b"a", 1).expect("insert");
        txn.commit().expect("commit");

        let txn = db.write_transaction();
        remove(&txn, b"does-not-exist").expect("remove no-op");
        txn.commit().expect("commit");

        let txn = db.read_transaction();
        assert_eq!(get(&txn, b"a").expect("get"), Some(1));
    }

    #[test]
    fn insert_then_remove_many_keeps_remaining_keys_queryable() {
        let (_dir, db) = open_tmp();
        let txn = db.write_transaction();
        for i in 0..200u32 {
            insert(&txn, &i.to_be_bytes(), i64::from(i)).expect("insert");
        }
        txn.commit().expect("commit");

        let txn = db.write_transaction();
        for i in (0..200u32).step_by(2) {
            remove(&txn, &i.to_be_bytes()).expect("remove");
        }
        txn.commit().expect("commit");

        let txn = db.read_transaction();
        for i in 0..200u32 {
            let expected = if i % 2 == 0 { None } else { Some(i64::from(i)) };
            assert_eq!(get(&txn, &i.to_be_bytes()).expect("get"), expected);
        }
    }
}
