//! Bidirectional id table between live node handles and wire ids.
//!
//! Invariants:
//! - Ids are handed out monotonically and are never bound to a second node
//!   while the table lives (until `reset`).
//! - `id -> node` and `node -> id` agree for every tracked node.
//! - Ignored nodes hold no id and never resolve through `id_of`.
//! - The table stores handles only; it never keeps a node alive.

use core_types::NodeId;
use std::collections::HashMap;
use std::hash::Hash;

use crate::error::MirrorError;

/// What the table knows about one node handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Tracked(NodeId),
    /// Deliberately not tracked; must never appear in records.
    Ignored,
}

/// Target of an id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Binding<H> {
    Local(H),
    /// Id reserved for a node that lives in another context.
    Reserved,
}

#[derive(Clone, Debug)]
pub struct Mirror<H> {
    id_to_node: HashMap<NodeId, Binding<H>>,
    node_to_id: HashMap<H, Slot>,
    next_id: NodeId,
}

impl<H> Default for Mirror<H> {
    fn default() -> Self {
        Self {
            id_to_node: HashMap::new(),
            node_to_id: HashMap::new(),
            next_id: NodeId::FIRST,
        }
    }
}

impl<H: Copy + Eq + Hash> Mirror<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `node`, assigning the next unused one if it has none.
    pub fn allocate(&mut self, node: H) -> Result<NodeId, MirrorError> {
        if let Some(Slot::Tracked(id)) = self.node_to_id.get(&node).copied() {
            return match self.id_to_node.get(&id) {
                Some(Binding::Local(bound)) if *bound == node => Ok(id),
                _ => {
                    debug_assert!(false, "mirror maps a node to id {id:?} that is bound elsewhere");
                    Err(MirrorError::Inconsistent { id })
                }
            };
        }
        let id = self.take_id()?;
        self.id_to_node.insert(id, Binding::Local(node));
        self.node_to_id.insert(node, Slot::Tracked(id));
        Ok(id)
    }

    /// Hand out an id that is bound to no local node.
    pub fn reserve(&mut self) -> Result<NodeId, MirrorError> {
        let id = self.take_id()?;
        self.id_to_node.insert(id, Binding::Reserved);
        Ok(id)
    }

    fn take_id(&mut self) -> Result<NodeId, MirrorError> {
        let id = self.next_id;
        if self.id_to_node.contains_key(&id) {
            debug_assert!(false, "id counter reached a bound id {id:?}");
            return Err(MirrorError::DuplicateId(id));
        }
        self.next_id = id.checked_next().ok_or(MirrorError::Exhausted)?;
        Ok(id)
    }

    pub fn id_of(&self, node: &H) -> Option<NodeId> {
        match self.node_to_id.get(node) {
            Some(Slot::Tracked(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn slot(&self, node: &H) -> Option<Slot> {
        self.node_to_id.get(node).copied()
    }

    pub fn node_of(&self, id: NodeId) -> Option<H> {
        match self.id_to_node.get(&id) {
            Some(Binding::Local(node)) => Some(*node),
            _ => None,
        }
    }

    /// True for local and reserved ids alike.
    pub fn has(&self, id: NodeId) -> bool {
        self.id_to_node.contains_key(&id)
    }

    pub fn is_ignored(&self, node: &H) -> bool {
        matches!(self.node_to_id.get(node), Some(Slot::Ignored))
    }

    /// Mark `node` as not tracked, dropping any id it held.
    pub fn mark_ignored(&mut self, node: H) {
        if let Some(Slot::Tracked(id)) = self.node_to_id.insert(node, Slot::Ignored) {
            self.id_to_node.remove(&id);
        }
    }

    /// Forget `node` in both directions. No-op for unknown nodes.
    pub fn remove(&mut self, node: &H) -> Option<NodeId> {
        match self.node_to_id.remove(node)? {
            Slot::Tracked(id) => {
                self.id_to_node.remove(&id);
                Some(id)
            }
            Slot::Ignored => None,
        }
    }

    /// Release a reserved id. Ids bound to local nodes are left alone.
    pub fn release(&mut self, id: NodeId) -> bool {
        if matches!(self.id_to_node.get(&id), Some(Binding::Reserved)) {
            self.id_to_node.remove(&id);
            return true;
        }
        false
    }

    /// Remove every local entry whose handle matches `pred`, returning the
    /// retired tracked pairs.
    pub fn retire_where(&mut self, mut pred: impl FnMut(&H) -> bool) -> Vec<(H, NodeId)> {
        let mut retired = Vec::new();
        self.node_to_id.retain(|node, slot| {
            if !pred(node) {
                return true;
            }
            if let Slot::Tracked(id) = slot {
                retired.push((*node, *id));
            }
            false
        });
        for (_, id) in &retired {
            self.id_to_node.remove(id);
        }
        retired
    }

    pub fn reset(&mut self) {
        self.id_to_node.clear();
        self.node_to_id.clear();
        self.next_id = NodeId::FIRST;
    }

    /// Number of bound ids, local and reserved.
    pub fn len(&self) -> usize {
        self.id_to_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_node.is_empty() && self.node_to_id.is_empty()
    }

    pub fn ignored_len(&self) -> usize {
        self.node_to_id
            .values()
            .filter(|slot| matches!(slot, Slot::Ignored))
            .count()
    }

    /// Entries across both directions; zero means nothing is retained.
    pub fn entry_count(&self) -> usize {
        self.id_to_node.len() + self.node_to_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_is_idempotent_and_monotonic() {
        let mut m = Mirror::new();
        let a = m.allocate('a').unwrap();
        let b = m.allocate('b').unwrap();
        assert_eq!(m.allocate('a').unwrap(), a);
        assert!(b > a);
        assert_eq!(m.node_of(a), Some('a'));
        assert_eq!(m.id_of(&'b'), Some(b));
    }

    #[test]
    fn id_space_exhaustion_is_an_error() {
        let mut m = Mirror::new();
        m.next_id = NodeId(u32::MAX - 1);
        assert_eq!(m.allocate('a'), Ok(NodeId(u32::MAX - 1)));
        assert_eq!(m.allocate('b'), Err(MirrorError::Exhausted));
        assert_eq!(m.reserve(), Err(MirrorError::Exhausted));
        assert_eq!(m.id_of(&'b'), None);
        assert_eq!(m.node_of(NodeId(u32::MAX - 1)), Some('a'));
    }

    #[test]
    fn removed_ids_are_never_reused() {
        let mut m = Mirror::new();
        let a = m.allocate('a').unwrap();
        assert_eq!(m.remove(&'a'), Some(a));
        assert_eq!(m.remove(&'a'), None);
        let again = m.allocate('a').unwrap();
        assert_ne!(again, a);
        assert_eq!(m.node_of(a), None);
    }

    #[test]
    fn ignored_nodes_hold_no_id() {
        let mut m = Mirror::new();
        let a = m.allocate('a').unwrap();
        m.mark_ignored('a');
        assert!(m.is_ignored(&'a'));
        assert_eq!(m.id_of(&'a'), None);
        assert_eq!(m.node_of(a), None);
        assert_eq!(m.slot(&'a'), Some(Slot::Ignored));
        assert_eq!(m.ignored_len(), 1);
    }

    #[test]
    fn reserved_ids_resolve_to_no_node() {
        let mut m: Mirror<char> = Mirror::new();
        let r = m.reserve().unwrap();
        assert!(m.has(r));
        assert_eq!(m.node_of(r), None);
        assert!(m.release(r));
        assert!(!m.has(r));
    }

    #[test]
    fn release_leaves_local_ids_alone() {
        let mut m = Mirror::new();
        let a = m.allocate('a').unwrap();
        assert!(!m.release(a));
        assert_eq!(m.node_of(a), Some('a'));
    }

    #[test]
    fn retire_where_drops_both_directions() {
        let mut m = Mirror::new();
        m.allocate(1u32).unwrap();
        m.allocate(2u32).unwrap();
        m.mark_ignored(3u32);
        let mut retired = m.retire_where(|n| *n >= 2);
        retired.sort();
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].0, 2);
        assert!(!m.is_ignored(&3));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn reset_clears_everything() {
        let mut m = Mirror::new();
        m.allocate('a').unwrap();
        m.mark_ignored('b');
        m.reserve().unwrap();
        m.reset();
        assert!(m.is_empty());
        assert_eq!(m.entry_count(), 0);
        assert_eq!(m.allocate('z').unwrap(), NodeId::FIRST);
    }
}
