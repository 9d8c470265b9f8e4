use std::collections::BTreeSet;

use nohash_hasher::IntMap;
use smallvec::SmallVec;

use igt_types::ObjectId;

use crate::SpatialModel;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ForestError {
    #[error("{0:?} is not part of the frame forest")]
    UnknownNode(ObjectId),
}

/// A parent pointer that was dropped because it closed a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BrokenCycle {
    pub node: ObjectId,
    pub parent: ObjectId,
}

/// The parent/child tree over all data objects' current parent spaces.
///
/// The reference frame is the implicit root above every object without a parent.
/// The forest is a snapshot: rebuild it after any change instead of updating it.
///
/// Parent pointers to unknown objects are treated as "no parent".
/// So are pointers that would close a cycle; those are reported in [`Self::broken_cycles`].
#[derive(Clone, Debug, Default)]
pub struct FrameForest {
    parents: IntMap<ObjectId, Option<ObjectId>>,

    /// Sorted.
    children: IntMap<ObjectId, SmallVec<[ObjectId; 4]>>,

    broken_cycles: Vec<BrokenCycle>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

impl FrameForest {
    /// Builds the forest from `(id, parent)` pairs.
    pub fn new(parents: impl IntoIterator<Item = (ObjectId, Option<ObjectId>)>) -> Self {
        puffin::profile_function!();

        let mut parents: IntMap<ObjectId, Option<ObjectId>> = parents.into_iter().collect();

        let ids: BTreeSet<ObjectId> = parents.keys().copied().collect();
        for id in &ids {
            if let Some(Some(parent)) = parents.get(id)
                && !parents.contains_key(parent)
            {
                igt_log::debug!("{id:?} has unknown parent {parent:?}, treating it as a root");
                parents.insert(*id, None);
            }
        }

        let broken_cycles = break_cycles(&ids, &mut parents);

        let mut children: IntMap<ObjectId, SmallVec<[ObjectId; 4]>> = IntMap::default();
        for id in &ids {
            if let Some(Some(parent)) = parents.get(id) {
                // `ids` is sorted, so every child list ends up sorted too.
                children.entry(*parent).or_default().push(*id);
            }
        }

        Self {
            parents,
            children,
            broken_cycles,
        }
    }

    /// Builds the forest from the current parents of all objects in `model`.
    pub fn from_model(model: &SpatialModel) -> Self {
        Self::new(model.parent_snapshot())
    }

    #[inline]
    pub fn contains(&self, node: ObjectId) -> bool {
        self.parents.contains_key(&node)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Parent pointers that had to be dropped to keep the forest acyclic.
    #[inline]
    pub fn broken_cycles(&self) -> &[BrokenCycle] {
        &self.broken_cycles
    }

    /// `None` means the node hangs directly below the reference frame.
    pub fn parent_of(&self, node: ObjectId) -> Result<Option<ObjectId>, ForestError> {
        self.parents
            .get(&node)
            .copied()
            .ok_or(ForestError::UnknownNode(node))
    }

    /// Direct children, ascending.
    pub fn children_of(&self, node: ObjectId) -> &[ObjectId] {
        self.children
            .get(&node)
            .map(|children| children.as_slice())
            .unwrap_or_default()
    }

    /// All nodes directly below the reference frame, ascending.
    pub fn roots(&self) -> Vec<ObjectId> {
        let mut roots: Vec<ObjectId> = self
            .parents
            .iter()
            .filter_map(|(id, parent)| parent.is_none().then_some(*id))
            .collect();
        roots.sort();
        roots
    }

    /// Walks up to the root of the node's tree.
    pub fn oldest_ancestor(&self, node: ObjectId) -> Result<ObjectId, ForestError> {
        let mut current = node;
        while let Some(parent) = self.parent_of(current)? {
            current = parent;
        }
        Ok(current)
    }

    /// Is `ancestor` a strict ancestor of `node`?
    pub fn is_ancestor_of(&self, ancestor: ObjectId, node: ObjectId) -> Result<bool, ForestError> {
        let mut current = self.parent_of(node)?;
        while let Some(parent) = current {
            if parent == ancestor {
                return Ok(true);
            }
            current = self.parent_of(parent)?;
        }
        Ok(false)
    }

    /// The highest node on the path from `target` to its root that is not shared with `reference`.
    ///
    /// Walks up from `target` and stops right before the first node that is `reference`
    /// or one of its ancestors. If the two are in different trees this is the root of
    /// `target`'s tree. Everything below the returned node moves together with `target`.
    pub fn oldest_ancestor_not_common_to_ref(
        &self,
        target: ObjectId,
        reference: ObjectId,
    ) -> Result<ObjectId, ForestError> {
        if !self.contains(reference) {
            return Err(ForestError::UnknownNode(reference));
        }

        let mut current = target;
        while let Some(parent) = self.parent_of(current)? {
            if parent == reference || self.is_ancestor_of(parent, reference)? {
                break;
            }
            current = parent;
        }
        Ok(current)
    }

    /// `node` and everything below it, ascending.
    pub fn data_in_subtree(&self, node: ObjectId) -> Result<BTreeSet<ObjectId>, ForestError> {
        if !self.contains(node) {
            return Err(ForestError::UnknownNode(node));
        }

        let mut subtree = BTreeSet::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if subtree.insert(current) {
                stack.extend_from_slice(self.children_of(current));
            }
        }
        Ok(subtree)
    }

    /// Are the two nodes in the same tree?
    pub fn are_connected(&self, a: ObjectId, b: ObjectId) -> Result<bool, ForestError> {
        Ok(self.oldest_ancestor(a)? == self.oldest_ancestor(b)?)
    }
}

/// Drops the parent pointer that closes each cycle, visiting nodes in ascending order.
fn break_cycles(
    ids: &BTreeSet<ObjectId>,
    parents: &mut IntMap<ObjectId, Option<ObjectId>>,
) -> Vec<BrokenCycle> {
    let mut broken = Vec::new();
    let mut visits: IntMap<ObjectId, Visit> = IntMap::default();

    for &start in ids {
        let mut path = Vec::new();
        let mut current = Some(start);

        while let Some(node) = current {
            match visits.get(&node) {
                Some(Visit::Done) => break,
                Some(Visit::InProgress) => {
                    // `node` is on the current path, so the last node on the path points back into it.
                    if let Some(&last) = path.last() {
                        igt_log::warn_once!(
                            "Parent space of {last:?} ({node:?}) forms a cycle, treating it as a root"
                        );
                        parents.insert(last, None);
                        broken.push(BrokenCycle { node: last, parent: node });
                    }
                    break;
                }
                None => {
                    visits.insert(node, Visit::InProgress);
                    path.push(node);
                    current = parents.get(&node).copied().flatten();
                }
            }
        }

        for node in path {
            visits.insert(node, Visit::Done);
        }
    }

    broken
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(id: u32) -> ObjectId {
        ObjectId::new(id)
    }

    /// 1 ← 2 ← 3, 2 ← 4, and a separate 5 ← 6.
    fn sample() -> FrameForest {
        FrameForest::new([
            (id(1), None),
            (id(2), Some(id(1))),
            (id(3), Some(id(2))),
            (id(4), Some(id(2))),
            (id(5), None),
            (id(6), Some(id(5))),
        ])
    }

    #[test]
    fn structure() {
        let forest = sample();
        assert_eq!(forest.roots(), vec![id(1), id(5)]);
        assert_eq!(forest.children_of(id(2)), &[id(3), id(4)]);
        assert_eq!(forest.children_of(id(3)), &[] as &[ObjectId]);
        assert_eq!(forest.parent_of(id(6)), Ok(Some(id(5))));
        assert_eq!(forest.parent_of(id(9)), Err(ForestError::UnknownNode(id(9))));
        assert!(forest.broken_cycles().is_empty());
    }

    #[test]
    fn ancestry() {
        let forest = sample();
        assert_eq!(forest.oldest_ancestor(id(4)), Ok(id(1)));
        assert_eq!(forest.oldest_ancestor(id(5)), Ok(id(5)));
        assert_eq!(forest.is_ancestor_of(id(1), id(3)), Ok(true));
        assert_eq!(forest.is_ancestor_of(id(3), id(3)), Ok(false));
        assert_eq!(forest.is_ancestor_of(id(5), id(3)), Ok(false));
        assert_eq!(forest.are_connected(id(3), id(4)), Ok(true));
        assert_eq!(forest.are_connected(id(3), id(6)), Ok(false));
    }

    #[test]
    fn not_common_to_ref() {
        let forest = sample();

        // Siblings share everything above them.
        assert_eq!(forest.oldest_ancestor_not_common_to_ref(id(3), id(4)), Ok(id(3)));
        // Separate trees: the whole tree of the target moves.
        assert_eq!(forest.oldest_ancestor_not_common_to_ref(id(3), id(6)), Ok(id(1)));
        // Registering a child against its own parent moves only the child.
        assert_eq!(forest.oldest_ancestor_not_common_to_ref(id(3), id(2)), Ok(id(3)));
        assert_eq!(
            forest.oldest_ancestor_not_common_to_ref(id(2), id(9)),
            Err(ForestError::UnknownNode(id(9)))
        );
    }

    #[test]
    fn subtrees() {
        let forest = sample();
        assert_eq!(
            forest.data_in_subtree(id(2)),
            Ok([id(2), id(3), id(4)].into_iter().collect())
        );
        assert_eq!(forest.data_in_subtree(id(6)), Ok([id(6)].into_iter().collect()));
        assert_eq!(forest.data_in_subtree(id(1)).map(|subtree| subtree.len()), Ok(4));
        assert_eq!(forest.data_in_subtree(id(9)), Err(ForestError::UnknownNode(id(9))));
    }

    #[test]
    fn cycles_are_broken() {
        let forest = FrameForest::new([
            (id(1), Some(id(3))),
            (id(2), Some(id(1))),
            (id(3), Some(id(2))),
            (id(4), Some(id(4))),
            (id(5), Some(id(1))),
        ]);

        assert_eq!(
            forest.broken_cycles(),
            &[
                BrokenCycle {
                    node: id(2),
                    parent: id(1)
                },
                BrokenCycle {
                    node: id(4),
                    parent: id(4)
                },
            ]
        );
        assert_eq!(forest.roots(), vec![id(2), id(4)]);
        assert_eq!(forest.oldest_ancestor(id(5)), Ok(id(2)));
    }

    #[test]
    fn unknown_parents_become_roots() {
        let forest = FrameForest::new([(id(1), Some(id(42))), (id(2), Some(id(1)))]);
        assert_eq!(forest.roots(), vec![id(1)]);
        assert!(forest.broken_cycles().is_empty());
    }
}
