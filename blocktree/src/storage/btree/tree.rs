//! Disk-resident B-tree over integer keys.
//!
//! Classic single-pass algorithms (minimum degree `t = MIN_DEGREE`):
//! - Insert splits every full node on the way down, so the leaf that
//!   receives the key always has room.
//! - Delete tops up every minimal child (borrow from a sibling, or merge
//!   with one) before descending into it, so the node a key is removed
//!   from never drops below `t - 1` keys.
//!
//! Nodes are addressed by block index and fetched through the [`Pager`];
//! every mutated node is written back before the operation returns.

use crate::storage::block::BlockId;
use crate::storage::btree::node::{Key, MAX_KEYS, MIN_DEGREE, Node};
use crate::storage::device::BlockDevice;
use crate::storage::error::StoreError;
use crate::storage::pager::Pager;

/// Result of [`BTree::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The key was added.
    Inserted,
    /// The key was already present; nothing changed.
    Duplicate,
}

/// Result of [`BTree::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The key was present and has been removed.
    Removed,
    /// The key was absent. The key set is unchanged.
    NotFound,
}

/// Result of [`BTree::search`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub found: bool,
    /// Blocks visited from the root down, for diagnostics.
    pub path: Vec<BlockId>,
}

/// One node as seen by a breadth-first walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelEntry {
    pub block_id: BlockId,
    pub keys: Vec<Key>,
}

/// Summary numbers for a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    /// Number of levels; 0 for an empty tree.
    pub height: usize,
    pub key_count: usize,
    pub node_count: usize,
    pub total_blocks: u64,
    /// Allocated blocks including the superblock.
    pub allocated_blocks: u64,
}

/// A B-tree operating on the nodes of a pager.
pub struct BTree<'a, D: BlockDevice> {
    pub(super) pager: &'a mut Pager<D>,
}

impl<'a, D: BlockDevice> BTree<'a, D> {
    pub const fn new(pager: &'a mut Pager<D>) -> Self {
        Self { pager }
    }

    #[must_use]
    pub const fn pager(&self) -> &Pager<D> {
        &*self.pager
    }

    /// Look up a key, recording the blocks visited.
    pub fn search(&mut self, key: Key) -> Result<SearchResult, StoreError> {
        let mut path = Vec::new();
        let Some(mut block_id) = self.pager.root() else {
            return Ok(SearchResult { found: false, path });
        };

        loop {
            let node = self.pager.load(block_id)?;
            path.push(block_id);

            let idx = node.lower_bound(key);
            if node.has_key_at(idx, key) {
                return Ok(SearchResult { found: true, path });
            }
            if node.is_leaf {
                return Ok(SearchResult { found: false, path });
            }
            block_id = child_at(&node, idx)?;
        }
    }

    /// Insert a key.
    ///
    /// This is the only duplicate check: the descent below trusts it.
    pub fn insert(&mut self, key: Key) -> Result<InsertOutcome, StoreError> {
        if self.search(key)?.found {
            return Ok(InsertOutcome::Duplicate);
        }

        let root_id = match self.pager.root() {
            Some(root_id) => root_id,
            None => {
                let mut leaf = Node::new_leaf();
                let root_id = self.pager.allocate(&mut leaf)?;
                self.pager.set_root(Some(root_id))?;
                root_id
            }
        };

        let mut root = self.pager.load(root_id)?;
        if root.is_full() {
            let mut new_root = Node::new_internal();
            new_root.children.push(root_id);
            let new_root_id = self.pager.allocate(&mut new_root)?;
            self.split_child(&mut new_root, 0, root)?;
            self.pager.set_root(Some(new_root_id))?;
            tracing::debug!(old_root = root_id, new_root = new_root_id, "split root");
            root = new_root;
        }

        self.insert_non_full(root, key)?;
        Ok(InsertOutcome::Inserted)
    }

    /// Descend from a node with room, splitting full children ahead of the descent.
    fn insert_non_full(&mut self, mut node: Node, key: Key) -> Result<(), StoreError> {
        loop {
            let mut idx = node.lower_bound(key);

            if node.is_leaf {
                node.keys.insert(idx, key);
                return self.pager.write(&node);
            }

            let child = self.pager.load(child_at(&node, idx)?)?;
            node = if child.is_full() {
                self.split_child(&mut node, idx, child)?;
                if node.keys[idx] <= key {
                    idx += 1;
                }
                self.pager.load(child_at(&node, idx)?)?
            } else {
                child
            };
        }
    }

    /// Split the full child at `parent.children[index]`.
    ///
    /// The child keeps its lower `t - 1` keys, a new right sibling takes the
    /// upper `t - 1` keys (and upper `t` children), and the median moves up
    /// into `parent` at `index`.
    fn split_child(
        &mut self,
        parent: &mut Node,
        index: usize,
        mut child: Node,
    ) -> Result<(), StoreError> {
        if child.keys.len() != MAX_KEYS {
            return Err(StoreError::Corruption(format!(
                "split of block {:?} with {} keys",
                child.disk_index,
                child.keys.len()
            )));
        }

        let mut sibling = if child.is_leaf {
            Node::new_leaf()
        } else {
            Node::new_internal()
        };
        sibling.keys = child.keys.split_off(MIN_DEGREE);
        if !child.is_leaf {
            sibling.children = child.children.split_off(MIN_DEGREE);
        }
        let median = child.keys.pop().ok_or_else(|| {
            StoreError::Corruption("split child lost its median".to_string())
        })?;

        let sibling_id = self.pager.allocate(&mut sibling)?;
        parent.keys.insert(index, median);
        parent.children.insert(index + 1, sibling_id);

        self.pager.write(&child)?;
        self.pager.write(parent)?;

        tracing::debug!(
            child = ?child.disk_index,
            sibling = sibling_id,
            parent = ?parent.disk_index,
            median,
            "split node"
        );
        Ok(())
    }

    /// Remove a key. Removing an absent key is accepted silently.
    pub fn remove(&mut self, key: Key) -> Result<RemoveOutcome, StoreError> {
        let Some(root_id) = self.pager.root() else {
            return Ok(RemoveOutcome::NotFound);
        };

        let root = self.pager.load(root_id)?;
        let removed = self.remove_from(root, key)?;

        // Merges below the root may have drained it, even for an absent key
        let root = self.pager.load(root_id)?;
        if root.keys.is_empty() {
            if root.is_leaf {
                self.pager.set_root(None)?;
            } else {
                self.pager.set_root(Some(child_at(&root, 0)?))?;
            }
            self.pager.deallocate(root_id)?;
            tracing::debug!(old_root = root_id, new_root = ?self.pager.root(), "root shrank");
        }

        Ok(if removed {
            RemoveOutcome::Removed
        } else {
            RemoveOutcome::NotFound
        })
    }

    /// Delete `key` from the subtree rooted at `node`.
    ///
    /// `node` is either the root or a node with at least `t` keys.
    fn remove_from(&mut self, mut node: Node, key: Key) -> Result<bool, StoreError> {
        let mut target = key;

        loop {
            let idx = node.lower_bound(target);

            if node.has_key_at(idx, target) {
                if node.is_leaf {
                    node.keys.remove(idx);
                    self.pager.write(&node)?;
                    return Ok(true);
                }

                let left = self.pager.load(child_at(&node, idx)?)?;
                if left.can_lend() {
                    let predecessor = self.rightmost_key(&left)?;
                    node.keys[idx] = predecessor;
                    self.pager.write(&node)?;
                    node = left;
                    target = predecessor;
                    continue;
                }

                let right = self.pager.load(child_at(&node, idx + 1)?)?;
                if right.can_lend() {
                    let successor = self.leftmost_key(&right)?;
                    node.keys[idx] = successor;
                    self.pager.write(&node)?;
                    node = right;
                    target = successor;
                    continue;
                }

                // Both neighbours are minimal: the key moves down into the merged node
                node = self.merge_children(&mut node, idx, left, right)?;
                continue;
            }

            if node.is_leaf {
                return Ok(false);
            }

            let child = self.pager.load(child_at(&node, idx)?)?;
            node = if child.can_lend() {
                child
            } else {
                self.fill_child(&mut node, idx, child)?
            };
        }
    }

    /// Bring the minimal child at `parent.children[idx]` up to at least `t` keys.
    ///
    /// Returns the node to descend into: the child itself after a borrow, or
    /// the merged node after a merge.
    fn fill_child(&mut self, parent: &mut Node, idx: usize, child: Node) -> Result<Node, StoreError> {
        let left = match idx.checked_sub(1) {
            Some(left_idx) => Some(self.pager.load(child_at(parent, left_idx)?)?),
            None => None,
        };
        let left = match left {
            Some(left) if left.can_lend() => {
                return self.borrow_from_left(parent, idx, child, left);
            }
            other => other,
        };

        if idx < parent.keys.len() {
            let right = self.pager.load(child_at(parent, idx + 1)?)?;
            if right.can_lend() {
                return self.borrow_from_right(parent, idx, child, right);
            }
            if left.is_none() {
                return self.merge_children(parent, idx, child, right);
            }
        }

        match left {
            Some(left) => self.merge_children(parent, idx - 1, left, child),
            None => Err(StoreError::Corruption(format!(
                "block {:?} has a child with no siblings",
                parent.disk_index
            ))),
        }
    }

    /// Rotate right: the left sibling's last key goes up, the separator comes down.
    fn borrow_from_left(
        &mut self,
        parent: &mut Node,
        idx: usize,
        mut child: Node,
        mut left: Node,
    ) -> Result<Node, StoreError> {
        let lent_key = left.keys.pop().ok_or_else(|| empty_sibling(&left))?;
        child.keys.insert(0, parent.keys[idx - 1]);
        if !child.is_leaf {
            let lent_child = left.children.pop().ok_or_else(|| empty_sibling(&left))?;
            child.children.insert(0, lent_child);
        }
        parent.keys[idx - 1] = lent_key;

        self.pager.write(&child)?;
        self.pager.write(&left)?;
        self.pager.write(parent)?;

        tracing::debug!(child = ?child.disk_index, sibling = ?left.disk_index, "borrowed from left sibling");
        Ok(child)
    }

    /// Rotate left: the right sibling's first key goes up, the separator comes down.
    fn borrow_from_right(
        &mut self,
        parent: &mut Node,
        idx: usize,
        mut child: Node,
        mut right: Node,
    ) -> Result<Node, StoreError> {
        if right.keys.is_empty() || (!right.is_leaf && right.children.is_empty()) {
            return Err(empty_sibling(&right));
        }

        child.keys.push(parent.keys[idx]);
        if !child.is_leaf {
            child.children.push(right.children.remove(0));
        }
        parent.keys[idx] = right.keys.remove(0);

        self.pager.write(&child)?;
        self.pager.write(&right)?;
        self.pager.write(parent)?;

        tracing::debug!(child = ?child.disk_index, sibling = ?right.disk_index, "borrowed from right sibling");
        Ok(child)
    }

    /// Merge `parent.children[idx + 1]` and the separator `parent.keys[idx]`
    /// into `parent.children[idx]`, freeing the right node's block.
    fn merge_children(
        &mut self,
        parent: &mut Node,
        idx: usize,
        mut left: Node,
        right: Node,
    ) -> Result<Node, StoreError> {
        if idx >= parent.keys.len() || left.keys.len() + right.keys.len() + 1 > MAX_KEYS {
            return Err(StoreError::Corruption(format!(
                "cannot merge children {idx} and {} of block {:?}",
                idx + 1,
                parent.disk_index
            )));
        }

        let separator = parent.keys.remove(idx);
        let right_id = parent.children.remove(idx + 1);

        left.keys.push(separator);
        left.keys.extend_from_slice(&right.keys);
        left.children.extend_from_slice(&right.children);

        self.pager.write(&left)?;
        self.pager.deallocate(right_id)?;
        self.pager.write(parent)?;

        tracing::debug!(
            survivor = ?left.disk_index,
            freed = right_id,
            parent = ?parent.disk_index,
            "merged siblings"
        );
        Ok(left)
    }

    /// Largest key in the subtree rooted at `subtree`.
    fn rightmost_key(&mut self, subtree: &Node) -> Result<Key, StoreError> {
        if subtree.is_leaf {
            return last_key(subtree);
        }
        let mut node = self.pager.load(last_child(subtree)?)?;
        while !node.is_leaf {
            node = self.pager.load(last_child(&node)?)?;
        }
        last_key(&node)
    }

    /// Smallest key in the subtree rooted at `subtree`.
    fn leftmost_key(&mut self, subtree: &Node) -> Result<Key, StoreError> {
        if subtree.is_leaf {
            return first_key(subtree);
        }
        let mut node = self.pager.load(child_at(subtree, 0)?)?;
        while !node.is_leaf {
            node = self.pager.load(child_at(&node, 0)?)?;
        }
        first_key(&node)
    }

    /// All keys in ascending order.
    pub fn keys(&mut self) -> Result<Vec<Key>, StoreError> {
        let mut keys = Vec::new();
        if let Some(root_id) = self.pager.root() {
            self.collect_keys(root_id, &mut keys)?;
        }
        Ok(keys)
    }

    fn collect_keys(&mut self, block_id: BlockId, out: &mut Vec<Key>) -> Result<(), StoreError> {
        let node = self.pager.load(block_id)?;
        if node.is_leaf {
            out.extend_from_slice(&node.keys);
            return Ok(());
        }

        for (i, &child) in node.children.iter().enumerate() {
            self.collect_keys(child, out)?;
            if let Some(&key) = node.keys.get(i) {
                out.push(key);
            }
        }
        Ok(())
    }

    /// Breadth-first walk: one entry per node, grouped by level.
    pub fn levels(&mut self) -> Result<Vec<Vec<LevelEntry>>, StoreError> {
        let mut levels = Vec::new();
        let mut frontier: Vec<BlockId> = self.pager.root().into_iter().collect();

        while !frontier.is_empty() {
            let mut level = Vec::with_capacity(frontier.len());
            let mut next = Vec::new();
            for block_id in frontier {
                let node = self.pager.load(block_id)?;
                next.extend_from_slice(&node.children);
                level.push(LevelEntry {
                    block_id,
                    keys: node.keys,
                });
            }
            levels.push(level);
            frontier = next;
        }

        Ok(levels)
    }

    pub fn stats(&mut self) -> Result<TreeStats, StoreError> {
        let levels = self.levels()?;
        let allocator = &self.pager.superblock().allocator;

        Ok(TreeStats {
            height: levels.len(),
            key_count: levels.iter().flatten().map(|entry| entry.keys.len()).sum(),
            node_count: levels.iter().map(Vec::len).sum(),
            total_blocks: allocator.total_blocks(),
            allocated_blocks: allocator.allocated_count(),
        })
    }
}

fn child_at(node: &Node, idx: usize) -> Result<BlockId, StoreError> {
    node.children.get(idx).copied().ok_or_else(|| {
        StoreError::Corruption(format!(
            "block {:?} has no child {idx} ({} keys, {} children)",
            node.disk_index,
            node.keys.len(),
            node.children.len()
        ))
    })
}

fn last_child(node: &Node) -> Result<BlockId, StoreError> {
    child_at(node, node.children.len().saturating_sub(1))
}

fn first_key(node: &Node) -> Result<Key, StoreError> {
    node.keys.first().copied().ok_or_else(|| empty_sibling(node))
}

fn last_key(node: &Node) -> Result<Key, StoreError> {
    node.keys.last().copied().ok_or_else(|| empty_sibling(node))
}

fn empty_sibling(node: &Node) -> StoreError {
    StoreError::Corruption(format!("block {:?} is unexpectedly empty", node.disk_index))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::storage::btree::MIN_KEYS;
    use crate::storage::memory::MemoryDevice;
    use crate::storage::superblock::Superblock;

    fn test_pager() -> Pager<MemoryDevice> {
        let mut device = MemoryDevice::new(7);
        device.set_block_count(64).expect("resize");
        let mut pager = Pager::new(device, Superblock::new(64), 64, 32);
        pager.persist_superblock().expect("persist");
        pager
    }

    fn assert_valid(tree: &mut BTree<'_, MemoryDevice>) {
        let violations = tree.verify().expect("verify");
        assert!(violations.is_empty(), "invariant violations: {violations:?}");
    }

    #[test]
    fn test_empty_tree() {
        let mut pager = test_pager();
        let mut tree = BTree::new(&mut pager);

        let result = tree.search(1).expect("search");
        assert!(!result.found);
        assert!(result.path.is_empty());
        assert_eq!(tree.remove(1).expect("remove"), RemoveOutcome::NotFound);
        assert!(tree.keys().expect("keys").is_empty());
        assert_eq!(tree.stats().expect("stats").height, 0);
    }

    #[test]
    fn test_scenario_root_split() {
        let mut pager = test_pager();
        let mut tree = BTree::new(&mut pager);

        for key in [10, 20, 5, 6, 12] {
            assert_eq!(tree.insert(key).expect("insert"), InsertOutcome::Inserted);
        }
        assert_eq!(tree.stats().expect("stats").height, 1);
        assert_eq!(tree.pager().root(), Some(1));

        // The sixth key would overflow the root, so it splits first
        tree.insert(30).expect("insert");
        assert_eq!(tree.pager().root(), Some(2));
        assert_eq!(tree.stats().expect("stats").height, 2);

        tree.insert(7).expect("insert");
        tree.insert(17).expect("insert");

        let levels = tree.levels().expect("levels");
        assert_eq!(
            levels,
            vec![
                vec![LevelEntry {
                    block_id: 2,
                    keys: vec![10]
                }],
                vec![
                    LevelEntry {
                        block_id: 1,
                        keys: vec![5, 6, 7]
                    },
                    LevelEntry {
                        block_id: 3,
                        keys: vec![12, 17, 20, 30]
                    },
                ],
            ]
        );

        let found = tree.search(6).expect("search");
        assert!(found.found);
        assert_eq!(found.path, vec![2, 1]);

        let missing = tree.search(99).expect("search");
        assert!(!missing.found);
        assert_eq!(missing.path, vec![2, 3]);

        assert_valid(&mut tree);
    }

    #[test]
    fn test_scenario_ascending_deletes() {
        let mut pager = test_pager();
        let mut tree = BTree::new(&mut pager);

        for key in 1..=20 {
            tree.insert(key).expect("insert");
        }

        for key in 1..=20 {
            assert_eq!(tree.remove(key).expect("remove"), RemoveOutcome::Removed);
            let expected: Vec<Key> = (key + 1..=20).collect();
            assert_eq!(tree.keys().expect("keys"), expected);
            assert_valid(&mut tree);
        }

        assert_eq!(tree.pager().root(), None);
    }

    #[test]
    fn test_scenario_duplicate_rejected() {
        let mut pager = test_pager();
        let mut tree = BTree::new(&mut pager);

        assert_eq!(tree.insert(42).expect("insert"), InsertOutcome::Inserted);
        let allocated = tree.pager().superblock().allocator.allocated_count();

        assert_eq!(tree.insert(42).expect("insert"), InsertOutcome::Duplicate);
        assert_eq!(tree.keys().expect("keys"), vec![42]);
        assert_eq!(
            tree.pager().superblock().allocator.allocated_count(),
            allocated
        );
    }

    #[test]
    fn test_scenario_height_shrinks_and_frees_root() {
        let mut pager = test_pager();
        let mut tree = BTree::new(&mut pager);

        let mut next_key = 0;
        while tree.stats().expect("stats").height < 3 {
            next_key += 1;
            tree.insert(next_key).expect("insert");
            assert!(next_key < 1000, "tree never reached height 3");
        }
        assert_valid(&mut tree);

        let mut shrank = false;
        for key in 1..=next_key {
            let old_root = tree.pager().root().expect("tree is not empty");
            let old_root_node = tree.pager.load(old_root).expect("load root");

            tree.remove(key).expect("remove");
            assert_valid(&mut tree);

            if tree.stats().expect("stats").height == 2 {
                // The root had one key and two minimal children that merged
                assert_eq!(old_root_node.keys.len(), 1);
                assert!(!tree.pager().is_allocated(old_root));
                assert_eq!(tree.pager().root(), Some(old_root_node.children[0]));
                assert!(!tree.pager().is_allocated(old_root_node.children[1]));
                shrank = true;
                break;
            }
        }
        assert!(shrank, "tree never shrank back to height 2");
    }

    #[test]
    fn test_remove_absent_key_is_noop_for_key_set() {
        let mut pager = test_pager();
        let mut tree = BTree::new(&mut pager);

        for key in (0..60).step_by(2) {
            tree.insert(key).expect("insert");
        }
        let before = tree.keys().expect("keys");

        for key in [-5, 1, 31, 59, 1000] {
            assert_eq!(tree.remove(key).expect("remove"), RemoveOutcome::NotFound);
            assert_eq!(tree.keys().expect("keys"), before);
            assert_valid(&mut tree);
        }
    }

    #[test]
    fn test_remove_internal_key_uses_predecessor_and_successor() {
        let mut pager = test_pager();
        let mut tree = BTree::new(&mut pager);

        for key in 1..=30 {
            tree.insert(key).expect("insert");
        }

        let root = tree.pager().root().expect("root");
        let root_node = tree.pager.load(root).expect("load root");
        let separator = root_node.keys[0];

        assert_eq!(tree.remove(separator).expect("remove"), RemoveOutcome::Removed);
        assert!(!tree.search(separator).expect("search").found);
        assert_valid(&mut tree);

        let expected: Vec<Key> = (1..=30).filter(|&k| k != separator).collect();
        assert_eq!(tree.keys().expect("keys"), expected);
    }

    #[test]
    fn test_total_removal_frees_everything() {
        let mut pager = test_pager();
        let mut tree = BTree::new(&mut pager);
        let mut rng = StdRng::seed_from_u64(11);

        let mut keys: Vec<Key> = (0..300).map(|k| k * 7 - 500).collect();
        keys.shuffle(&mut rng);
        for &key in &keys {
            tree.insert(key).expect("insert");
        }
        assert_valid(&mut tree);

        keys.shuffle(&mut rng);
        for &key in &keys {
            assert_eq!(tree.remove(key).expect("remove"), RemoveOutcome::Removed);
        }

        assert_eq!(tree.pager().root(), None);
        assert_eq!(tree.pager().superblock().allocator.allocated_count(), 1);
        for &key in &keys {
            assert!(!tree.search(key).expect("search").found);
        }
    }

    #[test]
    fn test_extreme_key_values() {
        let mut pager = test_pager();
        let mut tree = BTree::new(&mut pager);

        for key in [i64::MAX, i64::MIN, 0, -1, 1, i64::MAX - 1, i64::MIN + 1] {
            tree.insert(key).expect("insert");
        }
        assert_eq!(
            tree.keys().expect("keys"),
            vec![i64::MIN, i64::MIN + 1, -1, 0, 1, i64::MAX - 1, i64::MAX]
        );
        assert!(tree.search(i64::MIN).expect("search").found);
        assert_eq!(tree.remove(i64::MAX).expect("remove"), RemoveOutcome::Removed);
        assert_valid(&mut tree);
    }

    #[test]
    fn test_random_operations_match_model() {
        let mut pager = test_pager();
        let mut tree = BTree::new(&mut pager);
        let mut rng = StdRng::seed_from_u64(0x5EED);
        let mut model = BTreeSet::new();

        for _ in 0..3000 {
            let key: Key = rng.random_range(0..400);
            if rng.random_bool(0.6) {
                let outcome = tree.insert(key).expect("insert");
                let expected = if model.insert(key) {
                    InsertOutcome::Inserted
                } else {
                    InsertOutcome::Duplicate
                };
                assert_eq!(outcome, expected, "insert {key}");
            } else {
                let outcome = tree.remove(key).expect("remove");
                let expected = if model.remove(&key) {
                    RemoveOutcome::Removed
                } else {
                    RemoveOutcome::NotFound
                };
                assert_eq!(outcome, expected, "remove {key}");
            }
            assert_valid(&mut tree);
        }

        let expected: Vec<Key> = model.iter().copied().collect();
        assert_eq!(tree.keys().expect("keys"), expected);

        for levels in tree.levels().expect("levels").iter().skip(1) {
            for entry in levels {
                assert!(entry.keys.len() >= MIN_KEYS);
            }
        }
    }
}
