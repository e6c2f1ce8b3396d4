use std::collections::BTreeSet;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::mem::size_of;

use crate::config::BTREE_PAGE_SIZE;

pub(crate) type NodeId = usize;
const INVALID_NODE: NodeId = usize::MAX;

/// Key count, leaf flag and right link, the part every node carries.
const NODE_HEADER_SIZE: usize = 24;
const CHILD_PTR_SIZE: usize = size_of::<NodeId>();

/// Chooses what a leaf stores per key: the unique variant keeps a single
/// value, the non-unique variant a set of them.
pub trait TreeVariant<V> {
    type Stored: Clone + Debug;

    fn store(value: V) -> Self::Stored;
    /// Folds `value` into an existing entry. Returns false when the entry
    /// was left untouched (a duplicate put on a unique tree).
    fn merge(stored: &mut Self::Stored, value: V) -> bool;
    fn collect(stored: &Self::Stored, out: &mut BTreeSet<V>);
}

pub struct Unique;
pub struct NonUnique;

impl<V: Clone + Ord + Debug> TreeVariant<V> for Unique {
    type Stored = V;

    fn store(value: V) -> V {
        value
    }

    fn merge(_stored: &mut V, _value: V) -> bool {
        // the first value is retained
        false
    }

    fn collect(stored: &V, out: &mut BTreeSet<V>) {
        out.insert(stored.clone());
    }
}

impl<V: Clone + Ord + Debug> TreeVariant<V> for NonUnique {
    type Stored = BTreeSet<V>;

    fn store(value: V) -> Self::Stored {
        BTreeSet::from([value])
    }

    fn merge(stored: &mut Self::Stored, value: V) -> bool {
        stored.insert(value)
    }

    fn collect(stored: &Self::Stored, out: &mut BTreeSet<V>) {
        out.extend(stored.iter().cloned());
    }
}

/// Leaves use `values`, inner nodes use `separators`; both share the key
/// array and the right link, like the node layout this mirrors.
#[derive(Debug)]
struct Node<K, S> {
    is_leaf: bool,
    right: NodeId,
    keys: Vec<K>,
    values: Vec<S>,
    separators: Vec<NodeId>,
}

impl<K, S> Node<K, S> {
    fn leaf() -> Self {
        Self {
            is_leaf: true,
            right: INVALID_NODE,
            keys: Vec::new(),
            values: Vec::new(),
            separators: Vec::new(),
        }
    }

    fn inner() -> Self {
        Self {
            is_leaf: false,
            ..Self::leaf()
        }
    }
}

/// In-memory B+-tree. Nodes live in an arena and link by index, so version
/// pointers never fight the borrow checker; leaves are chained left to
/// right for range scans. Capacities derive from a fixed node byte size and
/// the key/value widths.
///
/// There is no delete; a tree lives as long as its index definition.
pub struct BPlusTree<K, V, T: TreeVariant<V>> {
    nodes: Vec<Node<K, T::Stored>>,
    root: NodeId,
    height: usize,
    leaf_capacity: usize,
    inner_capacity: usize,
    _variant: PhantomData<(V, T)>,
}

impl<K, V, T> Default for BPlusTree<K, V, T>
where
    K: Ord + Copy + Debug,
    V: Clone + Ord + Debug,
    T: TreeVariant<V>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, T> BPlusTree<K, V, T>
where
    K: Ord + Copy + Debug,
    V: Clone + Ord + Debug,
    T: TreeVariant<V>,
{
    pub fn new() -> Self {
        let leaf_capacity =
            ((BTREE_PAGE_SIZE - NODE_HEADER_SIZE) / (size_of::<K>() + size_of::<T::Stored>())).max(2);
        let inner_capacity = ((BTREE_PAGE_SIZE - NODE_HEADER_SIZE - CHILD_PTR_SIZE)
            / (size_of::<K>() + CHILD_PTR_SIZE))
            .max(2);

        Self {
            nodes: vec![Node::leaf()],
            root: 0,
            height: 1,
            leaf_capacity,
            inner_capacity,
            _variant: PhantomData,
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn put(&mut self, key: K, value: V) {
        let mut path = Vec::with_capacity(self.height);
        let leaf = self.locate_leaf(&key, Some(&mut path));

        let mut split = self.insert_into_leaf(leaf, key, value);
        while let Some((new_node, up_key)) = split {
            match path.pop() {
                Some(parent) => split = self.insert_into_inner(parent, up_key, new_node),
                None => {
                    self.install_new_root(new_node, up_key);
                    split = None;
                }
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<T::Stored> {
        let leaf = self.locate_leaf(key, None);
        let node = &self.nodes[leaf];
        node.keys.binary_search(key).ok().map(|pos| node.values[pos].clone())
    }

    /// Every value stored under a key in `[key_from, key_to]`, walking the
    /// leaf chain rightwards. `None` when the range is empty.
    pub fn get_range(&self, key_from: &K, key_to: &K) -> Option<BTreeSet<V>> {
        let mut values = BTreeSet::new();
        let mut node_id = self.locate_leaf(key_from, None);

        'walk: loop {
            let node = &self.nodes[node_id];
            for (pos, key) in node.keys.iter().enumerate() {
                if key > key_to {
                    break 'walk;
                }
                if key >= key_from {
                    T::collect(&node.values[pos], &mut values);
                }
            }
            if node.right == INVALID_NODE {
                break;
            }
            node_id = node.right;
        }

        if values.is_empty() {
            None
        } else {
            Some(values)
        }
    }

    /// Descends to the leaf that may hold `key`. When `path` is given,
    /// every visited inner node is pushed onto it, root first.
    fn locate_leaf(&self, key: &K, mut path: Option<&mut Vec<NodeId>>) -> NodeId {
        let mut node_id = self.root;
        while !self.nodes[node_id].is_leaf {
            if let Some(path) = path.as_mut() {
                path.push(node_id);
            }
            node_id = self.child(node_id, key);
        }
        node_id
    }

    /// Right-biased descent: the child after the largest key <= `key`.
    fn child(&self, node_id: NodeId, key: &K) -> NodeId {
        let node = &self.nodes[node_id];
        let index = match node.keys.binary_search(key) {
            Ok(pos) => pos + 1,
            Err(pos) => pos,
        };
        node.separators[index]
    }

    fn insert_into_leaf(&mut self, leaf_id: NodeId, key: K, value: V) -> Option<(NodeId, K)> {
        let leaf_capacity = self.leaf_capacity;
        let node = &mut self.nodes[leaf_id];

        match node.keys.binary_search(&key) {
            Ok(pos) => {
                T::merge(&mut node.values[pos], value);
                None
            }
            Err(pos) => {
                if node.keys.len() < leaf_capacity {
                    node.keys.insert(pos, key);
                    node.values.insert(pos, T::store(value));
                    return None;
                }

                let new_id = self.split_leaf(leaf_id);
                let target = if key < self.nodes[new_id].keys[0] {
                    leaf_id
                } else {
                    new_id
                };

                let node = &mut self.nodes[target];
                let pos = node.keys.binary_search(&key).unwrap_err();
                node.keys.insert(pos, key);
                node.values.insert(pos, T::store(value));

                // the separator pushed up is the right leaf's first key
                Some((new_id, self.nodes[new_id].keys[0]))
            }
        }
    }

    /// Moves the upper half of the leaf into a fresh right neighbour and
    /// links it into the chain.
    fn split_leaf(&mut self, leaf_id: NodeId) -> NodeId {
        let left_size = self.leaf_capacity / 2;
        let new_id = self.nodes.len();

        let mut new_node = Node::leaf();
        {
            let node = &mut self.nodes[leaf_id];
            new_node.keys = node.keys.split_off(left_size);
            new_node.values = node.values.split_off(left_size);
            new_node.right = node.right;
            node.right = new_id;
        }
        self.nodes.push(new_node);

        new_id
    }

    fn insert_into_inner(&mut self, inner_id: NodeId, key: K, child: NodeId) -> Option<(NodeId, K)> {
        let inner_capacity = self.inner_capacity;
        let node = &mut self.nodes[inner_id];

        if node.keys.len() < inner_capacity {
            let pos = match node.keys.binary_search(&key) {
                Ok(pos) | Err(pos) => pos,
            };
            node.keys.insert(pos, key);
            node.separators.insert(pos + 1, child);
            return None;
        }

        Some(self.split_inner(inner_id, key, child))
    }

    /// Splits a full inner node around its median. Which key moves up
    /// depends on where the new separator falls: below the median, at the
    /// median, or above it.
    fn split_inner(&mut self, inner_id: NodeId, key: K, child: NodeId) -> (NodeId, K) {
        let left_size = self.inner_capacity / 2;
        let new_id = self.nodes.len();

        let up_key;
        let mut new_node = Node::inner();
        {
            let node = &mut self.nodes[inner_id];

            if key < node.keys[left_size - 1] {
                new_node.keys = node.keys.split_off(left_size);
                new_node.separators = node.separators.split_off(left_size);
                up_key = node.keys.pop().unwrap();

                let pos = match node.keys.binary_search(&key) {
                    Ok(pos) | Err(pos) => pos,
                };
                node.keys.insert(pos, key);
                node.separators.insert(pos + 1, child);
            } else if key < node.keys[left_size] {
                new_node.keys = node.keys.split_off(left_size);
                let mut upper_separators = node.separators.split_off(left_size + 1);
                new_node.separators.push(child);
                new_node.separators.append(&mut upper_separators);
                up_key = key;
            } else {
                let mut upper_keys = node.keys.split_off(left_size);
                new_node.separators = node.separators.split_off(left_size + 1);
                up_key = upper_keys.remove(0);
                new_node.keys = upper_keys;

                let pos = match new_node.keys.binary_search(&key) {
                    Ok(pos) | Err(pos) => pos,
                };
                new_node.keys.insert(pos, key);
                new_node.separators.insert(pos + 1, child);
            }

            new_node.right = node.right;
            node.right = new_id;
        }
        self.nodes.push(new_node);

        (new_id, up_key)
    }

    fn install_new_root(&mut self, right: NodeId, key: K) {
        let new_root = self.nodes.len();

        let mut node = Node::inner();
        node.keys.push(key);
        node.separators.push(self.root);
        node.separators.push(right);
        self.nodes.push(node);

        self.root = new_root;
        self.height += 1;
    }

    #[cfg(test)]
    fn leftmost_leaf(&self) -> NodeId {
        let mut node_id = self.root;
        while !self.nodes[node_id].is_leaf {
            node_id = self.nodes[node_id].separators[0];
        }
        node_id
    }

    /// All keys in leaf-chain order, for invariant checks.
    #[cfg(test)]
    fn chained_keys(&self) -> Vec<K> {
        let mut keys = Vec::new();
        let mut node_id = self.leftmost_leaf();
        loop {
            let node = &self.nodes[node_id];
            keys.extend_from_slice(&node.keys);
            if node.right == INVALID_NODE {
                break;
            }
            node_id = node.right;
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pages::PageId;
    use rand::seq::SliceRandom;

    #[test]
    fn test_point_and_range_lookup() {
        let mut tree: BPlusTree<i64, PageId, Unique> = BPlusTree::new();
        for (key, page_id) in [(1, 100), (3, 300), (5, 500), (7, 700)] {
            tree.put(key, page_id);
        }

        assert_eq!(tree.get(&5), Some(500));
        assert_eq!(tree.get(&4), None);
        assert_eq!(
            tree.get_range(&2, &6),
            Some(BTreeSet::from([300, 500]))
        );
        assert_eq!(tree.get_range(&8, &9), None);
    }

    #[test]
    fn test_split_and_lookup_many() {
        let mut tree: BPlusTree<i64, PageId, Unique> = BPlusTree::new();

        let mut keys = (0..2000i64).collect::<Vec<_>>();
        keys.shuffle(&mut rand::thread_rng());
        for key in &keys {
            tree.put(*key, (*key * 10) as PageId);
        }

        assert!(tree.height() > 1);
        for key in 0..2000i64 {
            assert_eq!(tree.get(&key), Some((key * 10) as PageId), "key {key}");
        }
        assert_eq!(tree.get(&2000), None);
        assert_eq!(tree.get(&-1), None);
    }

    #[test]
    fn test_leaf_chain_is_sorted_and_complete() {
        let mut tree: BPlusTree<i64, PageId, Unique> = BPlusTree::new();

        let mut keys = (0..1000i64).collect::<Vec<_>>();
        keys.shuffle(&mut rand::thread_rng());
        for key in &keys {
            tree.put(*key, 1);
        }

        let chained = tree.chained_keys();
        assert_eq!(chained.len(), 1000);
        assert!(chained.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_range_spans_leaves() {
        let mut tree: BPlusTree<i64, PageId, Unique> = BPlusTree::new();
        for key in 0..500i64 {
            tree.put(key, key as PageId);
        }

        let range = tree.get_range(&100, &399).unwrap();
        assert_eq!(range.len(), 300);
        assert_eq!(range.iter().next(), Some(&100));
        assert_eq!(range.iter().next_back(), Some(&399));
    }

    #[test]
    fn test_unique_duplicate_put_keeps_first_value() {
        let mut tree: BPlusTree<i64, PageId, Unique> = BPlusTree::new();
        tree.put(1, 100);
        tree.put(1, 999);

        assert_eq!(tree.get(&1), Some(100));
    }

    #[test]
    fn test_non_unique_collects_values_per_key() {
        let mut tree: BPlusTree<i64, PageId, NonUnique> = BPlusTree::new();
        tree.put(1, 100);
        tree.put(1, 101);
        tree.put(2, 200);
        tree.put(1, 100);

        assert_eq!(tree.get(&1), Some(BTreeSet::from([100, 101])));
        assert_eq!(
            tree.get_range(&1, &2),
            Some(BTreeSet::from([100, 101, 200]))
        );
    }

    #[test]
    fn test_all_root_to_leaf_paths_share_height() {
        let mut tree: BPlusTree<i64, PageId, Unique> = BPlusTree::new();
        for key in 0..3000i64 {
            tree.put(key, 1);
        }

        fn depths(tree: &BPlusTree<i64, PageId, Unique>, node_id: NodeId, depth: usize, out: &mut Vec<usize>) {
            let node = &tree.nodes[node_id];
            if node.is_leaf {
                out.push(depth);
                return;
            }
            for separator in &node.separators {
                depths(tree, *separator, depth + 1, out);
            }
        }

        let mut leaf_depths = Vec::new();
        depths(&tree, tree.root, 1, &mut leaf_depths);
        assert!(leaf_depths.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(leaf_depths[0], tree.height());
    }
}
