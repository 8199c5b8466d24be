//! Name-ordered B+ tree over tags
//!
//! A leaf-linked B+ tree from tag name to tag id, giving the ordered view
//! (point lookup, prefix scan, full ordered walk) that the hash-based
//! inverted index cannot. Nodes live in an arena and reference each other by
//! index, which keeps the leaf chain in safe Rust.
//!
//! Split policy: a node splits when its entry count reaches
//! [`BPTREE_ORDER`]; the middle key (or the first key of the new right leaf)
//! is promoted to the parent, and a root split grows the tree by one level.
//! Deletion only removes the entry from its leaf; underfull leaves are
//! tolerated.
//!
//! The tree is never persisted: on restore it is rebuilt from the tag list's
//! name→id map.

use parking_lot::RwLock;
use tagfs_common::{BPTREE_ORDER, TagId};

#[derive(Debug)]
struct Node {
    is_leaf: bool,
    keys: Vec<String>,
    /// Leaf payloads, parallel to `keys`
    values: Vec<TagId>,
    /// Child indices, `keys.len() + 1` of them on internal nodes
    children: Vec<usize>,
    /// Right sibling in the leaf chain
    next: Option<usize>,
}

impl Node {
    fn leaf() -> Self {
        Self {
            is_leaf: true,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
            next: None,
        }
    }
}

struct TreeInner {
    nodes: Vec<Node>,
    root: usize,
}

impl TreeInner {
    /// Descend to the leaf responsible for `key`, recording the ancestors
    fn find_leaf(&self, key: &str) -> (Vec<usize>, usize) {
        let mut ancestors = Vec::new();
        let mut idx = self.root;
        while !self.nodes[idx].is_leaf {
            ancestors.push(idx);
            let node = &self.nodes[idx];
            let child = node.keys.partition_point(|k| key >= k.as_str());
            idx = node.children[child];
        }
        (ancestors, idx)
    }

    /// Split `idx` and cascade promotions up through `ancestors`
    fn split(&mut self, mut ancestors: Vec<usize>, mut idx: usize) {
        loop {
            let (separator, right) = if self.nodes[idx].is_leaf {
                self.split_leaf(idx)
            } else {
                self.split_internal(idx)
            };

            match ancestors.pop() {
                None => {
                    self.nodes.push(Node {
                        is_leaf: false,
                        keys: vec![separator],
                        values: Vec::new(),
                        children: vec![idx, right],
                        next: None,
                    });
                    self.root = self.nodes.len() - 1;
                    return;
                }
                Some(parent) => {
                    let node = &mut self.nodes[parent];
                    let pos = node.keys.partition_point(|k| *k <= separator);
                    node.keys.insert(pos, separator);
                    node.children.insert(pos + 1, right);
                    if node.keys.len() < BPTREE_ORDER {
                        return;
                    }
                    idx = parent;
                }
            }
        }
    }

    /// Split a leaf in half; the first key of the right half is promoted
    fn split_leaf(&mut self, idx: usize) -> (String, usize) {
        let mid = self.nodes[idx].keys.len() / 2;

        let right_keys = self.nodes[idx].keys.split_off(mid);
        let right_values = self.nodes[idx].values.split_off(mid);
        let separator = right_keys[0].clone();

        let right = self.nodes.len();
        self.nodes.push(Node {
            is_leaf: true,
            keys: right_keys,
            values: right_values,
            children: Vec::new(),
            next: self.nodes[idx].next,
        });
        self.nodes[idx].next = Some(right);

        (separator, right)
    }

    /// Split an internal node; the middle key moves up, not right
    fn split_internal(&mut self, idx: usize) -> (String, usize) {
        let mid = self.nodes[idx].keys.len() / 2;

        let mut right_keys = self.nodes[idx].keys.split_off(mid);
        let separator = right_keys.remove(0);
        let right_children = self.nodes[idx].children.split_off(mid + 1);

        let right = self.nodes.len();
        self.nodes.push(Node {
            is_leaf: false,
            keys: right_keys,
            values: Vec::new(),
            children: right_children,
            next: None,
        });

        (separator, right)
    }

    /// Index of the leftmost leaf
    fn first_leaf(&self) -> usize {
        let mut idx = self.root;
        while !self.nodes[idx].is_leaf {
            idx = self.nodes[idx].children[0];
        }
        idx
    }
}

/// Ordered index from tag name to tag id
pub struct TagTree {
    inner: RwLock<TreeInner>,
}

impl TagTree {
    /// Create an empty tree
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(TreeInner {
                nodes: vec![Node::leaf()],
                root: 0,
            }),
        }
    }

    /// Point lookup by exact name
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<TagId> {
        let inner = self.inner.read();
        let (_, leaf) = inner.find_leaf(name);
        let node = &inner.nodes[leaf];
        node.keys
            .iter()
            .position(|k| k == name)
            .map(|pos| node.values[pos])
    }

    /// Insert a name→id entry, updating in place if the name exists
    pub fn insert(&self, name: &str, tag_id: TagId) {
        let mut inner = self.inner.write();
        let (ancestors, leaf) = inner.find_leaf(name);

        let node = &mut inner.nodes[leaf];
        if let Some(pos) = node.keys.iter().position(|k| k == name) {
            node.values[pos] = tag_id;
            return;
        }

        let pos = node.keys.partition_point(|k| k.as_str() < name);
        node.keys.insert(pos, name.to_string());
        node.values.insert(pos, tag_id);

        if node.keys.len() >= BPTREE_ORDER {
            inner.split(ancestors, leaf);
        }
    }

    /// Remove an entry from its leaf; absent names are a no-op
    pub fn delete(&self, name: &str) {
        let mut inner = self.inner.write();
        let (_, leaf) = inner.find_leaf(name);

        let node = &mut inner.nodes[leaf];
        if let Some(pos) = node.keys.iter().position(|k| k == name) {
            node.keys.remove(pos);
            node.values.remove(pos);
        }
    }

    /// All entries in name order, walking the leaf chain
    #[must_use]
    pub fn entries(&self) -> Vec<(String, TagId)> {
        let inner = self.inner.read();
        let mut result = Vec::new();

        let mut idx = Some(inner.first_leaf());
        while let Some(leaf) = idx {
            let node = &inner.nodes[leaf];
            for (key, &value) in node.keys.iter().zip(&node.values) {
                result.push((key.clone(), value));
            }
            idx = node.next;
        }
        result
    }

    /// Entries whose name starts with `prefix`, in name order
    #[must_use]
    pub fn scan_prefix(&self, prefix: &str) -> Vec<(String, TagId)> {
        let inner = self.inner.read();
        let mut result = Vec::new();

        let (_, leaf) = inner.find_leaf(prefix);
        let mut idx = Some(leaf);
        while let Some(leaf) = idx {
            let node = &inner.nodes[leaf];
            for (key, &value) in node.keys.iter().zip(&node.values) {
                if key.as_str() < prefix {
                    continue;
                }
                if !key.starts_with(prefix) {
                    return result;
                }
                result.push((key.clone(), value));
            }
            idx = node.next;
        }
        result
    }
}

impl Default for TagTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lookup() {
        let tree = TagTree::new();

        tree.insert("red", TagId::from(1));
        tree.insert("blue", TagId::from(2));

        assert_eq!(tree.lookup("red"), Some(TagId::from(1)));
        assert_eq!(tree.lookup("blue"), Some(TagId::from(2)));
        assert_eq!(tree.lookup("green"), None);
    }

    #[test]
    fn test_insert_updates_in_place() {
        let tree = TagTree::new();

        tree.insert("red", TagId::from(1));
        tree.insert("red", TagId::from(9));

        assert_eq!(tree.lookup("red"), Some(TagId::from(9)));
        assert_eq!(tree.entries().len(), 1);
    }

    #[test]
    fn test_delete() {
        let tree = TagTree::new();

        tree.insert("red", TagId::from(1));
        tree.delete("red");
        tree.delete("never-there");

        assert_eq!(tree.lookup("red"), None);
        assert!(tree.entries().is_empty());
    }

    #[test]
    fn test_many_inserts_force_splits() {
        let tree = TagTree::new();

        let count = BPTREE_ORDER * 8;
        for i in 0..count {
            tree.insert(&format!("tag-{:04}", i), TagId::from(i as u64));
        }

        for i in 0..count {
            assert_eq!(
                tree.lookup(&format!("tag-{:04}", i)),
                Some(TagId::from(i as u64)),
                "lost key tag-{:04}",
                i
            );
        }
    }

    #[test]
    fn test_entries_are_ordered_after_splits() {
        let tree = TagTree::new();

        // Insert in reverse so ordering comes from the tree, not insertion
        let count = BPTREE_ORDER * 4;
        for i in (0..count).rev() {
            tree.insert(&format!("tag-{:04}", i), TagId::from(i as u64));
        }

        let entries = tree.entries();
        assert_eq!(entries.len(), count);
        for window in entries.windows(2) {
            assert!(window[0].0 < window[1].0);
        }
    }

    #[test]
    fn test_delete_after_splits() {
        let tree = TagTree::new();

        let count = BPTREE_ORDER * 4;
        for i in 0..count {
            tree.insert(&format!("tag-{:04}", i), TagId::from(i as u64));
        }

        for i in (0..count).step_by(2) {
            tree.delete(&format!("tag-{:04}", i));
        }

        for i in 0..count {
            let found = tree.lookup(&format!("tag-{:04}", i));
            if i % 2 == 0 {
                assert_eq!(found, None);
            } else {
                assert_eq!(found, Some(TagId::from(i as u64)));
            }
        }
    }

    #[test]
    fn test_scan_prefix() {
        let tree = TagTree::new();

        tree.insert("color/red", TagId::from(1));
        tree.insert("color/blue", TagId::from(2));
        tree.insert("shape/round", TagId::from(3));

        let colors = tree.scan_prefix("color/");
        assert_eq!(colors.len(), 2);
        assert_eq!(colors[0].0, "color/blue");
        assert_eq!(colors[1].0, "color/red");

        assert!(tree.scan_prefix("material/").is_empty());
    }

    #[test]
    fn test_scan_prefix_across_leaves() {
        let tree = TagTree::new();

        let count = BPTREE_ORDER * 4;
        for i in 0..count {
            tree.insert(&format!("p/{:04}", i), TagId::from(i as u64));
        }
        tree.insert("q/other", TagId::from(9999));

        let scanned = tree.scan_prefix("p/");
        assert_eq!(scanned.len(), count);
    }
}
