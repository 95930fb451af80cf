//! Path-compressed radix tree over prefixes
//!
//! Nodes exist only for inserted prefixes and for the branch points between
//! them, so covering and covered lookups touch a number of nodes bounded by
//! the data, not by the address length.

use irr_core::{AddressFamily, PrefixBits};

#[derive(Debug)]
struct RadixNode<T> {
    prefix: PrefixBits,
    values: Vec<T>,
    children: [Option<usize>; 2],
}

impl<T> RadixNode<T> {
    fn new(prefix: PrefixBits) -> Self {
        Self {
            prefix,
            values: Vec::new(),
            children: [None, None],
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Root(usize),
    Child(usize, usize),
}

fn family_index(family: AddressFamily) -> usize {
    match family {
        AddressFamily::V4 => 0,
        AddressFamily::V6 => 1,
    }
}

/// Prefix tree with values attached to exact prefixes
#[derive(Debug)]
pub struct RadixTree<T> {
    nodes: Vec<RadixNode<T>>,
    roots: [Option<usize>; 2],
    len: usize,
}

impl<T> Default for RadixTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RadixTree<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            roots: [None, None],
            len: 0,
        }
    }

    /// Number of values stored
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn get(&self, slot: Slot) -> Option<usize> {
        match slot {
            Slot::Root(family) => self.roots[family],
            Slot::Child(node, branch) => self.nodes[node].children[branch],
        }
    }

    fn set(&mut self, slot: Slot, index: usize) {
        match slot {
            Slot::Root(family) => self.roots[family] = Some(index),
            Slot::Child(node, branch) => self.nodes[node].children[branch] = Some(index),
        }
    }

    fn push_node(&mut self, node: RadixNode<T>) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn insert(&mut self, prefix: PrefixBits, value: T) {
        self.len += 1;
        let mut slot = Slot::Root(family_index(prefix.family()));
        loop {
            let Some(index) = self.get(slot) else {
                let mut leaf = RadixNode::new(prefix);
                leaf.values.push(value);
                let leaf = self.push_node(leaf);
                self.set(slot, leaf);
                return;
            };

            let node_prefix = self.nodes[index].prefix;
            let common = node_prefix.common_len(&prefix);

            if common == node_prefix.len() && common == prefix.len() {
                self.nodes[index].values.push(value);
                return;
            }
            if common == node_prefix.len() {
                slot = Slot::Child(index, usize::from(prefix.bit(node_prefix.len())));
                continue;
            }

            if common == prefix.len() {
                // New prefix covers the existing node
                let mut parent = RadixNode::new(prefix);
                parent.values.push(value);
                parent.children[usize::from(node_prefix.bit(prefix.len()))] = Some(index);
                let parent = self.push_node(parent);
                self.set(slot, parent);
                return;
            }

            // Diverge below a new branch point
            let mut branch = RadixNode::new(prefix.truncate(common));
            let mut leaf = RadixNode::new(prefix);
            leaf.values.push(value);
            let leaf = self.push_node(leaf);
            branch.children[usize::from(node_prefix.bit(common))] = Some(index);
            branch.children[usize::from(prefix.bit(common))] = Some(leaf);
            let branch = self.push_node(branch);
            self.set(slot, branch);
            return;
        }
    }

    /// Values at prefixes covering or equal to `prefix`
    pub fn covering(&self, prefix: &PrefixBits) -> Vec<&T> {
        let mut found = Vec::new();
        let mut current = self.roots[family_index(prefix.family())];
        while let Some(index) = current {
            let node = &self.nodes[index];
            if !node.prefix.covers(prefix) {
                break;
            }
            found.extend(node.values.iter());
            if node.prefix.len() == prefix.len() {
                break;
            }
            current = node.children[usize::from(prefix.bit(node.prefix.len()))];
        }
        found
    }

    /// Values at prefixes covered by or equal to `prefix`
    pub fn covered(&self, prefix: &PrefixBits) -> Vec<&T> {
        let mut found = Vec::new();
        let mut current = self.roots[family_index(prefix.family())];
        // Descend to the first node inside `prefix`
        let top = loop {
            let Some(index) = current else {
                return found;
            };
            let node = &self.nodes[index];
            if prefix.covers(&node.prefix) {
                break index;
            }
            if !node.prefix.covers(prefix) {
                return found;
            }
            current = node.children[usize::from(prefix.bit(node.prefix.len()))];
        };

        let mut stack = vec![top];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            found.extend(node.values.iter());
            stack.extend(node.children.iter().flatten());
        }
        found
    }

    /// Values at prefixes covering, equal to, or covered by `prefix`
    pub fn overlapping(&self, prefix: &PrefixBits) -> Vec<&T> {
        let mut found = self.covering(prefix);
        // Exact matches are reported by both lookups
        found.extend(
            self.covered(prefix)
                .into_iter()
                .skip(self.exact(prefix).map_or(0, |values| values.len())),
        );
        found
    }

    /// Values at exactly `prefix`
    pub fn exact(&self, prefix: &PrefixBits) -> Option<&[T]> {
        let mut current = self.roots[family_index(prefix.family())];
        while let Some(index) = current {
            let node = &self.nodes[index];
            if !node.prefix.covers(prefix) {
                return None;
            }
            if node.prefix.len() == prefix.len() {
                return Some(&node.values);
            }
            current = node.children[usize::from(prefix.bit(node.prefix.len()))];
        }
        None
    }

    /// Every prefix that carries values, with its values
    pub fn entries(&self) -> impl Iterator<Item = (&PrefixBits, &[T])> {
        self.nodes
            .iter()
            .filter(|node| !node.values.is_empty())
            .map(|node| (&node.prefix, node.values.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(s: &str) -> PrefixBits {
        PrefixBits::from_network(&s.parse().unwrap())
    }

    fn tree(prefixes: &[&'static str]) -> RadixTree<&'static str> {
        let mut tree = RadixTree::new();
        for p in prefixes {
            tree.insert(bits(p), *p);
        }
        tree
    }

    fn sorted(mut values: Vec<&&'static str>) -> Vec<&'static str> {
        values.sort();
        values.into_iter().copied().collect()
    }

    #[test]
    fn test_covering_and_covered() {
        let t = tree(&["10.0.0.0/8", "10.1.0.0/16", "10.1.2.0/24", "10.2.0.0/16", "192.0.2.0/24"]);
        assert_eq!(t.len(), 5);
        assert_eq!(
            sorted(t.covering(&bits("10.1.2.0/24"))),
            vec!["10.0.0.0/8", "10.1.0.0/16", "10.1.2.0/24"]
        );
        assert_eq!(
            sorted(t.covered(&bits("10.0.0.0/8"))),
            vec!["10.0.0.0/8", "10.1.0.0/16", "10.1.2.0/24", "10.2.0.0/16"]
        );
        assert_eq!(sorted(t.covered(&bits("10.1.0.0/15"))), vec!["10.1.0.0/16", "10.1.2.0/24"]);
        assert!(t.covered(&bits("172.16.0.0/12")).is_empty());
    }

    #[test]
    fn test_overlapping_counts_exact_once() {
        let mut t = tree(&["10.0.0.0/8", "10.1.0.0/16", "10.1.2.0/24"]);
        t.insert(bits("10.1.0.0/16"), "10.1.0.0/16-b");
        let found = sorted(t.overlapping(&bits("10.1.0.0/16")));
        assert_eq!(
            found,
            vec!["10.0.0.0/8", "10.1.0.0/16", "10.1.0.0/16-b", "10.1.2.0/24"]
        );
    }

    #[test]
    fn test_insert_order_independent() {
        let a = tree(&["10.1.2.0/24", "10.1.3.0/24", "10.0.0.0/8"]);
        let b = tree(&["10.0.0.0/8", "10.1.3.0/24", "10.1.2.0/24"]);
        for p in ["10.0.0.0/8", "10.1.2.0/24", "10.1.0.0/16"] {
            assert_eq!(sorted(a.overlapping(&bits(p))), sorted(b.overlapping(&bits(p))));
        }
        assert_eq!(a.entries().count(), 3);
    }

    #[test]
    fn test_families_do_not_mix() {
        let t = tree(&["0.0.0.0/0", "::/0"]);
        assert_eq!(sorted(t.covering(&bits("2001:db8::/32"))), vec!["::/0"]);
        assert_eq!(sorted(t.covering(&bits("192.0.2.0/24"))), vec!["0.0.0.0/0"]);
    }
}
