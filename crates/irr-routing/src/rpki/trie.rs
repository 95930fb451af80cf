//! Binary trie of ROAs keyed by prefix bits
//!
//! One trie per address family. A ROA sits at the node reached by walking
//! its own network bits, so the ROAs covering a route are exactly those on
//! the path from the root to the route's prefix.

use ipnetwork::IpNetwork;

use irr_core::{AddressFamily, PrefixBits, Roa};

#[derive(Debug, Default)]
struct TrieNode {
    children: [Option<usize>; 2],
    roas: Vec<usize>,
}

/// ROA lookup structure for bulk validation
#[derive(Debug)]
pub struct RoaTrie {
    v4: Vec<TrieNode>,
    v6: Vec<TrieNode>,
    roas: Vec<Roa>,
}

impl Default for RoaTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl RoaTrie {
    pub fn new() -> Self {
        Self {
            v4: vec![TrieNode::default()],
            v6: vec![TrieNode::default()],
            roas: Vec::new(),
        }
    }

    pub fn from_roas(roas: impl IntoIterator<Item = Roa>) -> Self {
        let mut trie = Self::new();
        for roa in roas {
            trie.insert(roa);
        }
        trie
    }

    fn nodes(&self, family: AddressFamily) -> &[TrieNode] {
        match family {
            AddressFamily::V4 => &self.v4,
            AddressFamily::V6 => &self.v6,
        }
    }

    pub fn insert(&mut self, roa: Roa) {
        let bits = roa.bits();
        let roa_index = self.roas.len();
        self.roas.push(roa);

        let nodes = match bits.family() {
            AddressFamily::V4 => &mut self.v4,
            AddressFamily::V6 => &mut self.v6,
        };
        let mut current = 0;
        for depth in 0..bits.len() {
            let branch = usize::from(bits.bit(depth));
            current = match nodes[current].children[branch] {
                Some(child) => child,
                None => {
                    nodes.push(TrieNode::default());
                    let child = nodes.len() - 1;
                    nodes[current].children[branch] = Some(child);
                    child
                }
            };
        }
        nodes[current].roas.push(roa_index);
    }

    pub fn len(&self) -> usize {
        self.roas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roas.is_empty()
    }

    /// ROAs whose prefix covers or equals `prefix`
    pub fn covering(&self, prefix: &IpNetwork) -> Vec<&Roa> {
        self.covering_bits(&PrefixBits::from_network(prefix))
    }

    pub fn covering_bits(&self, bits: &PrefixBits) -> Vec<&Roa> {
        let nodes = self.nodes(bits.family());
        let mut found = Vec::new();
        let mut current = 0;
        let mut depth = 0;
        loop {
            found.extend(nodes[current].roas.iter().map(|&i| &self.roas[i]));
            if depth == bits.len() {
                break;
            }
            match nodes[current].children[usize::from(bits.bit(depth))] {
                Some(child) => current = child,
                None => break,
            }
            depth += 1;
        }
        found
    }
}
