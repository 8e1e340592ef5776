//! Co-spend clustering.
//!
//! Generators that construct transactions spending several addresses at once
//! record the `key_index` of those addresses here. Key indices are derived
//! from generator offsets, so clusters are identical across runs even though
//! the node wallet's address strings are not. The tracker is a union-find (disjoint-set)
//! structure with path compression and union by rank; elements are created
//! lazily on first mention and clusters only ever merge.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;

/// The tracker injected into every generator of a session, keyed by `key_index`.
pub type CospendTracker = DisjointSet<u64>;

/// Union-find over arbitrary identifiers.
#[derive(Debug, Clone)]
pub struct DisjointSet<T> {
    index: HashMap<T, usize>,
    members: Vec<T>,
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl<T> Default for DisjointSet<T> {
    fn default() -> Self {
        DisjointSet {
            index: HashMap::new(),
            members: Vec::new(),
            parent: Vec::new(),
            rank: Vec::new(),
        }
    }
}

impl<T: Clone + Eq + Hash + Ord> DisjointSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct identifiers mentioned so far.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.index.contains_key(item)
    }

    /// Merge the clusters containing `a` and `b`.
    ///
    /// Unknown identifiers become singletons first. Unioning two members of
    /// the same cluster is a no-op.
    pub fn union(&mut self, a: T, b: T) {
        let ia = self.slot(a);
        let ib = self.slot(b);
        let ra = self.root(ia);
        let rb = self.root(ib);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] = self.rank[ra].saturating_add(1);
            }
        }
    }

    /// Register `item` as a singleton if it has not been seen yet.
    pub fn insert(&mut self, item: T) {
        self.slot(item);
    }

    /// Canonical representative of the cluster containing `item`.
    ///
    /// The representative is stable until the next `union` touching the
    /// cluster. Returns `None` for identifiers never mentioned.
    pub fn find(&mut self, item: &T) -> Option<T> {
        let idx = *self.index.get(item)?;
        let root = self.root(idx);
        Some(self.members[root].clone())
    }

    pub fn same_cluster(&mut self, a: &T, b: &T) -> bool {
        match (self.index.get(a).copied(), self.index.get(b).copied()) {
            (Some(ia), Some(ib)) => self.root(ia) == self.root(ib),
            _ => false,
        }
    }

    /// Every maximal cluster, as the set of its member identifiers.
    ///
    /// Members are sorted within a cluster and clusters are sorted by their
    /// smallest member, so the result depends only on which pairs were
    /// unioned and not on the order of the calls.
    pub fn all(&self) -> Vec<BTreeSet<T>> {
        let mut clusters: BTreeMap<usize, BTreeSet<T>> = BTreeMap::new();
        for (idx, member) in self.members.iter().enumerate() {
            clusters
                .entry(self.root_readonly(idx))
                .or_default()
                .insert(member.clone());
        }
        let mut sets: Vec<BTreeSet<T>> = clusters.into_values().collect();
        sets.sort();
        sets
    }

    fn slot(&mut self, item: T) -> usize {
        if let Some(&idx) = self.index.get(&item) {
            return idx;
        }
        let idx = self.members.len();
        self.index.insert(item.clone(), idx);
        self.members.push(item);
        self.parent.push(idx);
        self.rank.push(0);
        idx
    }

    fn root(&mut self, idx: usize) -> usize {
        let mut root = idx;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression
        let mut cur = idx;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn root_readonly(&self, mut idx: usize) -> usize {
        while self.parent[idx] != idx {
            idx = self.parent[idx];
        }
        idx
    }
}
