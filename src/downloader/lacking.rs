// Lacking Set - bounded record of items a peer is known not to have
//
// Once full, an arbitrary existing entry makes room for the new one. The
// victim is picked uniformly at random, not by age.

use crate::primitives::Hash;
use rand::Rng;
use std::collections::HashMap;

/// Default cap on remembered lacking items per peer
pub const MAX_LACKING_HASHES: usize = 4096;

/// Bounded negative cache with O(1) insert, lookup and random eviction
#[derive(Clone, Debug)]
pub struct LackingSet {
    capacity: usize,
    items: Vec<Hash>,
    index: HashMap<Hash, usize>,
}

impl Default for LackingSet {
    fn default() -> Self {
        Self::new(MAX_LACKING_HASHES)
    }
}

impl LackingSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.index.contains_key(hash)
    }

    /// Remember `hash`, evicting a random entry if the set is full.
    ///
    /// Returns the evicted hash, if any.
    pub fn insert(&mut self, hash: Hash) -> Option<Hash> {
        if self.capacity == 0 || self.index.contains_key(&hash) {
            return None;
        }
        let mut evicted = None;
        while self.items.len() >= self.capacity {
            let victim = rand::thread_rng().gen_range(0..self.items.len());
            evicted = Some(self.remove_at(victim));
        }
        self.index.insert(hash, self.items.len());
        self.items.push(hash);
        evicted
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hash> {
        self.items.iter()
    }

    fn remove_at(&mut self, pos: usize) -> Hash {
        let removed = self.items.swap_remove(pos);
        self.index.remove(&removed);
        if let Some(moved) = self.items.get(pos) {
            self.index.insert(*moved, pos);
        }
        removed
    }
}
