//! Per-query memoization with a hard size ceiling.

use std::{collections::hash_map::Entry, hash::Hash};

use ahash::AHashMap as HashMap;
use tracing::debug;

/// Map with a capacity ceiling. When full and asked for an absent key it is
/// cleared wholesale before the new entry goes in; entries are never evicted
/// one by one, so references handed out stay valid until the next insert.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    name: &'static str,
    capacity: usize,
    map: HashMap<K, V>,
    accesses: u64,
    misses: u64,
}

impl<K: Hash + Eq, V> BoundedCache<K, V> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            map: HashMap::new(),
            accesses: 0,
            misses: 0,
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    pub fn get_or_insert_with(&mut self, key: K, load: impl FnOnce(&K) -> V) -> &V {
        self.accesses += 1;
        if self.map.len() >= self.capacity && !self.map.contains_key(&key) {
            self.map.clear();
        }
        match self.map.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                self.misses += 1;
                let value = load(entry.key());
                entry.insert(value)
            }
        }
    }

    /// Like [`Self::get_or_insert_with`], but a failed load leaves the cache
    /// unchanged.
    pub fn get_or_try_insert_with<E>(
        &mut self,
        key: K,
        load: impl FnOnce(&K) -> Result<V, E>,
    ) -> Result<&V, E> {
        self.accesses += 1;
        if self.map.contains_key(&key) {
            return Ok(&self.map[&key]);
        }
        self.misses += 1;
        let value = load(&key)?;
        if self.map.len() >= self.capacity {
            self.map.clear();
        }
        Ok(self.map.entry(key).or_insert(value))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn accesses(&self) -> u64 {
        self.accesses
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Drops every entry and logs and zeroes the access statistics.
    pub fn reset(&mut self) {
        if self.accesses > 0 {
            debug!(
                cache = self.name,
                accesses = self.accesses,
                misses = self.misses,
                entries = self.map.len(),
                "Cache stats"
            );
        }
        self.map.clear();
        self.accesses = 0;
        self.misses = 0;
    }
}
