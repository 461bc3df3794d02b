//! Append-only deduplicating tables
//!
//! Indices are assigned in order of first insertion and never change for
//! the lifetime of the table.

use std::collections::HashMap;
use std::hash::Hash;

/// String table; index 0 is always the empty string
#[derive(Debug)]
pub struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, usize>,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTable {
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self { strings: Vec::new(), index: HashMap::new() };
        table.intern("");
        table
    }

    pub fn intern(&mut self, s: &str) -> usize {
        if let Some(&idx) = self.index.get(s) {
            return idx;
        }
        let idx = self.strings.len();
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), idx);
        idx
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&str> {
        self.strings.get(idx).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.strings
    }
}

/// Table of `V` deduplicated by an exact-match key `K`
#[derive(Debug)]
pub struct DedupTable<K, V> {
    entries: Vec<V>,
    index: HashMap<K, usize>,
}

impl<K, V> Default for DedupTable<K, V> {
    fn default() -> Self {
        Self { entries: Vec::new(), index: HashMap::new() }
    }
}

impl<K: Hash + Eq, V> DedupTable<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lookup(&self, key: &K) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Index of `key`, building the entry with `make` only if it is new
    pub fn intern_with(&mut self, key: K, make: impl FnOnce() -> V) -> usize {
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.entries.len();
        self.entries.push(make());
        self.index.insert(key, idx);
        idx
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&V> {
        self.entries.get(idx)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<V> {
        self.entries
    }
}
