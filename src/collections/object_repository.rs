use std::collections::HashMap;

use itertools::Itertools;

#[cfg(test)]
#[path = "object_repository_tests.rs"]
mod tests;

/// An unordered keyed map with copy-on-insert: stored values are clones, so later
/// mutations of the caller's value never leak into the repository.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectRepository<V: Clone> {
    entries: HashMap<String, V>,
}

impl<V: Clone> ObjectRepository<V> {
    pub fn new() -> Self {
        ObjectRepository { entries: HashMap::new() }
    }

    pub fn upsert_by_id(&mut self, id: &str, value: &V) {
        self.entries.insert(id.to_owned(), value.clone());
    }

    pub fn find_by_id(&self, id: &str) -> Option<&V> {
        self.entries.get(id)
    }

    pub fn find_all(&self) -> Vec<&V> {
        self.entries.values().collect_vec()
    }

    pub fn delete_by_id(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<V> {
        self.entries.values().cloned().collect_vec()
    }
}
