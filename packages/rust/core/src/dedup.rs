//! Run-scoped deduplication by canonical form.

use std::collections::HashSet;

use subharvest_shared::Entry;

/// Collects entries in first-seen order, dropping canonical duplicates.
///
/// State lives in the value, so every run starts from an empty set.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
    entries: Vec<Entry>,
    duplicates: usize,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer an entry. Returns `false` if its canonical form was already seen;
    /// the first holder keeps its source attribution.
    pub fn push(&mut self, entry: Entry) -> bool {
        if self.seen.contains(&entry.canonical) {
            self.duplicates += 1;
            return false;
        }
        self.seen.insert(entry.canonical.clone());
        self.entries.push(entry);
        true
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }
}

impl Extend<Entry> for Deduplicator {
    fn extend<I: IntoIterator<Item = Entry>>(&mut self, iter: I) {
        for entry in iter {
            self.push(entry);
        }
    }
}
