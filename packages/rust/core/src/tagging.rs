//! Keyword tagging of entries by their remark.

use std::collections::BTreeMap;

use subharvest_shared::{Buckets, Entry, TagBuckets};

/// Matches entry remarks against configured keyword lists.
#[derive(Debug, Clone, Default)]
pub struct TagMatcher {
    /// Tag name and lowercased keywords, in tag name order.
    tags: Vec<(String, Vec<String>)>,
}

impl TagMatcher {
    pub fn new(tags: &BTreeMap<String, Vec<String>>) -> Self {
        let tags = tags
            .iter()
            .map(|(name, keywords)| {
                let keywords = keywords
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect();
                (name.clone(), keywords)
            })
            .collect();
        Self { tags }
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.tags.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Tags whose keywords occur in the entry's remark (case-insensitive).
    pub fn matches<'a>(&'a self, entry: &Entry) -> impl Iterator<Item = &'a str> + 'a {
        let remark = entry.remark.as_deref().map(str::to_lowercase);
        self.tags.iter().filter_map(move |(name, keywords)| {
            let remark = remark.as_deref()?;
            keywords
                .iter()
                .any(|k| remark.contains(k.as_str()))
                .then_some(name.as_str())
        })
    }

    /// Build the tag view over classified buckets. Every configured tag gets
    /// a (possibly empty) list; entries follow protocol order, then bucket order.
    pub fn apply(&self, buckets: &Buckets) -> TagBuckets {
        let mut out: TagBuckets = self
            .tags
            .iter()
            .map(|(name, _)| (name.clone(), Vec::new()))
            .collect();

        for entry in buckets.values().flatten() {
            for tag in self.matches(entry) {
                if let Some(list) = out.get_mut(tag) {
                    list.push(entry.clone());
                }
            }
        }
        out
    }
}
