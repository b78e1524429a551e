//! Partition unique entries into per-protocol buckets.

use subharvest_shared::{Buckets, Entry, EntryOrdering};

/// Group entries by protocol. Every entry lands in exactly one bucket; with
/// [`EntryOrdering::FirstSeen`] input order is kept within each bucket.
pub fn classify(entries: Vec<Entry>, ordering: EntryOrdering) -> Buckets {
    let mut buckets = Buckets::new();
    for entry in entries {
        buckets.entry(entry.protocol).or_default().push(entry);
    }

    if ordering == EntryOrdering::Sorted {
        for bucket in buckets.values_mut() {
            bucket.sort_by(|a, b| a.canonical.cmp(&b.canonical));
        }
    }

    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use subharvest_shared::Protocol;

    fn entry(protocol: Protocol, canonical: &str) -> Entry {
        Entry {
            protocol,
            canonical: canonical.into(),
            source_id: "s".into(),
            remark: None,
        }
    }

    fn input() -> Vec<Entry> {
        vec![
            entry(Protocol::Vless, "vless://z@h:1"),
            entry(Protocol::Trojan, "trojan://p@h:1"),
            entry(Protocol::Vless, "vless://a@h:1"),
        ]
    }

    #[test]
    fn groups_by_protocol_preserving_order() {
        let buckets = classify(input(), EntryOrdering::FirstSeen);
        assert_eq!(buckets.len(), 2);
        let vless: Vec<&str> = buckets[&Protocol::Vless]
            .iter()
            .map(|e| e.canonical.as_str())
            .collect();
        assert_eq!(vless, ["vless://z@h:1", "vless://a@h:1"]);
        assert_eq!(buckets.values().map(Vec::len).sum::<usize>(), 3);
    }

    #[test]
    fn sorted_ordering_sorts_within_bucket() {
        let buckets = classify(input(), EntryOrdering::Sorted);
        assert_eq!(buckets[&Protocol::Vless][0].canonical, "vless://a@h:1");
    }

    #[test]
    fn no_entries_no_buckets() {
        assert!(classify(vec![], EntryOrdering::FirstSeen).is_empty());
    }
}
