//! Record-level change detection between two snapshots of one target.
//!
//! Rows are matched by natural key and compared by `record_hash` only, so
//! no column-by-column comparison is needed. Nothing in the import path
//! calls this; it serves consumers comparing import generations.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::hashing::Digest;

/// One row reduced to its natural key and record hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedHash {
    pub key: String,
    pub record_hash: Digest,
}

impl KeyedHash {
    pub fn new(key: impl Into<String>, record_hash: Digest) -> Self {
        Self {
            key: key.into(),
            record_hash,
        }
    }
}

/// Natural keys classified by how they changed, each list sorted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
    pub unchanged: Vec<String>,
}

impl RecordDiff {
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty())
    }
}

/// Classify rows of `new` against rows of `old`.
pub fn diff_records(old: &[KeyedHash], new: &[KeyedHash]) -> RecordDiff {
    let old: BTreeMap<&str, &Digest> = old.iter().map(|r| (r.key.as_str(), &r.record_hash)).collect();
    let new: BTreeMap<&str, &Digest> = new.iter().map(|r| (r.key.as_str(), &r.record_hash)).collect();

    let mut diff = RecordDiff::default();
    for (key, hash) in &new {
        match old.get(key) {
            None => diff.added.push(key.to_string()),
            Some(prev) if prev == hash => diff.unchanged.push(key.to_string()),
            Some(_) => diff.modified.push(key.to_string()),
        }
    }
    diff.removed = old
        .keys()
        .filter(|k| !new.contains_key(*k))
        .map(|k| k.to_string())
        .collect();
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::source_hash;

    #[test]
    fn test_diff_classifies_all_four_cases() {
        let old = vec![
            KeyedHash::new("Line1/A", source_hash(b"1")),
            KeyedHash::new("Line1/B", source_hash(b"2")),
            KeyedHash::new("Line1/C", source_hash(b"3")),
        ];
        let new = vec![
            KeyedHash::new("Line1/A", source_hash(b"1")),
            KeyedHash::new("Line1/B", source_hash(b"changed")),
            KeyedHash::new("Line1/D", source_hash(b"4")),
        ];

        let diff = diff_records(&old, &new);
        assert_eq!(diff.unchanged, vec!["Line1/A"]);
        assert_eq!(diff.modified, vec!["Line1/B"]);
        assert_eq!(diff.added, vec!["Line1/D"]);
        assert_eq!(diff.removed, vec!["Line1/C"]);
        assert!(diff.has_changes());
    }

    #[test]
    fn test_identical_generations_have_no_changes() {
        let rows = vec![KeyedHash::new("k", source_hash(b"v"))];
        let diff = diff_records(&rows, &rows);
        assert!(!diff.has_changes());
        assert_eq!(diff.unchanged.len(), 1);
    }
}
