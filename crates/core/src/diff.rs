//! Pure diff/classification between two [`DocumentMap`] snapshots.
//!
//! [`MapDiff::between`] partitions the new map's paths into **new** and
//! **changed** sets and the baseline's remote IDs into a **deleted** set.
//! The partitions are disjoint; every path in the new map lands in exactly
//! one of {new, changed, unchanged}.
//!
//! Integrity violations (a remote ID the baseline has never seen, or the
//! same path carrying different remote IDs in the two snapshots) abort the
//! diff with a fatal [`MapError`]; they mean local and remote state have
//! diverged beyond what synchronization can repair.

use crate::docmap::{DocRecord, DocumentMap};
use crate::errors::MapError;

/// Classified difference between a new map and a baseline map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapDiff {
    /// Paths present in the new map with no remote ID: never published.
    pub new_docs: Vec<String>,
    /// Published paths whose content hash differs from the baseline.
    pub changed_docs: Vec<String>,
    /// Remote IDs present in the baseline but gone from the new map.
    pub deleted_ids: Vec<String>,
}

impl MapDiff {
    /// Compute the diff of `newmap` against `baseline`.
    pub fn between(newmap: &DocumentMap, baseline: &DocumentMap) -> Result<Self, MapError> {
        let mut diff = MapDiff::default();

        for (path, record) in newmap.iter() {
            let Some(id) = record.remote_id.as_deref() else {
                diff.new_docs.push(path.to_string());
                continue;
            };
            if let Some(base) = baseline.get(path) {
                match base.remote_id.as_deref() {
                    Some(base_id) if base_id == id => {
                        if hash_differs(record, base) {
                            diff.changed_docs.push(path.to_string());
                        }
                    }
                    other => {
                        return Err(MapError::MismatchedRemoteId {
                            path: path.to_string(),
                            new_id: id.to_string(),
                            baseline_id: other.unwrap_or("unpublished").to_string(),
                        });
                    }
                }
            } else if let Some(base) = baseline.get_by_id(id) {
                // Hash-stable renames land here: same remote document, new
                // path. Only re-push when the content actually moved on.
                if hash_differs(record, base) {
                    diff.changed_docs.push(path.to_string());
                }
            } else {
                return Err(MapError::UnknownRemoteId {
                    path: path.to_string(),
                    remote_id: id.to_string(),
                });
            }
        }

        for id in baseline.remote_ids() {
            if newmap.path_for_id(id).is_none() {
                diff.deleted_ids.push(id.to_string());
            }
        }

        Ok(diff)
    }

    pub fn is_empty(&self) -> bool {
        self.new_docs.is_empty() && self.changed_docs.is_empty() && self.deleted_ids.is_empty()
    }
}

/// Changed iff the hashes differ or the baseline never recorded one.
fn hash_differs(new: &DocRecord, base: &DocRecord) -> bool {
    base.content_hash.is_none() || new.content_hash != base.content_hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: Option<&str>, hash: Option<&str>) -> DocRecord {
        DocRecord {
            remote_id: id.map(String::from),
            content_hash: hash.map(String::from),
            ..Default::default()
        }
    }

    fn map(entries: &[(&str, Option<&str>, Option<&str>)]) -> DocumentMap {
        let mut m = DocumentMap::new();
        for (path, id, hash) in entries {
            m.upsert(path, record(*id, *hash)).unwrap();
        }
        m
    }

    #[test]
    fn test_unpublished_doc_is_new() {
        let new = map(&[("a.md", None, Some("h1"))]);
        let diff = MapDiff::between(&new, &DocumentMap::new()).unwrap();
        assert_eq!(diff.new_docs, vec!["a.md"]);
        assert!(diff.changed_docs.is_empty());
        assert!(diff.deleted_ids.is_empty());
    }

    #[test]
    fn test_identical_maps_yield_empty_diff() {
        let m = map(&[("a.md", Some("post:1"), Some("h1"))]);
        assert!(MapDiff::between(&m, &m.clone()).unwrap().is_empty());
    }

    #[test]
    fn test_hash_change_is_changed() {
        let base = map(&[("a.md", Some("post:1"), Some("h1"))]);
        let new = map(&[("a.md", Some("post:1"), Some("h2"))]);
        let diff = MapDiff::between(&new, &base).unwrap();
        assert_eq!(diff.changed_docs, vec!["a.md"]);
        assert!(diff.new_docs.is_empty());
    }

    #[test]
    fn test_missing_baseline_hash_is_changed() {
        let base = map(&[("a.md", Some("post:1"), None)]);
        let new = map(&[("a.md", Some("post:1"), Some("h1"))]);
        let diff = MapDiff::between(&new, &base).unwrap();
        assert_eq!(diff.changed_docs, vec!["a.md"]);
    }

    #[test]
    fn test_hash_stable_rename_is_unchanged() {
        let base = map(&[("old.md", Some("post:1"), Some("h1"))]);
        let new = map(&[("new.md", Some("post:1"), Some("h1"))]);
        let diff = MapDiff::between(&new, &base).unwrap();
        assert!(diff.new_docs.is_empty());
        assert!(diff.changed_docs.is_empty());
        assert!(diff.deleted_ids.is_empty());
    }

    #[test]
    fn test_rename_with_edit_is_changed() {
        let base = map(&[("old.md", Some("post:1"), Some("h1"))]);
        let new = map(&[("new.md", Some("post:1"), Some("h2"))]);
        let diff = MapDiff::between(&new, &base).unwrap();
        assert_eq!(diff.changed_docs, vec!["new.md"]);
    }

    #[test]
    fn test_removed_entry_is_deleted() {
        let base = map(&[
            ("a.md", Some("post:1"), Some("h1")),
            ("b.md", Some("post:2"), Some("h2")),
        ]);
        let new = map(&[("a.md", Some("post:1"), Some("h1"))]);
        let diff = MapDiff::between(&new, &base).unwrap();
        assert_eq!(diff.deleted_ids, vec!["post:2"]);
    }

    #[test]
    fn test_unknown_remote_id_is_fatal() {
        let new = map(&[("a.md", Some("post:9"), Some("h1"))]);
        let err = MapDiff::between(&new, &DocumentMap::new()).unwrap_err();
        assert!(matches!(err, MapError::UnknownRemoteId { .. }));
        assert!(err.is_integrity_violation());
    }

    #[test]
    fn test_mismatched_remote_id_is_fatal() {
        let base = map(&[("a.md", Some("post:1"), Some("h1"))]);
        let new = map(&[("a.md", Some("post:2"), Some("h1"))]);
        let err = MapDiff::between(&new, &base).unwrap_err();
        assert!(matches!(err, MapError::MismatchedRemoteId { .. }));
    }

    #[test]
    fn test_partitions_are_disjoint() {
        let base = map(&[
            ("keep.md", Some("post:1"), Some("h1")),
            ("edit.md", Some("post:2"), Some("h2")),
            ("drop.md", Some("post:3"), Some("h3")),
        ]);
        let new = map(&[
            ("keep.md", Some("post:1"), Some("h1")),
            ("edit.md", Some("post:2"), Some("h2b")),
            ("fresh.md", None, Some("h4")),
        ]);
        let diff = MapDiff::between(&new, &base).unwrap();
        assert_eq!(diff.new_docs, vec!["fresh.md"]);
        assert_eq!(diff.changed_docs, vec!["edit.md"]);
        assert_eq!(diff.deleted_ids, vec!["post:3"]);
        for p in &diff.new_docs {
            assert!(!diff.changed_docs.contains(p));
        }
    }

    // Full push lifecycle: create, edit, delete.
    #[test]
    fn test_lifecycle_scenario() {
        // Never published: new.
        let draft = map(&[("a.txt", None, Some("H1"))]);
        let diff = MapDiff::between(&draft, &DocumentMap::new()).unwrap();
        assert_eq!(diff.new_docs, vec!["a.txt"]);

        // Push assigned post:7; the post-push snapshot is the new baseline.
        let pushed = map(&[("a.txt", Some("post:7"), Some("H1"))]);
        assert!(MapDiff::between(&pushed, &pushed.clone()).unwrap().is_empty());

        // Edit to H2: changed.
        let edited = map(&[("a.txt", Some("post:7"), Some("H2"))]);
        let diff = MapDiff::between(&edited, &pushed).unwrap();
        assert_eq!(diff.changed_docs, vec!["a.txt"]);

        // Entry dropped entirely: post:7 deleted.
        let diff = MapDiff::between(&DocumentMap::new(), &pushed).unwrap();
        assert_eq!(diff.deleted_ids, vec!["post:7"]);
    }
}
