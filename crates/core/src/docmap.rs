//! The document map: the durable sync state for one remote.
//!
//! A [`DocumentMap`] indexes [`DocRecord`]s two ways: by local path
//! (primary key) and by remote document ID (inverse index). The inverse
//! index is a bijection: no two live records may share a remote ID, and
//! every mutation keeps both indexes consistent.
//!
//! Persistence is a JSON file per remote (`.gitpub/<name>.json`) holding
//! `remoteType`, `repoArgs`, `docDict` and the derived `revDict`. A second
//! file with a `.lastpush` suffix holds the snapshot as of the last
//! successful push.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::Document;
use crate::errors::MapError;

/// Name of the per-repository state directory.
pub const STATE_DIR: &str = ".gitpub";

/// Suffix of the last-push baseline snapshot file.
pub const LASTPUSH_SUFFIX: &str = ".lastpush";

// ---------------------------------------------------------------------------
// DocRecord
// ---------------------------------------------------------------------------

/// Per-document sync attributes.
///
/// Known fields are typed; anything else a backend returns is carried in
/// `extra` verbatim (serde `flatten`) and handed back on the next call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocRecord {
    /// Repository-relative path, duplicated into the record so the inverse
    /// index entries are self-describing on disk.
    #[serde(default)]
    pub local_path: String,

    /// Remote document identifier; absent until first published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,

    /// Digest of the last-synchronized content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    /// Display/location path on the remote, if the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,

    /// Published but excluded from the remote's public listing.
    #[serde(default)]
    pub unlisted: bool,

    /// Remote revision ID -> local commit ID, populated by history import.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub revision_commits: BTreeMap<String, String>,

    /// Backend-namespaced passthrough attributes.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// DocumentMap
// ---------------------------------------------------------------------------

/// Bidirectional path <-> remote-ID mapping for one remote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentMap {
    /// Primary index: local path -> record.
    docs: BTreeMap<String, DocRecord>,
    /// Inverse index: remote ID -> local path.
    rev: BTreeMap<String, String>,
}

impl DocumentMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&DocRecord> {
        self.docs.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.docs.contains_key(path)
    }

    /// Local path owning the given remote ID, if any.
    pub fn path_for_id(&self, remote_id: &str) -> Option<&str> {
        self.rev.get(remote_id).map(String::as_str)
    }

    pub fn get_by_id(&self, remote_id: &str) -> Option<&DocRecord> {
        self.path_for_id(remote_id).and_then(|p| self.docs.get(p))
    }

    /// Iterate records in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DocRecord)> {
        self.docs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterate the remote IDs in the inverse index.
    pub fn remote_ids(&self) -> impl Iterator<Item = &str> {
        self.rev.keys().map(String::as_str)
    }

    /// Insert or replace the record for `path`, refreshing the inverse index.
    ///
    /// A stale inverse entry left by a previous record at this path is
    /// retired first; claiming a remote ID owned by a different live path is
    /// a bijection violation.
    pub fn upsert(&mut self, path: &str, mut record: DocRecord) -> Result<(), MapError> {
        record.local_path = path.to_string();
        if let Some(old) = self.docs.get(path) {
            if let Some(old_id) = &old.remote_id {
                if record.remote_id.as_deref() != Some(old_id.as_str()) {
                    self.rev.remove(old_id);
                }
            }
        }
        if let Some(id) = &record.remote_id {
            match self.rev.get(id) {
                Some(owner) if owner != path => {
                    return Err(MapError::DuplicateRemoteId(id.clone()));
                }
                _ => {
                    self.rev.insert(id.clone(), path.to_string());
                }
            }
        }
        self.docs.insert(path.to_string(), record);
        Ok(())
    }

    /// Remove the record for `path` (and its inverse entry, if any).
    pub fn delete(&mut self, path: &str) -> Option<DocRecord> {
        let record = self.docs.remove(path)?;
        if let Some(id) = &record.remote_id {
            self.rev.remove(id);
        }
        Some(record)
    }

    /// Remove the record owning `remote_id` from both indexes.
    pub fn delete_by_remote_id(&mut self, remote_id: &str) -> Option<DocRecord> {
        let path = self.rev.remove(remote_id)?;
        self.docs.remove(&path)
    }

    /// Re-key a record from `old_path` to `new_path`, carrying the inverse
    /// entry forward. Returns `false` when `old_path` is not tracked.
    pub fn rename(&mut self, old_path: &str, new_path: &str) -> Result<bool, MapError> {
        let Some(record) = self.docs.remove(old_path) else {
            return Ok(false);
        };
        // An existing record at the destination is overwritten; retire its
        // inverse entry so the bijection holds.
        if let Some(dest) = self.docs.remove(new_path) {
            if let Some(id) = &dest.remote_id {
                if record.remote_id.as_deref() != Some(id.as_str()) {
                    self.rev.remove(id);
                }
            }
        }
        if let Some(id) = &record.remote_id {
            self.rev.insert(id.clone(), new_path.to_string());
        }
        let mut record = record;
        record.local_path = new_path.to_string();
        self.docs.insert(new_path.to_string(), record);
        debug!(old = old_path, new = new_path, "renamed map entry");
        Ok(true)
    }

    /// Recompute content hashes for every mapped path against the current
    /// file content under `root`. Returns the paths whose hash changed.
    ///
    /// Paths whose file is missing are left untouched (deletion is staged
    /// explicitly, not inferred here).
    pub fn update_hashes(&mut self, root: &Path) -> Result<Vec<String>, MapError> {
        let mut changed = Vec::new();
        let paths: Vec<String> = self.docs.keys().cloned().collect();
        for path in paths {
            let doc = match Document::load(root, &path) {
                Ok(d) => d,
                Err(e) => {
                    warn!(path = %path, error = %e, "skipping hash refresh");
                    continue;
                }
            };
            let hash = doc.content_hash();
            if let Some(record) = self.docs.get_mut(&path) {
                if record.content_hash.as_deref() != Some(hash.as_str()) {
                    record.content_hash = Some(hash);
                    changed.push(path);
                }
            }
        }
        Ok(changed)
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// On-disk shape of a persisted map file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapFile {
    remote_type: String,
    repo_args: serde_json::Value,
    doc_dict: BTreeMap<String, DocRecord>,
    rev_dict: BTreeMap<String, DocRecord>,
}

/// Load a persisted map file, returning the backend selector, its
/// constructor arguments, and the rebuilt map.
///
/// `revDict` on disk is advisory; the inverse index is rebuilt from
/// `docDict`, which also re-checks the bijection invariant.
pub fn load_map_file(path: &Path) -> Result<(String, serde_json::Value, DocumentMap), MapError> {
    let text = std::fs::read_to_string(path)?;
    let file: MapFile = serde_json::from_str(&text)?;
    let mut map = DocumentMap::new();
    for (path, record) in file.doc_dict {
        map.upsert(&path, record)?;
    }
    Ok((file.remote_type, file.repo_args, map))
}

/// Persist a map to `path` as pretty-printed JSON with a trailing newline.
pub fn save_map_file(
    path: &Path,
    remote_type: &str,
    repo_args: &serde_json::Value,
    map: &DocumentMap,
) -> Result<(), MapError> {
    let rev_dict: BTreeMap<String, DocRecord> = map
        .iter()
        .filter_map(|(_, r)| r.remote_id.clone().map(|id| (id, r.clone())))
        .collect();
    let file = MapFile {
        remote_type: remote_type.to_string(),
        repo_args: repo_args.clone(),
        doc_dict: map.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        rev_dict,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut text = serde_json::to_string_pretty(&file)?;
    text.push('\n');
    std::fs::write(path, text)?;
    debug!(path = %path.display(), entries = map.len(), "saved map file");
    Ok(())
}
