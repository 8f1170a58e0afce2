//! Durable registry of local rename events.
//!
//! `git mv` (via [`GitRepo::mv`](crate::git::GitRepo::mv)) appends to a
//! per-repository registry file mapping `oldPath -> {commitID: newPath}`.
//! A second registry of identical shape, scoped to a tracking branch,
//! records which moves that branch has already folded into its map; the
//! two are compared during merge reconciliation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::docmap::STATE_DIR;
use crate::errors::MapError;

/// Path of the shared move registry for a repository root.
pub fn registry_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join("moves.json")
}

/// Path of the already-merged registry for one tracking branch.
pub fn merged_registry_path(root: &Path, remote_name: &str) -> PathBuf {
    root.join(STATE_DIR)
        .join(format!("moves-merged-{remote_name}.json"))
}

/// File-backed map of `oldPath -> {commitID: newPath}`.
#[derive(Debug, Clone)]
pub struct MoveRegistry {
    path: PathBuf,
    entries: BTreeMap<String, BTreeMap<String, String>>,
}

impl MoveRegistry {
    /// Load the registry at `path`; a missing file is an empty registry.
    pub fn load(path: &Path) -> Result<Self, MapError> {
        let entries = if path.is_file() {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Record one rename event under the commit that performed it.
    pub fn record(&mut self, old_path: &str, new_path: &str, commit_id: &str) {
        self.entries
            .entry(old_path.to_string())
            .or_default()
            .insert(commit_id.to_string(), new_path.to_string());
    }

    /// Moves recorded for `old_path`, keyed by commit ID.
    pub fn moves_for(&self, old_path: &str) -> Option<&BTreeMap<String, String>> {
        self.entries.get(old_path)
    }

    pub fn contains(&self, old_path: &str, commit_id: &str) -> bool {
        self.entries
            .get(old_path)
            .is_some_and(|m| m.contains_key(commit_id))
    }

    /// Iterate all entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, String>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persist the registry to its file.
    pub fn save(&self) -> Result<(), MapError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut text = serde_json::to_string_pretty(&self.entries)?;
        text.push('\n');
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}
