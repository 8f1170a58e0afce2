//! One named remote: its document map, backend plugin, and the push/fetch
//! protocols between them.
//!
//! Push walks the classified diff (new / changed / deleted), drives the
//! plugin, and merges returned attributes back into the map. Documents the
//! plugin could not fully render (cross-references to documents with no
//! remote location yet) land in a shared unresolved set; a fixed-point
//! loop re-renders them after every other document has had a chance to gain
//! a location, stopping when the set empties or stops shrinking.
//!
//! Fetch is idempotent per document: when the retrieved content hash
//! matches the recorded one, nothing is written.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::diff::MapDiff;
use crate::docmap::{
    load_map_file, save_map_file, DocRecord, DocumentMap, LASTPUSH_SUFFIX, STATE_DIR,
};
use crate::document::{content_hash, extension_for_content_type, Document};
use crate::errors::{MapError, SyncError};
use crate::remote::{
    construct, LinkIndex, RemoteAttrs, RemotePlugin, RevisionInfo, UnresolvedRefs,
};

/// Result of one push: what was sent, and what never converged.
#[derive(Debug, Clone, Default)]
pub struct PushOutcome {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    /// Titles of documents whose references never resolved.
    pub unresolved: Vec<String>,
}

impl PushOutcome {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// A named remote endpoint: map + plugin + persistence paths.
pub struct RemoteEndpoint {
    name: String,
    root: PathBuf,
    remote_type: String,
    repo_args: Value,
    docmap: DocumentMap,
    plugin: Box<dyn RemotePlugin>,
}

impl RemoteEndpoint {
    /// Open an existing remote from its persisted map file, constructing the
    /// plugin named there via the registry.
    pub fn open(name: &str, root: &Path) -> Result<Self, SyncError> {
        let path = map_path(root, name);
        let (remote_type, repo_args, docmap) = load_map_file(&path)?;
        let plugin = construct(&remote_type, &repo_args)?;
        info!(name, remote_type = %remote_type, entries = docmap.len(), "opened remote");
        Ok(Self {
            name: name.to_string(),
            root: root.to_path_buf(),
            remote_type,
            repo_args,
            docmap,
            plugin,
        })
    }

    /// Create a new remote with an empty map and persist its map file.
    pub fn create(
        name: &str,
        root: &Path,
        remote_type: &str,
        repo_args: Value,
    ) -> Result<Self, SyncError> {
        let plugin = construct(remote_type, &repo_args)?;
        let endpoint = Self {
            name: name.to_string(),
            root: root.to_path_buf(),
            remote_type: remote_type.to_string(),
            repo_args,
            docmap: DocumentMap::new(),
            plugin,
        };
        endpoint.save_map()?;
        info!(name, remote_type, "created remote");
        Ok(endpoint)
    }

    /// Build an endpoint around an already-constructed plugin (tests, or
    /// callers doing their own wiring).
    pub fn with_plugin(
        name: &str,
        root: &Path,
        remote_type: &str,
        repo_args: Value,
        plugin: Box<dyn RemotePlugin>,
    ) -> Self {
        Self {
            name: name.to_string(),
            root: root.to_path_buf(),
            remote_type: remote_type.to_string(),
            repo_args,
            docmap: DocumentMap::new(),
            plugin,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn remote_type(&self) -> &str {
        &self.remote_type
    }

    pub fn repo_args(&self) -> &Value {
        &self.repo_args
    }

    pub fn docmap(&self) -> &DocumentMap {
        &self.docmap
    }

    pub fn docmap_mut(&mut self) -> &mut DocumentMap {
        &mut self.docmap
    }

    /// Repository-relative path of the canonical map file.
    pub fn map_rel_path(&self) -> String {
        format!("{STATE_DIR}/{}.json", self.name)
    }

    /// Repository-relative path of the last-push baseline snapshot.
    pub fn lastpush_rel_path(&self) -> String {
        format!("{}{LASTPUSH_SUFFIX}", self.map_rel_path())
    }

    /// Persist the current map to its canonical file.
    pub fn save_map(&self) -> Result<(), MapError> {
        save_map_file(
            &map_path(&self.root, &self.name),
            &self.remote_type,
            &self.repo_args,
            &self.docmap,
        )
    }

    /// Persist the current map as the last-push baseline snapshot.
    pub fn save_lastpush(&self) -> Result<(), MapError> {
        save_map_file(
            &self.root.join(self.lastpush_rel_path()),
            &self.remote_type,
            &self.repo_args,
            &self.docmap,
        )
    }

    /// Load the last-push baseline; absent file means nothing was ever
    /// pushed and the baseline is empty.
    pub fn load_baseline(&self) -> Result<DocumentMap, MapError> {
        let path = self.root.join(self.lastpush_rel_path());
        if !path.is_file() {
            return Ok(DocumentMap::new());
        }
        let (_, _, map) = load_map_file(&path)?;
        Ok(map)
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    /// Push changes to the remote.
    ///
    /// With no explicit map, the endpoint's current map is diffed against
    /// the persisted last-push baseline; with one, the given map is diffed
    /// against the endpoint's current map and becomes the source of record
    /// attributes.
    #[instrument(skip_all, fields(remote = %self.name))]
    pub fn push(&mut self, newmap: Option<&DocumentMap>) -> Result<PushOutcome, SyncError> {
        let (diff, source) = match newmap {
            Some(m) => (MapDiff::between(m, &self.docmap)?, m.clone()),
            None => {
                let baseline = self.load_baseline()?;
                (MapDiff::between(&self.docmap, &baseline)?, self.docmap.clone())
            }
        };
        if diff.is_empty() {
            debug!("push diff empty, nothing to send");
            return Ok(PushOutcome::default());
        }
        info!(
            new = diff.new_docs.len(),
            changed = diff.changed_docs.len(),
            deleted = diff.deleted_ids.len(),
            "pushing classified changes"
        );

        let mut links = LinkIndex::from_map(&self.docmap);
        let mut unresolved = UnresolvedRefs::default();
        let mut outcome = PushOutcome::default();

        for path in &diff.new_docs {
            let doc = Document::load(&self.root, path)?;
            let mut record = source.get(path).cloned().unwrap_or_default();
            record.content_hash = Some(doc.content_hash());
            let attrs = self
                .plugin
                .create_document(&doc, &record, &links, &mut unresolved)?;
            attrs.merge_into(&mut record);
            self.index_location(&mut links, path, &record);
            self.docmap.upsert(path, record)?;
            outcome.created.push(path.clone());
        }

        for path in &diff.changed_docs {
            let doc = Document::load(&self.root, path)?;
            let mut record = source.get(path).cloned().unwrap_or_default();
            let remote_id = record.remote_id.clone().ok_or_else(|| {
                MapError::UnknownRemoteId {
                    path: path.clone(),
                    remote_id: "<missing>".into(),
                }
            })?;
            record.content_hash = Some(doc.content_hash());
            if let Some(attrs) =
                self.plugin
                    .update_document(&remote_id, &doc, &record, &links, &mut unresolved)?
            {
                attrs.merge_into(&mut record);
            }
            self.index_location(&mut links, path, &record);
            // A rename lands here with the old path still in the map under
            // the same remote ID; upsert-by-id keys it to the new path.
            if let Some(old_path) = self.docmap.path_for_id(&remote_id).map(String::from) {
                if old_path != *path {
                    self.docmap.delete(&old_path);
                }
            }
            self.docmap.upsert(path, record)?;
            outcome.updated.push(path.clone());
        }

        for remote_id in &diff.deleted_ids {
            self.plugin.delete_document(remote_id)?;
            self.docmap.delete_by_remote_id(remote_id);
            outcome.deleted.push(remote_id.clone());
        }

        outcome.unresolved = self.resolve_references(unresolved, &mut links)?;
        Ok(outcome)
    }

    /// Fixed-point reference resolution: re-render unresolved documents now
    /// that more documents have remote locations. Terminates when the set
    /// empties or stops shrinking; leftovers are reported by title.
    fn resolve_references(
        &mut self,
        mut pending: UnresolvedRefs,
        links: &mut LinkIndex,
    ) -> Result<Vec<String>, SyncError> {
        let mut pass = 0u32;
        while !pending.is_empty() {
            pass += 1;
            debug!(pass, pending = pending.len(), "reference resolution pass");
            let mut next = UnresolvedRefs::default();
            for (path, _title) in pending.iter() {
                let doc = Document::load(&self.root, path)?;
                let Some(record) = self.docmap.get(path).cloned() else {
                    // The document vanished from the map mid-push; nothing
                    // left to re-render.
                    continue;
                };
                let Some(remote_id) = record.remote_id.clone() else {
                    continue;
                };
                let mut record = record;
                if let Some(attrs) =
                    self.plugin
                        .update_document(&remote_id, &doc, &record, links, &mut next)?
                {
                    attrs.merge_into(&mut record);
                }
                self.index_location(links, path, &record);
                self.docmap.upsert(path, record)?;
            }
            if next.len() >= pending.len() {
                let titles = next.titles();
                for title in &titles {
                    warn!(title = %title, "cross-document references never resolved");
                }
                return Ok(titles);
            }
            pending = next;
        }
        Ok(Vec::new())
    }

    fn index_location(&self, links: &mut LinkIndex, path: &str, record: &DocRecord) {
        if let Some(loc) = record.remote_path.as_ref().or(record.remote_id.as_ref()) {
            links.insert(path, loc);
        }
    }

    // -----------------------------------------------------------------------
    // Fetch
    // -----------------------------------------------------------------------

    /// True when the plugin can replay per-document revision history.
    pub fn history_supported(&self) -> bool {
        self.plugin.history().is_some()
    }

    /// Revision history for one remote document.
    pub fn document_history(
        &self,
        remote_id: &str,
    ) -> Result<BTreeMap<String, RevisionInfo>, SyncError> {
        let history = self
            .plugin
            .history()
            .ok_or_else(|| SyncError::HistoryUnsupported(self.name.clone()))?;
        Ok(history.get_document_history(remote_id)?)
    }

    /// Verify fetch capability, ensure the import directory exists, and
    /// return it with the full remote listing.
    pub fn fetch_setup(&mut self) -> Result<(PathBuf, BTreeMap<String, RemoteAttrs>), SyncError> {
        if self.plugin.fetchable().is_none() {
            return Err(SyncError::FetchUnsupported(self.name.clone()));
        }
        let import_dir = self.root.join(format!("{}-import", self.name));
        std::fs::create_dir_all(&import_dir)?;
        let listing = self.plugin.list_documents()?;
        debug!(count = listing.len(), "remote listing retrieved");
        Ok((import_dir, listing))
    }

    /// Import the latest revision of every remote document; returns the
    /// paths actually written.
    #[instrument(skip_all, fields(remote = %self.name))]
    pub fn fetch_latest(&mut self) -> Result<Vec<String>, SyncError> {
        let (import_dir, listing) = self.fetch_setup()?;
        let mut written = Vec::new();
        for remote_id in listing.keys() {
            if let Some(path) = self.import_doc(remote_id, &import_dir, None)? {
                written.push(path);
            }
        }
        info!(written = written.len(), "fetch complete");
        Ok(written)
    }

    /// Retrieve one remote document and write it to its mapped (or
    /// synthesized) local path.
    ///
    /// Per-document retrieval failures are logged and skipped. Returns
    /// `None` when nothing was written: retrieval failed, or the content
    /// hash matches what the map already records (idempotent re-fetch).
    pub fn import_doc(
        &mut self,
        remote_id: &str,
        import_dir: &Path,
        revision: Option<&str>,
    ) -> Result<Option<String>, SyncError> {
        let Some(fetchable) = self.plugin.fetchable() else {
            return Err(SyncError::FetchUnsupported(self.name.clone()));
        };
        let (text, attrs) = match fetchable.get_document(remote_id, revision) {
            Ok(r) => r,
            Err(e) => {
                warn!(remote_id, error = %e, "failed to get document, skipping");
                return Ok(None);
            }
        };

        let mut record = self.docmap.get_by_id(remote_id).cloned().unwrap_or_default();
        record.remote_id = Some(remote_id.to_string());
        attrs.merge_into(&mut record);
        let hash = attrs
            .content_hash
            .clone()
            .unwrap_or_else(|| content_hash(text.as_bytes()));

        if let Some(existing) = self.docmap.get_by_id(remote_id) {
            if existing.content_hash.as_deref() == Some(hash.as_str()) {
                debug!(remote_id, "content unchanged, skipping write");
                return Ok(None);
            }
        }

        let rel_path = match self.docmap.path_for_id(remote_id) {
            Some(p) => p.to_string(),
            None => synthesize_import_path(&self.root, import_dir, remote_id, &attrs),
        };
        record.content_hash = Some(hash);

        let doc = Document::from_text(&self.root, &rel_path, text);
        doc.write()?;
        self.docmap.upsert(&rel_path, record)?;
        debug!(remote_id, path = %rel_path, "imported document");
        Ok(Some(rel_path))
    }
}

/// Canonical map file path for a named remote.
pub fn map_path(root: &Path, name: &str) -> PathBuf {
    root.join(STATE_DIR).join(format!("{name}.json"))
}

/// Default import path for a document with no existing mapping:
/// `<importDir>/<sanitized id>.<ext>`, repository-relative.
fn synthesize_import_path(
    root: &Path,
    import_dir: &Path,
    remote_id: &str,
    attrs: &RemoteAttrs,
) -> String {
    let ext = attrs
        .extra
        .get("contentType")
        .and_then(Value::as_str)
        .map(extension_for_content_type)
        .unwrap_or("md");
    let safe: String = remote_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "-_.".contains(c) { c } else { '-' })
        .collect();
    let abs = import_dir.join(format!("{safe}.{ext}"));
    abs.strip_prefix(root)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|_| abs.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::{MemoryRemote, MemoryStore};

    fn endpoint_with_store(root: &Path) -> (RemoteEndpoint, MemoryStore) {
        let store = MemoryStore::new();
        let plugin = Box::new(MemoryRemote::new(store.clone()));
        let endpoint = RemoteEndpoint::with_plugin(
            "blog",
            root,
            "memory",
            serde_json::json!({}),
            plugin,
        );
        (endpoint, store)
    }

    fn write_doc(root: &Path, rel: &str, text: &str) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, text).unwrap();
    }

    fn stage(endpoint: &mut RemoteEndpoint, rel: &str, root: &Path) {
        let doc = Document::load(root, rel).unwrap();
        let mut rec = endpoint.docmap().get(rel).cloned().unwrap_or_default();
        rec.content_hash = Some(doc.content_hash());
        endpoint.docmap_mut().upsert(rel, rec).unwrap();
    }

    #[test]
    fn test_push_create_edit_delete_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let (mut endpoint, store) = endpoint_with_store(root);

        write_doc(root, "a.md", "# A\n\nfirst\n");
        stage(&mut endpoint, "a.md", root);
        let outcome = endpoint.push(None).unwrap();
        assert_eq!(outcome.created, vec!["a.md"]);
        let id = endpoint.docmap().get("a.md").unwrap().remote_id.clone().unwrap();
        assert_eq!(store.doc(&id).unwrap().title, "A");
        endpoint.save_lastpush().unwrap();

        // Unchanged second push: no plugin calls.
        let calls_before = store.call_counts();
        let outcome = endpoint.push(None).unwrap();
        assert!(outcome.is_noop());
        assert_eq!(store.call_counts(), calls_before);

        // Edit and push again.
        write_doc(root, "a.md", "# A\n\nsecond\n");
        stage(&mut endpoint, "a.md", root);
        let outcome = endpoint.push(None).unwrap();
        assert_eq!(outcome.updated, vec!["a.md"]);
        assert!(store.doc(&id).unwrap().content.contains("second"));
        endpoint.save_lastpush().unwrap();

        // Delete the map entry and push: remote deletion.
        endpoint.docmap_mut().delete("a.md");
        let outcome = endpoint.push(None).unwrap();
        assert_eq!(outcome.deleted, vec![id.clone()]);
        assert_eq!(store.doc_count(), 0);
    }

    #[test]
    fn test_mutual_references_converge_in_one_extra_pass() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let (mut endpoint, store) = endpoint_with_store(root);

        write_doc(root, "a.md", "# A\n\nsee [b](b.md)\n");
        write_doc(root, "b.md", "# B\n\nsee [a](a.md)\n");
        stage(&mut endpoint, "a.md", root);
        stage(&mut endpoint, "b.md", root);

        let outcome = endpoint.push(None).unwrap();
        assert_eq!(outcome.created.len(), 2);
        assert!(outcome.unresolved.is_empty());

        // Both stored documents link to remote locations, not local paths.
        let id_a = endpoint.docmap().get("a.md").unwrap().remote_id.clone().unwrap();
        let id_b = endpoint.docmap().get("b.md").unwrap().remote_id.clone().unwrap();
        assert!(store.doc(&id_a).unwrap().content.contains("/posts/"));
        assert!(store.doc(&id_b).unwrap().content.contains("/posts/"));
        // Two creates; the second document rendered clean because the
        // first's location was already indexed, so only the first needed a
        // resolution update.
        assert_eq!(store.call_counts(), (2, 1));
    }

    #[test]
    fn test_dangling_reference_reported_by_title() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let (mut endpoint, _store) = endpoint_with_store(root);

        write_doc(root, "a.md", "# Lonely\n\nsee [ghost](ghost.md)\n");
        stage(&mut endpoint, "a.md", root);
        let outcome = endpoint.push(None).unwrap();
        assert_eq!(outcome.created, vec!["a.md"]);
        assert_eq!(outcome.unresolved, vec!["Lonely".to_string()]);
    }

    #[test]
    fn test_fetch_roundtrip_and_idempotence() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let (mut endpoint, store) = endpoint_with_store(root);
        store.seed("doc:9", "Nine", "# Nine\n\nbody\n");

        let written = endpoint.fetch_latest().unwrap();
        assert_eq!(written, vec!["blog-import/doc-9.md"]);
        assert!(root.join("blog-import/doc-9.md").is_file());
        assert_eq!(
            endpoint.docmap().path_for_id("doc:9"),
            Some("blog-import/doc-9.md")
        );

        // Second fetch with unchanged remote content writes nothing.
        let written = endpoint.fetch_latest().unwrap();
        assert!(written.is_empty());
    }

    #[test]
    fn test_fetch_uses_existing_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let (mut endpoint, store) = endpoint_with_store(root);
        store.seed("doc:3", "Three", "# Three\n");
        endpoint
            .docmap_mut()
            .upsert(
                "notes/three.md",
                DocRecord {
                    remote_id: Some("doc:3".into()),
                    content_hash: Some("stale".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let written = endpoint.fetch_latest().unwrap();
        assert_eq!(written, vec!["notes/three.md"]);
        assert!(root.join("notes/three.md").is_file());
    }

    #[test]
    fn test_fetch_unsupported_remote() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = Box::new(MemoryRemote::new(MemoryStore::new()).without_fetch());
        let mut endpoint = RemoteEndpoint::with_plugin(
            "blog",
            dir.path(),
            "memory",
            serde_json::json!({}),
            plugin,
        );
        assert!(matches!(
            endpoint.fetch_latest(),
            Err(SyncError::FetchUnsupported(_))
        ));
    }

    #[test]
    fn test_map_file_roundtrip_through_save_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let mut endpoint = RemoteEndpoint::create(
            "blog",
            root,
            "memory",
            serde_json::json!({"fetch": true}),
        )
        .unwrap();
        endpoint
            .docmap_mut()
            .upsert(
                "a.md",
                DocRecord {
                    remote_id: Some("doc:1".into()),
                    content_hash: Some("h".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        endpoint.save_map().unwrap();

        let reopened = RemoteEndpoint::open("blog", root).unwrap();
        assert_eq!(reopened.remote_type(), "memory");
        assert_eq!(reopened.docmap().path_for_id("doc:1"), Some("a.md"));
    }
}
