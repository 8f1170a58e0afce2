//! In-process remote backend.
//!
//! Stores published documents in a shared in-memory table. Backs the test
//! suite and local dry runs; it implements every capability (CRUD, fetch,
//! history) so the full engine surface can be exercised without a server.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::debug;

use crate::docmap::DocRecord;
use crate::document::Document;
use crate::errors::{ConfigError, RemoteError};
use crate::remote::{
    render_links, Fetchable, HasHistory, LinkIndex, RemoteAttrs, RemotePlugin, RevisionInfo,
    UnresolvedRefs,
};

/// One stored revision of one document.
#[derive(Debug, Clone)]
pub struct StoredRevision {
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// One published document.
#[derive(Debug, Clone, Default)]
pub struct StoredDoc {
    pub title: String,
    pub content: String,
    pub unlisted: bool,
    pub revisions: Vec<StoredRevision>,
}

#[derive(Debug, Default)]
struct Inner {
    docs: BTreeMap<String, StoredDoc>,
    next_id: u64,
    create_calls: u64,
    update_calls: u64,
}

/// Shared handle to the backing store, cloneable so tests can inspect state
/// the plugin mutates.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore(Rc<RefCell<Inner>>);

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn doc(&self, remote_id: &str) -> Option<StoredDoc> {
        self.0.borrow().docs.get(remote_id).cloned()
    }

    pub fn doc_count(&self) -> usize {
        self.0.borrow().docs.len()
    }

    /// Calls observed, `(create, update)`. Lets tests assert idempotence.
    pub fn call_counts(&self) -> (u64, u64) {
        let inner = self.0.borrow();
        (inner.create_calls, inner.update_calls)
    }

    /// Seed a document directly, as if published by an earlier operator.
    pub fn seed(&self, remote_id: &str, title: &str, content: &str) {
        let mut inner = self.0.borrow_mut();
        let base_time = Utc::now() - Duration::hours(1);
        inner.docs.insert(
            remote_id.to_string(),
            StoredDoc {
                title: title.to_string(),
                content: content.to_string(),
                unlisted: false,
                revisions: vec![StoredRevision {
                    content: content.to_string(),
                    timestamp: base_time,
                }],
            },
        );
    }

    /// Seed a full revision history for one document, oldest first.
    pub fn seed_history(&self, remote_id: &str, title: &str, contents: &[&str]) {
        let mut inner = self.0.borrow_mut();
        let base_time = Utc::now() - Duration::hours(contents.len() as i64);
        let revisions: Vec<StoredRevision> = contents
            .iter()
            .enumerate()
            .map(|(i, c)| StoredRevision {
                content: c.to_string(),
                timestamp: base_time + Duration::minutes(i as i64),
            })
            .collect();
        let latest = revisions.last().map(|r| r.content.clone()).unwrap_or_default();
        inner.docs.insert(
            remote_id.to_string(),
            StoredDoc {
                title: title.to_string(),
                content: latest,
                unlisted: false,
                revisions,
            },
        );
    }
}

/// The in-process backend plugin.
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    store: MemoryStore,
    /// When false the fetch capability is hidden, for exercising the
    /// capability-absence path.
    supports_fetch: bool,
    supports_history: bool,
}

impl MemoryRemote {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            supports_fetch: true,
            supports_history: true,
        }
    }

    /// Registry constructor; `repoArgs` may disable capabilities.
    pub fn from_args(args: &Value) -> Result<Self, ConfigError> {
        let supports_fetch = args
            .get("fetch")
            .map(|v| v.as_bool().unwrap_or(true))
            .unwrap_or(true);
        let supports_history = args
            .get("history")
            .map(|v| v.as_bool().unwrap_or(true))
            .unwrap_or(true);
        Ok(Self {
            store: MemoryStore::new(),
            supports_fetch,
            supports_history,
        })
    }

    pub fn without_fetch(mut self) -> Self {
        self.supports_fetch = false;
        self
    }

    pub fn without_history(mut self) -> Self {
        self.supports_history = false;
        self
    }

    fn render(
        &self,
        doc: &Document,
        links: &LinkIndex,
        unresolved: &mut UnresolvedRefs,
    ) -> String {
        match doc.text() {
            Some(text) => {
                let (rendered, missing) = render_links(text, links);
                if !missing.is_empty() {
                    debug!(path = doc.rel_path(), missing = missing.len(), "unresolved links");
                    unresolved.push(doc.rel_path(), &doc.title());
                }
                rendered
            }
            // Binary content carries no links.
            None => hex::encode(doc.bytes()),
        }
    }
}

impl RemotePlugin for MemoryRemote {
    fn create_document(
        &mut self,
        doc: &Document,
        record: &DocRecord,
        links: &LinkIndex,
        unresolved: &mut UnresolvedRefs,
    ) -> Result<RemoteAttrs, RemoteError> {
        let content = self.render(doc, links, unresolved);
        let title = doc.title();
        let mut inner = self.store.0.borrow_mut();
        inner.create_calls += 1;
        inner.next_id += 1;
        let id = format!("doc:{}", inner.next_id);
        inner.docs.insert(
            id.clone(),
            StoredDoc {
                title: title.clone(),
                content: content.clone(),
                unlisted: record.unlisted,
                revisions: vec![StoredRevision {
                    content,
                    timestamp: Utc::now(),
                }],
            },
        );
        Ok(RemoteAttrs {
            remote_id: Some(id.clone()),
            remote_path: Some(format!("/posts/{id}")),
            ..Default::default()
        })
    }

    fn update_document(
        &mut self,
        remote_id: &str,
        doc: &Document,
        record: &DocRecord,
        links: &LinkIndex,
        unresolved: &mut UnresolvedRefs,
    ) -> Result<Option<RemoteAttrs>, RemoteError> {
        let content = self.render(doc, links, unresolved);
        let mut inner = self.store.0.borrow_mut();
        inner.update_calls += 1;
        let stored = inner
            .docs
            .get_mut(remote_id)
            .ok_or_else(|| RemoteError::NotFound(remote_id.to_string()))?;
        stored.title = doc.title();
        stored.unlisted = record.unlisted;
        stored.content = content.clone();
        stored.revisions.push(StoredRevision {
            content,
            timestamp: Utc::now(),
        });
        Ok(None)
    }

    fn delete_document(&mut self, remote_id: &str) -> Result<(), RemoteError> {
        self.store
            .0
            .borrow_mut()
            .docs
            .remove(remote_id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(remote_id.to_string()))
    }

    fn list_documents(&self) -> Result<BTreeMap<String, RemoteAttrs>, RemoteError> {
        let inner = self.store.0.borrow();
        Ok(inner
            .docs
            .iter()
            .map(|(id, doc)| {
                let attrs = RemoteAttrs {
                    remote_id: Some(id.clone()),
                    remote_path: Some(format!("/posts/{id}")),
                    extra: BTreeMap::from([(
                        "memoryTitle".to_string(),
                        Value::String(doc.title.clone()),
                    )]),
                    ..Default::default()
                };
                (id.clone(), attrs)
            })
            .collect())
    }

    fn fetchable(&self) -> Option<&dyn Fetchable> {
        self.supports_fetch.then_some(self as &dyn Fetchable)
    }

    fn history(&self) -> Option<&dyn HasHistory> {
        (self.supports_fetch && self.supports_history).then_some(self as &dyn HasHistory)
    }
}

impl Fetchable for MemoryRemote {
    fn get_document(
        &self,
        remote_id: &str,
        revision: Option<&str>,
    ) -> Result<(String, RemoteAttrs), RemoteError> {
        let inner = self.store.0.borrow();
        let doc = inner
            .docs
            .get(remote_id)
            .ok_or_else(|| RemoteError::NotFound(remote_id.to_string()))?;
        let content = match revision {
            Some(rev) => {
                let idx: usize = rev
                    .parse()
                    .map_err(|_| RemoteError::ParseError(format!("bad revision id '{rev}'")))?;
                doc.revisions
                    .get(idx)
                    .ok_or_else(|| RemoteError::NotFound(format!("{remote_id}@{rev}")))?
                    .content
                    .clone()
            }
            None => doc.content.clone(),
        };
        Ok((
            content,
            RemoteAttrs {
                remote_id: Some(remote_id.to_string()),
                remote_path: Some(format!("/posts/{remote_id}")),
                ..Default::default()
            },
        ))
    }
}

impl HasHistory for MemoryRemote {
    fn get_document_history(
        &self,
        remote_id: &str,
    ) -> Result<BTreeMap<String, RevisionInfo>, RemoteError> {
        let inner = self.store.0.borrow();
        let doc = inner
            .docs
            .get(remote_id)
            .ok_or_else(|| RemoteError::NotFound(remote_id.to_string()))?;
        Ok(doc
            .revisions
            .iter()
            .enumerate()
            .map(|(i, rev)| {
                (
                    i.to_string(),
                    RevisionInfo {
                        timestamp: rev.timestamp,
                        attrs: RemoteAttrs::default(),
                    },
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(dir: &std::path::Path, name: &str, text: &str) -> Document {
        std::fs::write(dir.join(name), text).unwrap();
        Document::load(dir, name).unwrap()
    }

    #[test]
    fn test_create_update_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let mut remote = MemoryRemote::new(store.clone());
        let links = LinkIndex::default();
        let mut unresolved = UnresolvedRefs::default();

        let d = doc(dir.path(), "a.md", "# Hello\n\nBody.\n");
        let attrs = remote
            .create_document(&d, &DocRecord::default(), &links, &mut unresolved)
            .unwrap();
        let id = attrs.remote_id.unwrap();
        assert_eq!(store.doc(&id).unwrap().title, "Hello");
        assert!(unresolved.is_empty());

        let d2 = doc(dir.path(), "a.md", "# Hello Again\n");
        remote
            .update_document(&id, &d2, &DocRecord::default(), &links, &mut unresolved)
            .unwrap();
        assert_eq!(store.doc(&id).unwrap().title, "Hello Again");
        assert_eq!(store.doc(&id).unwrap().revisions.len(), 2);

        remote.delete_document(&id).unwrap();
        assert_eq!(store.doc_count(), 0);
        assert!(matches!(
            remote.delete_document(&id),
            Err(RemoteError::NotFound(_))
        ));
    }

    #[test]
    fn test_unresolved_link_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let mut remote = MemoryRemote::new(store);
        let mut unresolved = UnresolvedRefs::default();

        let d = doc(dir.path(), "a.md", "# A\n\nsee [b](b.md)\n");
        remote
            .create_document(&d, &DocRecord::default(), &LinkIndex::default(), &mut unresolved)
            .unwrap();
        assert_eq!(unresolved.titles(), vec!["A".to_string()]);

        // With the location known, the same doc renders clean.
        let mut links = LinkIndex::default();
        links.insert("b.md", "/posts/doc:9");
        let mut second = UnresolvedRefs::default();
        remote
            .update_document("doc:1", &d, &DocRecord::default(), &links, &mut second)
            .unwrap();
        assert!(second.is_empty());
        assert!(remote.store.doc("doc:1").unwrap().content.contains("/posts/doc:9"));
    }

    #[test]
    fn test_capability_toggles() {
        let remote = MemoryRemote::new(MemoryStore::new());
        assert!(remote.fetchable().is_some());
        assert!(remote.history().is_some());

        let no_fetch = MemoryRemote::new(MemoryStore::new()).without_fetch();
        assert!(no_fetch.fetchable().is_none());
        assert!(no_fetch.history().is_none());

        let no_history = MemoryRemote::new(MemoryStore::new()).without_history();
        assert!(no_history.fetchable().is_some());
        assert!(no_history.history().is_none());
    }

    #[test]
    fn test_history_revisions_in_order() {
        let store = MemoryStore::new();
        store.seed_history("doc:5", "Five", &["# v1\n", "# v2\n", "# v3\n"]);
        let remote = MemoryRemote::new(store);
        let history = remote.get_document_history("doc:5").unwrap();
        assert_eq!(history.len(), 3);
        assert!(history["0"].timestamp < history["2"].timestamp);

        let (content, _) = remote.get_document("doc:5", Some("1")).unwrap();
        assert_eq!(content, "# v2\n");
        let (latest, _) = remote.get_document("doc:5", None).unwrap();
        assert_eq!(latest, "# v3\n");
    }
}
