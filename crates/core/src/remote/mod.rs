//! Remote backend plugins.
//!
//! [`RemotePlugin`] is the base document-CRUD contract every backend must
//! satisfy. Optional capabilities are explicit accessors rather than
//! speculative probing: [`RemotePlugin::fetchable`] gates single-document
//! retrieval and [`RemotePlugin::history`] gates per-document revision
//! history. The [`construct`] registry maps `remoteType` strings from the
//! persisted map file to concrete backends.

pub mod endpoint;
pub mod memory;
pub mod rest;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::docmap::{DocRecord, DocumentMap};
use crate::document::Document;
use crate::errors::{ConfigError, RemoteError};

pub use endpoint::{PushOutcome, RemoteEndpoint};

// ---------------------------------------------------------------------------
// Attribute bags
// ---------------------------------------------------------------------------

/// Attributes returned by a backend after a create/update/get.
///
/// Known fields are typed; everything else rides in `extra` and is merged
/// into the record's passthrough sidecar untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteAttrs {
    pub remote_id: Option<String>,
    pub remote_path: Option<String>,
    pub content_hash: Option<String>,
    pub extra: BTreeMap<String, Value>,
}

impl RemoteAttrs {
    /// Fold these attributes into a map record, overwriting known fields the
    /// backend supplied and passing `extra` through verbatim.
    pub fn merge_into(&self, record: &mut DocRecord) {
        if let Some(id) = &self.remote_id {
            record.remote_id = Some(id.clone());
        }
        if let Some(path) = &self.remote_path {
            record.remote_path = Some(path.clone());
        }
        if let Some(hash) = &self.content_hash {
            record.content_hash = Some(hash.clone());
        }
        for (k, v) in &self.extra {
            record.extra.insert(k.clone(), v.clone());
        }
    }
}

/// Metadata for one remote revision of one document.
#[derive(Debug, Clone)]
pub struct RevisionInfo {
    pub timestamp: DateTime<Utc>,
    pub attrs: RemoteAttrs,
}

// ---------------------------------------------------------------------------
// Link resolution
// ---------------------------------------------------------------------------

/// Read-only view of known remote locations, local path -> remote location,
/// handed to plugins so they can render cross-document links.
#[derive(Debug, Clone, Default)]
pub struct LinkIndex {
    locations: BTreeMap<String, String>,
}

impl LinkIndex {
    /// Build the index from a map's records that have a remote location.
    pub fn from_map(map: &DocumentMap) -> Self {
        let mut index = Self::default();
        for (path, record) in map.iter() {
            if let Some(loc) = record.remote_path.as_ref().or(record.remote_id.as_ref()) {
                index.insert(path, loc);
            }
        }
        index
    }

    pub fn insert(&mut self, local_path: &str, location: &str) {
        self.locations
            .insert(local_path.to_string(), location.to_string());
    }

    pub fn resolve(&self, local_path: &str) -> Option<&str> {
        self.locations.get(local_path).map(String::as_str)
    }
}

/// Shared collector of documents a plugin could not fully render because a
/// referenced document had no known remote location yet.
#[derive(Debug, Clone, Default)]
pub struct UnresolvedRefs {
    docs: Vec<(String, String)>, // (local path, title)
}

impl UnresolvedRefs {
    /// Record an unresolved document, once per path.
    pub fn push(&mut self, local_path: &str, title: &str) {
        if !self.docs.iter().any(|(p, _)| p == local_path) {
            self.docs.push((local_path.to_string(), title.to_string()));
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.docs.iter().map(|(p, t)| (p.as_str(), t.as_str()))
    }

    /// Identifying titles, for non-convergence reporting.
    pub fn titles(&self) -> Vec<String> {
        self.docs.iter().map(|(_, t)| t.clone()).collect()
    }
}

/// Render Markdown-style local links (`](relative/path.md)`) against a
/// [`LinkIndex`], returning the rendered text and the link targets that had
/// no known remote location.
///
/// Absolute URLs and anchors pass through untouched. Shared by backends so
/// they agree on what counts as a cross-document reference.
pub fn render_links(text: &str, links: &LinkIndex) -> (String, Vec<String>) {
    let mut out = String::with_capacity(text.len());
    let mut unresolved = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("](") {
        let (head, tail) = rest.split_at(open + 2);
        out.push_str(head);
        let Some(close) = tail.find(')') else {
            rest = tail;
            break;
        };
        let target = &tail[..close];
        if target.contains("://") || target.starts_with('#') || target.is_empty() {
            out.push_str(target);
        } else {
            match links.resolve(target) {
                Some(loc) => out.push_str(loc),
                None => {
                    unresolved.push(target.to_string());
                    out.push_str(target);
                }
            }
        }
        rest = &tail[close..];
    }
    out.push_str(rest);
    (out, unresolved)
}

// ---------------------------------------------------------------------------
// Plugin contract
// ---------------------------------------------------------------------------

/// Base document-CRUD contract every backend must implement.
pub trait RemotePlugin {
    /// Publish a new document; the returned attributes must include the
    /// assigned remote ID.
    fn create_document(
        &mut self,
        doc: &Document,
        record: &DocRecord,
        links: &LinkIndex,
        unresolved: &mut UnresolvedRefs,
    ) -> Result<RemoteAttrs, RemoteError>;

    /// Replace the content of an existing remote document.
    fn update_document(
        &mut self,
        remote_id: &str,
        doc: &Document,
        record: &DocRecord,
        links: &LinkIndex,
        unresolved: &mut UnresolvedRefs,
    ) -> Result<Option<RemoteAttrs>, RemoteError>;

    /// Delete a remote document.
    fn delete_document(&mut self, remote_id: &str) -> Result<(), RemoteError>;

    /// Full remote listing, remote ID -> attributes.
    fn list_documents(&self) -> Result<BTreeMap<String, RemoteAttrs>, RemoteError>;

    /// Single-document retrieval capability; `None` disables fetch.
    fn fetchable(&self) -> Option<&dyn Fetchable> {
        None
    }

    /// Revision-history capability; `None` selects latest-snapshot fetch.
    fn history(&self) -> Option<&dyn HasHistory> {
        None
    }
}

/// Optional capability: retrieve one document (optionally at a revision).
pub trait Fetchable {
    fn get_document(
        &self,
        remote_id: &str,
        revision: Option<&str>,
    ) -> Result<(String, RemoteAttrs), RemoteError>;
}

/// Optional capability: per-document revision history.
pub trait HasHistory {
    /// Revision ID -> revision metadata for one document.
    fn get_document_history(
        &self,
        remote_id: &str,
    ) -> Result<BTreeMap<String, RevisionInfo>, RemoteError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Construct a backend from a `remoteType` selector and its `repoArgs`.
///
/// This is the explicit registry replacing by-name dynamic lookup: adding a
/// backend means adding an arm here.
pub fn construct(
    remote_type: &str,
    repo_args: &Value,
) -> Result<Box<dyn RemotePlugin>, ConfigError> {
    match remote_type {
        "rest" => Ok(Box::new(rest::RestRemote::from_args(repo_args)?)),
        "memory" => Ok(Box::new(memory::MemoryRemote::from_args(repo_args)?)),
        other => Err(ConfigError::UnknownRemoteType(other.to_string())),
    }
}

/// `remoteType` selectors accepted by [`construct`].
pub fn known_remote_types() -> &'static [&'static str] {
    &["rest", "memory"]
}
