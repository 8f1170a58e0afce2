//! Blog-style REST API backend.
//!
//! Talks JSON to a generic document-publishing HTTP API:
//!
//! - `POST   {base}/api/documents`              create
//! - `PUT    {base}/api/documents/{id}`         update
//! - `DELETE {base}/api/documents/{id}`         delete
//! - `GET    {base}/api/documents`              listing
//! - `GET    {base}/api/documents/{id}`         single fetch (capability)
//! - `GET    {base}/api/documents/{id}/history` revision history (capability)
//!
//! Fields the engine does not understand are kept in the attribute sidecar
//! and sent back unmodified on the next update.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::docmap::DocRecord;
use crate::document::Document;
use crate::errors::{ConfigError, RemoteError};
use crate::remote::{
    render_links, Fetchable, HasHistory, LinkIndex, RemoteAttrs, RemotePlugin, RevisionInfo,
    UnresolvedRefs,
};

/// Blocking JSON client for a blog-style document API.
#[derive(Debug)]
pub struct RestRemote {
    client: Client,
    base_url: String,
    token: Option<String>,
    /// Capability flags, from `repoArgs`; servers without the single-GET or
    /// history routes advertise that in their remote definition.
    supports_fetch: bool,
    supports_history: bool,
}

/// Wire shape of a document resource.
#[derive(Debug, Deserialize)]
struct DocResource {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    content_hash: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RevisionResource {
    id: String,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl RestRemote {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            supports_fetch: true,
            supports_history: false,
        }
    }

    /// Registry constructor from persisted `repoArgs`.
    ///
    /// Expects `{"url": ..., "token": ..?, "fetch": ..?, "history": ..?}`.
    pub fn from_args(args: &Value) -> Result<Self, ConfigError> {
        let url = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "repoArgs.url".into(),
                detail: "rest remotes require a base URL".into(),
            })?;
        let token = args.get("token").and_then(Value::as_str).map(String::from);
        let mut remote = Self::new(url, token);
        if let Some(v) = args.get("fetch").and_then(Value::as_bool) {
            remote.supports_fetch = v;
        }
        if let Some(v) = args.get("history").and_then(Value::as_bool) {
            remote.supports_history = v;
        }
        Ok(remote)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one request; `target` names what is being addressed so a 404
    /// can report the missing document rather than the bare status line.
    fn request(
        &self,
        target: &str,
        build: impl FnOnce(&Client) -> reqwest::blocking::RequestBuilder,
    ) -> Result<Value, RemoteError> {
        let mut req = build(&self.client);
        if let Some(token) = &self.token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let resp = req.send()?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(target.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            warn!(status = status.as_u16(), "remote API error");
            return Err(RemoteError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        resp.json().map_err(RemoteError::from)
    }

    /// Render the document body, collecting unresolved link targets.
    fn payload(
        &self,
        doc: &Document,
        record: &DocRecord,
        links: &LinkIndex,
        unresolved: &mut UnresolvedRefs,
    ) -> Value {
        let (content, encoding) = match doc.text() {
            Some(text) => {
                let (rendered, missing) = render_links(text, links);
                if !missing.is_empty() {
                    unresolved.push(doc.rel_path(), &doc.title());
                }
                (rendered, "utf-8")
            }
            None => (hex::encode(doc.bytes()), "hex"),
        };
        let mut body = json!({
            "title": doc.title(),
            "path": doc.rel_path(),
            "content": content,
            "encoding": encoding,
            "unlisted": record.unlisted,
        });
        // Backend-namespaced passthrough attributes ride along verbatim.
        if let Value::Object(obj) = &mut body {
            for (k, v) in &record.extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        body
    }

    fn attrs_from(&self, value: Value) -> Result<RemoteAttrs, RemoteError> {
        let resource: DocResource = serde_json::from_value(value)
            .map_err(|e| RemoteError::ParseError(e.to_string()))?;
        Ok(RemoteAttrs {
            remote_id: Some(resource.id),
            remote_path: resource.url,
            content_hash: resource.content_hash,
            extra: resource.extra,
        })
    }
}

impl RemotePlugin for RestRemote {
    #[instrument(skip_all, fields(path = doc.rel_path()))]
    fn create_document(
        &mut self,
        doc: &Document,
        record: &DocRecord,
        links: &LinkIndex,
        unresolved: &mut UnresolvedRefs,
    ) -> Result<RemoteAttrs, RemoteError> {
        let body = self.payload(doc, record, links, unresolved);
        let url = format!("{}/api/documents", self.base_url);
        let value = self.request(doc.rel_path(), |c| c.post(&url).json(&body))?;
        debug!("created remote document");
        self.attrs_from(value)
    }

    #[instrument(skip_all, fields(remote_id))]
    fn update_document(
        &mut self,
        remote_id: &str,
        doc: &Document,
        record: &DocRecord,
        links: &LinkIndex,
        unresolved: &mut UnresolvedRefs,
    ) -> Result<Option<RemoteAttrs>, RemoteError> {
        let body = self.payload(doc, record, links, unresolved);
        let url = format!("{}/api/documents/{remote_id}", self.base_url);
        let value = self.request(remote_id, |c| c.put(&url).json(&body))?;
        if value.is_null() {
            return Ok(None);
        }
        self.attrs_from(value).map(Some)
    }

    #[instrument(skip(self))]
    fn delete_document(&mut self, remote_id: &str) -> Result<(), RemoteError> {
        let url = format!("{}/api/documents/{remote_id}", self.base_url);
        self.request(remote_id, |c| c.delete(&url))?;
        Ok(())
    }

    fn list_documents(&self) -> Result<BTreeMap<String, RemoteAttrs>, RemoteError> {
        let url = format!("{}/api/documents", self.base_url);
        let value = self.request("document listing", |c| c.get(&url))?;
        let resources: Vec<Value> = serde_json::from_value(value)
            .map_err(|e| RemoteError::ParseError(e.to_string()))?;
        let mut listing = BTreeMap::new();
        for resource in resources {
            let attrs = self.attrs_from(resource)?;
            if let Some(id) = attrs.remote_id.clone() {
                listing.insert(id, attrs);
            }
        }
        debug!(count = listing.len(), "listed remote documents");
        Ok(listing)
    }

    fn fetchable(&self) -> Option<&dyn Fetchable> {
        self.supports_fetch.then_some(self as &dyn Fetchable)
    }

    fn history(&self) -> Option<&dyn HasHistory> {
        (self.supports_fetch && self.supports_history).then_some(self as &dyn HasHistory)
    }
}

impl Fetchable for RestRemote {
    fn get_document(
        &self,
        remote_id: &str,
        revision: Option<&str>,
    ) -> Result<(String, RemoteAttrs), RemoteError> {
        let mut url = format!("{}/api/documents/{remote_id}", self.base_url);
        let target = match revision {
            Some(rev) => {
                url.push_str(&format!("?revision={rev}"));
                format!("{remote_id}@{rev}")
            }
            None => remote_id.to_string(),
        };
        let value = self.request(&target, |c| c.get(&url))?;
        let resource: DocResource = serde_json::from_value(value)
            .map_err(|e| RemoteError::ParseError(e.to_string()))?;
        let content = resource.content.clone().ok_or_else(|| {
            RemoteError::ParseError(format!("document {remote_id} returned no content"))
        })?;
        Ok((
            content,
            RemoteAttrs {
                remote_id: Some(resource.id),
                remote_path: resource.url,
                content_hash: resource.content_hash,
                extra: resource.extra,
            },
        ))
    }
}

impl HasHistory for RestRemote {
    fn get_document_history(
        &self,
        remote_id: &str,
    ) -> Result<BTreeMap<String, RevisionInfo>, RemoteError> {
        let url = format!("{}/api/documents/{remote_id}/history", self.base_url);
        let value = self.request(remote_id, |c| c.get(&url))?;
        let revisions: Vec<RevisionResource> = serde_json::from_value(value)
            .map_err(|e| RemoteError::ParseError(e.to_string()))?;
        Ok(revisions
            .into_iter()
            .map(|r| {
                (
                    r.id,
                    RevisionInfo {
                        timestamp: r.timestamp,
                        attrs: RemoteAttrs {
                            extra: r.extra,
                            ..Default::default()
                        },
                    },
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_args_requires_url() {
        let err = RestRemote::from_args(&json!({})).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let remote = RestRemote::from_args(&json!({
            "url": "https://blog.example/",
            "token": "secret",
            "history": true,
        }))
        .unwrap();
        assert_eq!(remote.base_url(), "https://blog.example");
        assert!(remote.supports_history);
    }

    #[test]
    fn test_capability_flags_gate_accessors() {
        let full = RestRemote::from_args(&json!({
            "url": "https://b.example", "fetch": true, "history": true
        }))
        .unwrap();
        assert!(full.fetchable().is_some());
        assert!(full.history().is_some());

        let bare = RestRemote::from_args(&json!({
            "url": "https://b.example", "fetch": false
        }))
        .unwrap();
        assert!(bare.fetchable().is_none());
        assert!(bare.history().is_none());
    }

    #[test]
    fn test_not_found_names_the_document() {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            stream
                .write_all(
                    b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                )
                .unwrap();
        });

        let remote = RestRemote::new(format!("http://{addr}"), None);
        let err = remote.get_document("doc:7", None).unwrap_err();
        match err {
            RemoteError::NotFound(target) => assert_eq!(target, "doc:7"),
            other => panic!("unexpected error: {other}"),
        }
        server.join().unwrap();
    }

    #[test]
    fn test_attrs_from_resource_keeps_extras() {
        let remote = RestRemote::new("https://b.example", None);
        let attrs = remote
            .attrs_from(json!({
                "id": "post:7",
                "url": "https://b.example/posts/7",
                "category": "notes"
            }))
            .unwrap();
        assert_eq!(attrs.remote_id.as_deref(), Some("post:7"));
        assert_eq!(attrs.extra["category"], json!("notes"));
    }
}
