//! Local document handling: loading, content typing, title extraction, and
//! content hashing.
//!
//! A [`Document`] is one unit of publishable content, text or binary, keyed
//! by its repository-relative path. Text documents carry an extractable
//! title; binary documents (images) are typed by file extension and have no
//! title beyond their file stem.

use std::path::{Path, PathBuf};

use regex_lite::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::DocumentError;

/// Extensions treated as binary (image) content.
const BINARY_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "pdf"];

/// Document payload, text or raw bytes.
#[derive(Debug, Clone)]
pub enum DocContent {
    Text(String),
    Binary(Vec<u8>),
}

/// One unit of publishable content under the repository root.
#[derive(Debug, Clone)]
pub struct Document {
    rel_path: String,
    abs_path: PathBuf,
    content: DocContent,
}

impl Document {
    /// Load a document from `root/rel_path`.
    ///
    /// Binary-vs-text is decided by extension; text content must be UTF-8.
    pub fn load(root: &Path, rel_path: &str) -> Result<Self, DocumentError> {
        let abs_path = root.join(rel_path);
        if !abs_path.is_file() {
            return Err(DocumentError::NotFound(rel_path.to_string()));
        }
        let bytes = std::fs::read(&abs_path)?;
        let content = if is_binary_path(rel_path) {
            DocContent::Binary(bytes)
        } else {
            let text = String::from_utf8(bytes)
                .map_err(|_| DocumentError::NotUtf8(rel_path.to_string()))?;
            DocContent::Text(text)
        };
        debug!(path = rel_path, "loaded document");
        Ok(Self {
            rel_path: rel_path.to_string(),
            abs_path,
            content,
        })
    }

    /// Build an in-memory text document that has not been written yet.
    pub fn from_text(root: &Path, rel_path: &str, text: impl Into<String>) -> Self {
        Self {
            rel_path: rel_path.to_string(),
            abs_path: root.join(rel_path),
            content: DocContent::Text(text.into()),
        }
    }

    /// Repository-relative path (slash-separated).
    pub fn rel_path(&self) -> &str {
        &self.rel_path
    }

    pub fn is_binary(&self) -> bool {
        matches!(self.content, DocContent::Binary(_))
    }

    /// Text content, if this is a text document.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            DocContent::Text(t) => Some(t),
            DocContent::Binary(_) => None,
        }
    }

    /// Raw content bytes, for either kind.
    pub fn bytes(&self) -> &[u8] {
        match &self.content {
            DocContent::Text(t) => t.as_bytes(),
            DocContent::Binary(b) => b,
        }
    }

    /// SHA-256 digest of the content, hex-encoded.
    pub fn content_hash(&self) -> String {
        content_hash(self.bytes())
    }

    /// Document title.
    ///
    /// For text documents the first Markdown ATX heading or reStructuredText
    /// underlined title wins; otherwise the file stem is used.
    pub fn title(&self) -> String {
        if let Some(text) = self.text() {
            if let Some(title) = extract_title(text) {
                return title;
            }
        }
        Path::new(&self.rel_path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.rel_path.clone())
    }

    /// Write the content to its path, creating parent directories.
    pub fn write(&self) -> Result<(), DocumentError> {
        if let Some(parent) = self.abs_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.abs_path, self.bytes())?;
        debug!(path = %self.rel_path, bytes = self.bytes().len(), "wrote document");
        Ok(())
    }
}

/// SHA-256 digest of arbitrary bytes, hex-encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// True if the path's extension marks it as binary content.
pub fn is_binary_path(rel_path: &str) -> bool {
    Path::new(rel_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| BINARY_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Map a backend `contentType` attribute to a file extension for imports.
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    match content_type {
        "text/x-rst" => "rst",
        "text/plain" => "txt",
        "text/html" => "html",
        _ => "md",
    }
}

/// Extract a title from structured markup.
///
/// Recognizes a Markdown ATX heading (`# Title`) and an RST section title
/// (a line underlined by `===`-style punctuation at least as long as it).
fn extract_title(text: &str) -> Option<String> {
    let atx = Regex::new(r"(?m)^#\s+(.+?)\s*#*\s*$").ok()?;
    if let Some(cap) = atx.captures(text) {
        return Some(cap[1].trim().to_string());
    }
    let lines: Vec<&str> = text.lines().collect();
    for i in 0..lines.len().saturating_sub(1) {
        let line = lines[i].trim_end();
        let under = lines[i + 1].trim_end();
        if line.is_empty() || under.len() < line.len() {
            continue;
        }
        let c = under.chars().next()?;
        if "=-~^\"'".contains(c) && under.chars().all(|u| u == c) && under.len() >= 3 {
            return Some(line.trim().to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_title() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("post.md"), "# Hello World\n\nBody.\n").unwrap();
        let doc = Document::load(dir.path(), "post.md").unwrap();
        assert_eq!(doc.title(), "Hello World");
        assert!(!doc.is_binary());
    }

    #[test]
    fn test_rst_title() {
        let text = "My Title\n========\n\nBody text.\n";
        assert_eq!(extract_title(text), Some("My Title".to_string()));
    }

    #[test]
    fn test_title_falls_back_to_stem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "no heading here\n").unwrap();
        let doc = Document::load(dir.path(), "notes.md").unwrap();
        assert_eq!(doc.title(), "notes");
    }

    #[test]
    fn test_binary_detection_and_hash() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = [0x89u8, 0x50, 0x4e, 0x47];
        std::fs::write(dir.path().join("logo.png"), bytes).unwrap();
        let doc = Document::load(dir.path(), "logo.png").unwrap();
        assert!(doc.is_binary());
        assert!(doc.text().is_none());
        assert_eq!(doc.content_hash(), content_hash(&bytes));
    }

    #[test]
    fn test_hash_is_stable_and_content_sensitive() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
    }

    #[test]
    fn test_missing_document() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Document::load(dir.path(), "gone.md"),
            Err(DocumentError::NotFound(_))
        ));
    }

    #[test]
    fn test_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let doc = Document::from_text(dir.path(), "blog-import/post-1.md", "# T\n");
        doc.write().unwrap();
        assert!(dir.path().join("blog-import/post-1.md").is_file());
    }

    #[test]
    fn test_extension_for_content_type() {
        assert_eq!(extension_for_content_type("text/x-rst"), "rst");
        assert_eq!(extension_for_content_type("text/markdown"), "md");
    }
}
