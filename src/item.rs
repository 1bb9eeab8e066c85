//! The unit of work flowing through a pipeline.
//!
//! An [`Item`] is created once per source file (content read, type guessed)
//! and then threaded through every step. Steps never mutate an item directly:
//! they return an [`ItemUpdate`] which the dispatcher merges, so a step
//! cannot touch `source_location` and cannot clear an already-known type.

use std::fmt;

/// Document payload: raw bytes as read from storage, or text produced by a
/// step. Text is UTF-8 encoded when written out.
#[derive(Clone, PartialEq, Eq)]
pub enum Content {
    Bytes(Vec<u8>),
    Text(String),
}

impl Content {
    /// Borrow the payload as bytes regardless of representation.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Content::Bytes(b) => b,
            Content::Text(s) => s.as_bytes(),
        }
    }

    /// Consume the payload, encoding text as UTF-8.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Content::Bytes(b) => b,
            Content::Text(s) => s.into_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lossy text view, for steps that operate on characters.
    pub fn to_text(&self) -> String {
        match self {
            Content::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Content::Text(s) => s.clone(),
        }
    }
}

// Payloads can be megabytes; print the size only.
impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Content::Text(s) => write!(f, "Text({} bytes)", s.len()),
        }
    }
}

impl From<Vec<u8>> for Content {
    fn from(b: Vec<u8>) -> Self {
        Content::Bytes(b)
    }
}

impl From<&[u8]> for Content {
    fn from(b: &[u8]) -> Self {
        Content::Bytes(b.to_vec())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

/// One document travelling through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    source_location: String,
    /// Where the content currently "lives"; informational, steps may rewrite it.
    pub current_location: String,
    pub content: Content,
    /// MIME type; `None` when detection failed.
    pub mime_type: Option<String>,
    /// Fields requested by the caller (e.g. `title`, `abstract`), if any.
    pub includes: Option<Vec<String>>,
}

impl Item {
    pub fn new(source_location: impl Into<String>, content: impl Into<Content>) -> Self {
        let source_location = source_location.into();
        Self {
            current_location: source_location.clone(),
            source_location,
            content: content.into(),
            mime_type: None,
            includes: None,
        }
    }

    pub fn with_type(mut self, mime_type: Option<impl Into<String>>) -> Self {
        self.mime_type = mime_type.map(Into::into);
        self
    }

    pub fn with_includes(mut self, includes: Option<Vec<String>>) -> Self {
        self.includes = includes;
        self
    }

    /// The location this item was created from. Never changes.
    pub fn source_location(&self) -> &str {
        &self.source_location
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Merge a step's partial update: set fields replace, unset fields stay.
    pub fn apply(mut self, update: ItemUpdate) -> Self {
        if let Some(location) = update.current_location {
            self.current_location = location;
        }
        if let Some(content) = update.content {
            self.content = content;
        }
        if let Some(mime_type) = update.mime_type {
            self.mime_type = Some(mime_type);
        }
        if let Some(includes) = update.includes {
            self.includes = Some(includes);
        }
        self
    }
}

/// Partial update returned by [`crate::pipeline::Step::process`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemUpdate {
    pub current_location: Option<String>,
    pub content: Option<Content>,
    pub mime_type: Option<String>,
    pub includes: Option<Vec<String>>,
}

impl ItemUpdate {
    /// An update that replaces only the content.
    pub fn content(content: impl Into<Content>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.current_location = Some(location.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_starts_at_its_source() {
        let item = Item::new("data/a.pdf", b"%PDF".as_slice());
        assert_eq!(item.source_location(), "data/a.pdf");
        assert_eq!(item.current_location, "data/a.pdf");
        assert_eq!(item.mime_type(), None);
    }

    #[test]
    fn apply_replaces_only_set_fields() {
        let item = Item::new("a.pdf", b"pdf".as_slice())
            .with_type(Some("application/pdf"))
            .with_includes(Some(vec!["title".into()]));

        let merged = item.apply(ItemUpdate::content("<TEI/>").with_type("application/tei+xml"));

        assert_eq!(merged.content, Content::Text("<TEI/>".into()));
        assert_eq!(merged.mime_type(), Some("application/tei+xml"));
        assert_eq!(merged.source_location(), "a.pdf");
        assert_eq!(merged.current_location, "a.pdf");
        assert_eq!(merged.includes, Some(vec!["title".to_string()]));
    }

    #[test]
    fn empty_update_is_identity() {
        let item = Item::new("a.xml", "<a/>").with_type(Some("text/xml"));
        assert_eq!(item.clone().apply(ItemUpdate::default()), item);
        assert!(ItemUpdate::default().is_empty());
    }

    #[test]
    fn text_content_is_utf8_encoded() {
        let c = Content::from("Unicode \u{1234}");
        assert_eq!(c.clone().into_bytes(), "Unicode \u{1234}".as_bytes());
        assert_eq!(c.len(), "Unicode \u{1234}".len());
    }

    #[test]
    fn debug_hides_payload() {
        let c = Content::from(vec![0u8; 2048]);
        assert_eq!(format!("{c:?}"), "Bytes(2048 bytes)");
    }
}
