//! MIME type constants and filename-based type guessing.
//!
//! Type detection is a pure function of the location's extension. Content is
//! never sniffed: a step's `supported_types` decides what it acts on, and an
//! unknown extension simply yields `None` (every step then ignores the item).

use once_cell::sync::Lazy;
use std::collections::HashMap;

pub const PDF: &str = "application/pdf";
pub const XML: &str = "text/xml";
pub const TEI_XML: &str = "application/tei+xml";
pub const JATS_XML: &str = "application/vnd.jats+xml";
pub const DOC: &str = "application/msword";
pub const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const DOTX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.template";
pub const RTF: &str = "application/rtf";
pub const HTML: &str = "text/html";
pub const PLAIN_TEXT: &str = "text/plain";
pub const JSON: &str = "application/json";

static EXTENSIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("pdf", PDF),
        ("xml", XML),
        ("nxml", JATS_XML),
        ("doc", DOC),
        ("docx", DOCX),
        ("dotx", DOTX),
        ("rtf", RTF),
        ("htm", HTML),
        ("html", HTML),
        ("txt", PLAIN_TEXT),
        ("json", JSON),
    ])
});

/// Compound suffixes checked before the plain extension.
const COMPOUND_SUFFIXES: &[(&str, &str)] = &[(".tei.xml", TEI_XML), (".jats.xml", JATS_XML)];

/// Guess the MIME type of `location` from its file name.
///
/// Works for plain paths and URLs alike (query strings and fragments are
/// ignored). Matching is case-insensitive.
pub fn guess_type(location: &str) -> Option<&'static str> {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    let name = path.rsplit('/').next().unwrap_or(path).to_ascii_lowercase();

    if let Some((_, mime)) = COMPOUND_SUFFIXES.iter().find(|(s, _)| name.ends_with(s)) {
        return Some(mime);
    }

    let (_, ext) = name.rsplit_once('.')?;
    EXTENSIONS.get(ext).copied()
}
