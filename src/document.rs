//! In-memory document for one file.
//!
//! Markup files (`.html`, `.htm`) carry an [`ElementIndex`] next to their
//! text; every other file is plain text. Edits splice the text directly and
//! the index is rebuilt afterwards, so serialization is byte-for-byte: no
//! re-rendering, no prettifying, line endings and attribute quoting are kept
//! exactly as authored.

use std::ops::Range;
use std::path::Path;

use crate::error::ParseError;
use crate::html::{self, ElementIndex};

/// Extensions parsed as markup. Everything else is plain text.
const MARKUP_EXTENSIONS: &[&str] = &["html", "htm"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Markup,
    Text,
}

impl DocumentKind {
    pub fn for_path(path: &Path) -> Self {
        let is_markup = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                MARKUP_EXTENSIONS
                    .iter()
                    .any(|m| e.eq_ignore_ascii_case(m))
            })
            .unwrap_or(false);
        if is_markup {
            DocumentKind::Markup
        } else {
            DocumentKind::Text
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    kind: DocumentKind,
    text: String,
    index: Option<ElementIndex>,
}

impl Document {
    /// Parses file bytes. The kind is picked from the path's extension.
    pub fn parse(path: &Path, bytes: Vec<u8>) -> Result<Self, ParseError> {
        Self::parse_as(DocumentKind::for_path(path), bytes)
    }

    pub fn parse_as(kind: DocumentKind, bytes: Vec<u8>) -> Result<Self, ParseError> {
        let text =
            String::from_utf8(bytes).map_err(|e| ParseError::NotUtf8(e.utf8_error().valid_up_to()))?;
        let index = match kind {
            DocumentKind::Markup => Some(html::scan(&text)?),
            DocumentKind::Text => None,
        };
        Ok(Self { kind, text, index })
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Element index for markup documents; `None` for plain text.
    pub fn elements(&self) -> Option<&ElementIndex> {
        self.index.as_ref()
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.text.as_bytes().to_vec()
    }

    /// Replaces byte ranges with new text. Edits must not overlap; they are
    /// applied back to front so earlier offsets stay valid. The element index
    /// is rebuilt once at the end.
    ///
    /// On error the document is left unchanged.
    pub fn splice(&mut self, mut edits: Vec<(Range<usize>, String)>) -> Result<(), ParseError> {
        edits.sort_by_key(|(r, _)| std::cmp::Reverse(r.start));
        let mut text = self.text.clone();
        for (range, replacement) in edits {
            text.replace_range(range, &replacement);
        }
        let index = match self.kind {
            DocumentKind::Markup => Some(html::scan(&text)?),
            DocumentKind::Text => None,
        };
        self.text = text;
        self.index = index;
        Ok(())
    }
}
