//! Span-indexing HTML scanner.
//!
//! Produces an index of element spans over the original text instead of a
//! re-rendered tree, so edits can splice bytes and leave untouched markup
//! exactly as authored.
//!
//! Known limitations:
//! - Not an HTML5 tree builder. Unclosed elements are closed implicitly when
//!   an ancestor's end tag arrives, or at end of input.
//! - Tag and attribute names are restricted to ASCII `[A-Za-z0-9:_.-]`.
//! - `<script>`, `<style>`, `<textarea>` and `<title>` are raw text; their
//!   content is never scanned for tags.

use crate::error::ParseError;
use std::ops::Range;

const COMMENT_START: &str = "<!--";
const COMMENT_END: &str = "-->";

fn is_void_element(name: &str) -> bool {
    matches!(
        name,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

fn is_raw_text_element(name: &str) -> bool {
    matches!(name, "script" | "style" | "textarea" | "title")
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b':' | b'_' | b'-' | b'.')
}

/// One attribute as written in the start tag. Names are ASCII-lowercased;
/// values are kept raw (no entity decoding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
}

/// An element located in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// ASCII-lowercased tag name.
    pub name: String,
    pub attrs: Vec<Attribute>,
    /// Whole element: start tag through end tag (or through the start tag
    /// for void and self-closing elements).
    pub span: Range<usize>,
    /// Content between the start tag and end tag. Empty at `span.end` for
    /// elements without children.
    pub inner: Range<usize>,
    /// Index of the enclosing element in [`ElementIndex::elements`].
    pub parent: Option<usize>,
    /// Void or `<... />`: no closing tag, cannot hold children.
    pub childless: bool,
    /// Closed by an ancestor's end tag or end of input rather than its own.
    pub implicitly_closed: bool,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .and_then(|a| a.value.as_deref())
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .map(|v| v.split_ascii_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }
}

/// All elements of a document, in order of their start tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementIndex {
    pub elements: Vec<Element>,
}

impl ElementIndex {
    pub fn is_ancestor(&self, ancestor: usize, mut idx: usize) -> bool {
        while let Some(p) = self.elements[idx].parent {
            if p == ancestor {
                return true;
            }
            idx = p;
        }
        false
    }
}

fn line_of(input: &str, offset: usize) -> usize {
    input.as_bytes()[..offset]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
        + 1
}

fn find_ci(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len())
        .find(|&i| haystack[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

/// Finds `</name` followed by optional whitespace and `>`. Returns the span
/// of the end tag.
fn find_raw_text_close(input: &str, from: usize, name: &str) -> Option<Range<usize>> {
    let bytes = input.as_bytes();
    let needle = format!("</{}", name);
    let mut i = from;
    while let Some(at) = find_ci(bytes, i, needle.as_bytes()) {
        let mut k = at + needle.len();
        while k < bytes.len() && bytes[k].is_ascii_whitespace() {
            k += 1;
        }
        if k < bytes.len() && bytes[k] == b'>' {
            return Some(at..k + 1);
        }
        i = at + 1;
    }
    None
}

struct StartTag {
    name: String,
    attrs: Vec<Attribute>,
    end: usize,
    self_closing: bool,
}

/// Parses a start tag whose `<` is at `start`. Quoted attribute values may
/// contain `>`.
fn scan_start_tag(input: &str, start: usize) -> Result<StartTag, ParseError> {
    let bytes = input.as_bytes();
    let mut i = start + 1;
    let name_start = i;
    while i < bytes.len() && is_name_byte(bytes[i]) {
        i += 1;
    }
    let name = input[name_start..i].to_ascii_lowercase();
    let unterminated = || ParseError::UnterminatedTag {
        tag: name.clone(),
        line: line_of(input, start),
    };

    let mut attrs = Vec::new();
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            return Err(unterminated());
        }
        match bytes[i] {
            b'>' => {
                return Ok(StartTag {
                    name,
                    attrs,
                    end: i + 1,
                    self_closing: false,
                })
            }
            b'/' if bytes.get(i + 1) == Some(&b'>') => {
                return Ok(StartTag {
                    name,
                    attrs,
                    end: i + 2,
                    self_closing: true,
                })
            }
            b'/' => {
                i += 1;
                continue;
            }
            _ => {}
        }

        let attr_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'=' | b'>' | b'/')
        {
            i += 1;
        }
        if i == attr_start {
            // Stray '=' or similar; skip it.
            i += 1;
            continue;
        }
        let attr_name = input[attr_start..i].to_ascii_lowercase();

        let mut j = i;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        if j < bytes.len() && bytes[j] == b'=' {
            j += 1;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if j >= bytes.len() {
                return Err(unterminated());
            }
            let value = match bytes[j] {
                q @ (b'"' | b'\'') => {
                    let close = bytes[j + 1..]
                        .iter()
                        .position(|&b| b == q)
                        .ok_or_else(unterminated)?;
                    let v = &input[j + 1..j + 1 + close];
                    i = j + close + 2;
                    v
                }
                _ => {
                    let vs = j;
                    while j < bytes.len() && !bytes[j].is_ascii_whitespace() && bytes[j] != b'>' {
                        j += 1;
                    }
                    i = j;
                    &input[vs..j]
                }
            };
            attrs.push(Attribute {
                name: attr_name,
                value: Some(value.to_string()),
            });
        } else {
            attrs.push(Attribute {
                name: attr_name,
                value: None,
            });
        }
    }
}

/// Scans `input` and returns its element index.
///
/// Errors on unterminated comments, start tags and raw-text elements, and on
/// input that contains no element at all.
pub fn scan(input: &str) -> Result<ElementIndex, ParseError> {
    let bytes = input.as_bytes();
    let mut elements: Vec<Element> = Vec::new();
    // Indices into `elements` of currently open elements.
    let mut open: Vec<usize> = Vec::new();
    let mut i = 0;

    // Invariant: slice endpoints only land on ASCII structural bytes, so they
    // are always UTF-8 char boundaries.
    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }

        if input[i..].starts_with(COMMENT_START) {
            let body = i + COMMENT_START.len();
            match input[body..].find(COMMENT_END) {
                Some(rel) => i = body + rel + COMMENT_END.len(),
                None => return Err(ParseError::UnterminatedComment(line_of(input, i))),
            }
            continue;
        }

        let next = bytes.get(i + 1).copied();
        match next {
            // Doctype, CDATA, processing instructions.
            Some(b'!') | Some(b'?') => {
                match bytes[i..].iter().position(|&b| b == b'>') {
                    Some(rel) => i += rel + 1,
                    None => {
                        return Err(ParseError::UnterminatedTag {
                            tag: "!".to_string(),
                            line: line_of(input, i),
                        })
                    }
                }
            }
            Some(b'/') if bytes.get(i + 2).is_some_and(|b| b.is_ascii_alphabetic()) => {
                let name_start = i + 2;
                let mut k = name_start;
                while k < bytes.len() && is_name_byte(bytes[k]) {
                    k += 1;
                }
                let name = input[name_start..k].to_ascii_lowercase();
                let close_end = match bytes[k..].iter().position(|&b| b == b'>') {
                    Some(rel) => k + rel + 1,
                    None => {
                        return Err(ParseError::UnterminatedTag {
                            tag: format!("/{}", name),
                            line: line_of(input, i),
                        })
                    }
                };
                // Stray end tags with no matching open element are ignored.
                if let Some(pos) = open.iter().rposition(|&e| elements[e].name == name) {
                    for &unclosed in &open[pos + 1..] {
                        let el = &mut elements[unclosed];
                        el.inner.end = i;
                        el.span.end = i;
                        el.implicitly_closed = true;
                    }
                    let el = &mut elements[open[pos]];
                    el.inner.end = i;
                    el.span.end = close_end;
                    open.truncate(pos);
                }
                i = close_end;
            }
            Some(b) if b.is_ascii_alphabetic() => {
                let tag = scan_start_tag(input, i)?;
                let idx = elements.len();
                let childless = tag.self_closing || is_void_element(&tag.name);
                let raw = !childless && is_raw_text_element(&tag.name);
                let mut el = Element {
                    name: tag.name,
                    attrs: tag.attrs,
                    span: i..tag.end,
                    inner: tag.end..tag.end,
                    parent: open.last().copied(),
                    childless,
                    implicitly_closed: false,
                };
                i = tag.end;
                if raw {
                    let close = find_raw_text_close(input, i, &el.name).ok_or_else(|| {
                        ParseError::UnterminatedRawText {
                            tag: el.name.clone(),
                            line: line_of(input, el.span.start),
                        }
                    })?;
                    el.inner = i..close.start;
                    el.span.end = close.end;
                    i = close.end;
                    elements.push(el);
                } else {
                    elements.push(el);
                    if !childless {
                        open.push(idx);
                    }
                }
            }
            // A lone '<' in text.
            _ => i += 1,
        }
    }

    for idx in open {
        let el = &mut elements[idx];
        el.inner.end = bytes.len();
        el.span.end = bytes.len();
        el.implicitly_closed = true;
    }

    if elements.is_empty() {
        return Err(ParseError::NoRootElement);
    }
    Ok(ElementIndex { elements })
}

/// Text content of an element. Raw-text elements (`<script>`, `<style>`, ...)
/// contribute their content verbatim.
pub fn element_text(input: &str, el: &Element) -> String {
    if is_raw_text_element(&el.name) {
        collapse_whitespace(&input[el.inner.clone()])
    } else {
        text_content(input, el.inner.clone())
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Name of the raw-text element opened by `tag` (`<script ...>`), if any.
fn raw_text_start(tag: &str) -> Option<String> {
    let name: String = tag
        .bytes()
        .skip(1)
        .take_while(|&b| is_name_byte(b))
        .map(|b| b.to_ascii_lowercase() as char)
        .collect();
    (is_raw_text_element(&name) && !tag.ends_with('/')).then_some(name)
}

/// Text content of `range` with tags and comments removed and whitespace
/// collapsed.
pub fn text_content(input: &str, range: Range<usize>) -> String {
    let slice = &input[range];
    let mut out = String::with_capacity(slice.len());
    let mut rest = slice;
    while !rest.is_empty() {
        if rest.starts_with(COMMENT_START) {
            rest = match rest.find(COMMENT_END) {
                Some(p) => &rest[p + COMMENT_END.len()..],
                None => "",
            };
            continue;
        }
        if rest.starts_with('<') {
            let Some(p) = rest.find('>') else {
                break;
            };
            let raw = raw_text_start(&rest[..p]);
            out.push(' ');
            rest = &rest[p + 1..];
            if let Some(name) = raw {
                let close = rest
                    .to_ascii_lowercase()
                    .find(&format!("</{}", name))
                    .unwrap_or(rest.len());
                out.push_str(&rest[..close]);
                rest = &rest[close..];
            }
            continue;
        }
        let stop = rest.find('<').unwrap_or(rest.len());
        out.push_str(&rest[..stop]);
        rest = &rest[stop..];
    }
    collapse_whitespace(&out)
}
