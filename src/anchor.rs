//! Anchor predicates and their resolution against a [`Document`].
//!
//! Element predicates (`Id`, `Attribute`, `Tag`, `ElementText`) need the
//! markup index; text predicates (`Text`, `Regex`) work on the raw text of any
//! document. Both kinds resolve to the same [`Resolution`], so the applier
//! never cares which one it was given.
//!
//! "Not found" is a normal value. The only failure at resolution time is an
//! element predicate evaluated against a plain-text document.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

use crate::document::Document;
use crate::error::{ConfigError, PatchApplicationError};
use crate::html;

/// Serialized form of a predicate, as written in config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnchorSpec {
    /// `<… id="…">`
    Id { id: String },
    /// `<tag name="value">`, any tag when `tag` is omitted.
    Attribute {
        #[serde(default)]
        tag: Option<String>,
        name: String,
        value: String,
    },
    /// `<tag>`, optionally required to carry `class`.
    Tag {
        tag: String,
        #[serde(default)]
        class: Option<String>,
    },
    /// Innermost element whose text content contains `text`.
    ElementText {
        #[serde(default)]
        tag: Option<String>,
        text: String,
    },
    /// Literal substring of the raw text.
    Text { text: String },
    /// Regular expression over the raw text.
    Regex { pattern: String },
}

/// A compiled, immutable predicate.
#[derive(Debug, Clone)]
pub enum AnchorPredicate {
    Id(String),
    Attribute {
        tag: Option<String>,
        name: String,
        value: String,
    },
    Tag {
        tag: String,
        class: Option<String>,
    },
    ElementText {
        tag: Option<String>,
        text: String,
    },
    Text(String),
    Regex(Regex),
}

fn non_empty(patch: &str, field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Patch {
            patch: patch.to_string(),
            message: format!("anchor field '{}' must not be empty", field),
        });
    }
    Ok(())
}

impl AnchorPredicate {
    /// Validates and compiles a predicate. `patch` names the owning patch in
    /// error messages.
    pub fn compile(spec: &AnchorSpec, patch: &str) -> Result<Self, ConfigError> {
        let predicate = match spec {
            AnchorSpec::Id { id } => {
                non_empty(patch, "id", id)?;
                AnchorPredicate::Id(id.clone())
            }
            AnchorSpec::Attribute { tag, name, value } => {
                non_empty(patch, "name", name)?;
                AnchorPredicate::Attribute {
                    tag: tag.as_ref().map(|t| t.to_ascii_lowercase()),
                    name: name.to_ascii_lowercase(),
                    value: value.clone(),
                }
            }
            AnchorSpec::Tag { tag, class } => {
                non_empty(patch, "tag", tag)?;
                AnchorPredicate::Tag {
                    tag: tag.to_ascii_lowercase(),
                    class: class.clone(),
                }
            }
            AnchorSpec::ElementText { tag, text } => {
                non_empty(patch, "text", text)?;
                AnchorPredicate::ElementText {
                    tag: tag.as_ref().map(|t| t.to_ascii_lowercase()),
                    text: text.clone(),
                }
            }
            AnchorSpec::Text { text } => {
                if text.is_empty() {
                    return Err(ConfigError::Patch {
                        patch: patch.to_string(),
                        message: "anchor field 'text' must not be empty".to_string(),
                    });
                }
                AnchorPredicate::Text(text.clone())
            }
            AnchorSpec::Regex { pattern } => {
                let regex = Regex::new(pattern).map_err(|source| ConfigError::Regex {
                    patch: patch.to_string(),
                    source,
                })?;
                AnchorPredicate::Regex(regex)
            }
        };
        Ok(predicate)
    }

    pub fn is_element(&self) -> bool {
        !matches!(self, AnchorPredicate::Text(_) | AnchorPredicate::Regex(_))
    }

    fn kind_name(&self) -> &'static str {
        match self {
            AnchorPredicate::Id(_) => "id",
            AnchorPredicate::Attribute { .. } => "attribute",
            AnchorPredicate::Tag { .. } => "tag",
            AnchorPredicate::ElementText { .. } => "element_text",
            AnchorPredicate::Text(_) => "text",
            AnchorPredicate::Regex(_) => "regex",
        }
    }
}

impl fmt::Display for AnchorPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnchorPredicate::Id(id) => write!(f, "#{}", id),
            AnchorPredicate::Attribute { tag, name, value } => write!(
                f,
                "{}[{}={}]",
                tag.as_deref().unwrap_or("*"),
                name,
                value
            ),
            AnchorPredicate::Tag { tag, class: None } => write!(f, "{}", tag),
            AnchorPredicate::Tag {
                tag,
                class: Some(c),
            } => write!(f, "{}.{}", tag, c),
            AnchorPredicate::ElementText { tag, text } => {
                write!(f, "{}:contains({:?})", tag.as_deref().unwrap_or("*"), text)
            }
            AnchorPredicate::Text(t) => write!(f, "text {:?}", t),
            AnchorPredicate::Regex(r) => write!(f, "/{}/", r.as_str()),
        }
    }
}

/// What a location points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Index into the document's element index.
    Element(usize),
    /// A raw text span (from `Text` or `Regex`).
    Span,
}

/// A resolved anchor location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub span: Range<usize>,
    pub target: Target,
}

/// Outcome of resolving one predicate. `Multiple` is in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    NotFound,
    Single(Location),
    Multiple(Vec<Location>),
}

impl Resolution {
    fn from_locations(mut locations: Vec<Location>) -> Self {
        match locations.len() {
            0 => Resolution::NotFound,
            1 => Resolution::Single(locations.remove(0)),
            _ => Resolution::Multiple(locations),
        }
    }

    pub fn is_found(&self) -> bool {
        !matches!(self, Resolution::NotFound)
    }

    pub fn len(&self) -> usize {
        match self {
            Resolution::NotFound => 0,
            Resolution::Single(_) => 1,
            Resolution::Multiple(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_locations(self) -> Vec<Location> {
        match self {
            Resolution::NotFound => Vec::new(),
            Resolution::Single(l) => vec![l],
            Resolution::Multiple(v) => v,
        }
    }
}

/// Resolves `predicate` against `doc`.
pub fn resolve(
    doc: &Document,
    predicate: &AnchorPredicate,
) -> Result<Resolution, PatchApplicationError> {
    let text = doc.text();
    let locations = match predicate {
        AnchorPredicate::Text(needle) => text
            .match_indices(needle.as_str())
            .map(|(start, m)| Location {
                span: start..start + m.len(),
                target: Target::Span,
            })
            .collect(),
        AnchorPredicate::Regex(regex) => regex
            .find_iter(text)
            .map(|m| Location {
                span: m.range(),
                target: Target::Span,
            })
            .collect(),
        _ => {
            let index = doc
                .elements()
                .ok_or(PatchApplicationError::ElementAnchorOnText {
                    predicate: predicate.kind_name(),
                })?;
            let mut matched: Vec<usize> = index
                .elements
                .iter()
                .enumerate()
                .filter(|(_, el)| element_matches(text, el, predicate))
                .map(|(i, _)| i)
                .collect();
            if matches!(predicate, AnchorPredicate::ElementText { .. }) {
                // Keep only the innermost: drop any candidate that contains
                // another candidate.
                let all = matched.clone();
                matched.retain(|&i| !all.iter().any(|&j| j != i && index.is_ancestor(i, j)));
            }
            matched
                .into_iter()
                .map(|i| Location {
                    span: index.elements[i].span.clone(),
                    target: Target::Element(i),
                })
                .collect()
        }
    };
    Ok(Resolution::from_locations(locations))
}

fn element_matches(text: &str, el: &html::Element, predicate: &AnchorPredicate) -> bool {
    let tag_ok = |tag: &Option<String>| tag.as_deref().map(|t| el.name == t).unwrap_or(true);
    match predicate {
        AnchorPredicate::Id(id) => el.attr("id") == Some(id.as_str()),
        AnchorPredicate::Attribute { tag, name, value } => {
            tag_ok(tag) && el.attr(name) == Some(value.as_str())
        }
        AnchorPredicate::Tag { tag, class } => {
            el.name == *tag && class.as_deref().map(|c| el.has_class(c)).unwrap_or(true)
        }
        AnchorPredicate::ElementText { tag, text: needle } => {
            tag_ok(tag)
                && !el.childless
                && html::element_text(text, el).contains(needle.as_str())
        }
        AnchorPredicate::Text(_) | AnchorPredicate::Regex(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const PAGE: &str = r#"<html><body>
<header class="top">Old</header>
<nav><a href="index.html">Home</a><a href="about.html">About</a></nav>
<div id="cartModal"><p>Your <b>cart</b> is empty.</p></div>
<header>Second</header>
<script src="js/app.js"></script>
</body></html>"#;

    fn doc() -> Document {
        Document::parse(Path::new("index.html"), PAGE.as_bytes().to_vec()).unwrap()
    }

    fn compile(spec: AnchorSpec) -> AnchorPredicate {
        AnchorPredicate::compile(&spec, "test").unwrap()
    }

    fn matched_text(doc: &Document, r: &Resolution) -> Vec<String> {
        r.clone()
            .into_locations()
            .into_iter()
            .map(|l| doc.text()[l.span].to_string())
            .collect()
    }

    #[test]
    fn test_by_id() {
        let d = doc();
        let r = resolve(&d, &compile(AnchorSpec::Id { id: "cartModal".into() })).unwrap();
        assert!(matches!(r, Resolution::Single(_)));
        assert!(matched_text(&d, &r)[0].starts_with("<div id=\"cartModal\">"));
        assert!(matched_text(&d, &r)[0].ends_with("</p></div>"));
    }

    #[test]
    fn test_by_attribute() {
        let d = doc();
        let p = compile(AnchorSpec::Attribute {
            tag: Some("a".into()),
            name: "href".into(),
            value: "about.html".into(),
        });
        let r = resolve(&d, &p).unwrap();
        assert_eq!(matched_text(&d, &r), vec!["<a href=\"about.html\">About</a>"]);

        let missing = compile(AnchorSpec::Attribute {
            tag: Some("a".into()),
            name: "href".into(),
            value: "contact.html".into(),
        });
        assert_eq!(resolve(&d, &missing).unwrap(), Resolution::NotFound);
    }

    #[test]
    fn test_by_tag_multiple_in_document_order() {
        let d = doc();
        let r = resolve(
            &d,
            &compile(AnchorSpec::Tag {
                tag: "HEADER".into(),
                class: None,
            }),
        )
        .unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(
            matched_text(&d, &r),
            vec!["<header class=\"top\">Old</header>", "<header>Second</header>"]
        );
    }

    #[test]
    fn test_by_tag_and_class() {
        let d = doc();
        let r = resolve(
            &d,
            &compile(AnchorSpec::Tag {
                tag: "header".into(),
                class: Some("top".into()),
            }),
        )
        .unwrap();
        assert_eq!(matched_text(&d, &r), vec!["<header class=\"top\">Old</header>"]);
    }

    #[test]
    fn test_element_text_prefers_innermost() {
        let d = doc();
        let r = resolve(
            &d,
            &compile(AnchorSpec::ElementText {
                tag: None,
                text: "cart is empty".into(),
            }),
        )
        .unwrap();
        assert_eq!(matched_text(&d, &r), vec!["<p>Your <b>cart</b> is empty.</p>"]);
    }

    #[test]
    fn test_element_text_inside_script() {
        let src = "<body><script>if (count < max && open > 0) render();</script></body>";
        let d = Document::parse(Path::new("page.html"), src.as_bytes().to_vec()).unwrap();
        let r = resolve(
            &d,
            &compile(AnchorSpec::ElementText {
                tag: Some("script".into()),
                text: "max && open".into(),
            }),
        )
        .unwrap();
        assert_eq!(
            matched_text(&d, &r),
            vec!["<script>if (count < max && open > 0) render();</script>"]
        );
    }

    #[test]
    fn test_text_and_regex() {
        let d = doc();
        let r = resolve(&d, &compile(AnchorSpec::Text { text: "<header".into() })).unwrap();
        assert_eq!(r.len(), 2);

        let r = resolve(
            &d,
            &compile(AnchorSpec::Regex {
                pattern: r#"<script src="js/(\w+)\.js"></script>"#.into(),
            }),
        )
        .unwrap();
        assert_eq!(matched_text(&d, &r), vec![r#"<script src="js/app.js"></script>"#]);
    }

    #[test]
    fn test_element_predicate_on_text_document() {
        let d = Document::parse(Path::new("app.js"), b"let a = 1;".to_vec()).unwrap();
        let err = resolve(&d, &compile(AnchorSpec::Id { id: "x".into() })).unwrap_err();
        assert_eq!(
            err,
            PatchApplicationError::ElementAnchorOnText { predicate: "id" }
        );
        let ok = resolve(&d, &compile(AnchorSpec::Text { text: "a = 1".into() })).unwrap();
        assert!(ok.is_found());
    }

    #[test]
    fn test_bad_regex_is_config_error() {
        let err = AnchorPredicate::compile(
            &AnchorSpec::Regex {
                pattern: "(unclosed".into(),
            },
            "broken",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Regex { ref patch, .. } if patch == "broken"));
    }

    #[test]
    fn test_empty_fields_rejected() {
        assert!(AnchorPredicate::compile(&AnchorSpec::Id { id: " ".into() }, "p").is_err());
        assert!(AnchorPredicate::compile(&AnchorSpec::Text { text: "".into() }, "p").is_err());
    }

    #[test]
    fn test_display() {
        let p = compile(AnchorSpec::Attribute {
            tag: Some("script".into()),
            name: "src".into(),
            value: "js/cart.js".into(),
        });
        assert_eq!(p.to_string(), "script[src=js/cart.js]");
        assert_eq!(compile(AnchorSpec::Id { id: "m".into() }).to_string(), "#m");
    }
}
