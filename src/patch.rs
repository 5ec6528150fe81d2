//! Patch descriptors and the applier.
//!
//! A [`PatchDescriptor`] is one declarative edit: where (anchor), what
//! (operation + payload), and how to tell it is already done (guard).
//! [`apply`] runs it against one in-memory [`Document`]; it never touches
//! the filesystem.

use globset::GlobSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::warn;

use crate::anchor::{resolve, AnchorPredicate, Location, Resolution, Target};
use crate::document::{Document, DocumentKind};
use crate::error::PatchApplicationError;

/// The structural edit performed at the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    InsertBefore,
    InsertAfter,
    ReplaceWith,
    /// Insert as the last child of the anchor element.
    AppendToParent,
    /// Insert as the first child of the anchor element.
    PrependToParent,
    Remove,
}

impl Operation {
    pub fn takes_payload(self) -> bool {
        !matches!(self, Operation::Remove)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::InsertBefore => "insert_before",
            Operation::InsertAfter => "insert_after",
            Operation::ReplaceWith => "replace_with",
            Operation::AppendToParent => "append_to_parent",
            Operation::PrependToParent => "prepend_to_parent",
            Operation::Remove => "remove",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tie-break policy when the anchor matches more than once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnMultiple {
    /// Act on the first match in document order and log a warning.
    #[default]
    First,
    /// Fail the patch for this file.
    Error,
    /// Act on every match. Matches must not overlap.
    All,
}

/// One structural edit, compiled and validated.
#[derive(Debug, Clone)]
pub struct PatchDescriptor {
    pub name: String,
    pub anchor: AnchorPredicate,
    pub operation: Operation,
    /// Inserted text. For regex anchors `$1` / `${name}` expand to captures
    /// and `$$` is a literal `$`; for other anchors it is used verbatim.
    pub payload: String,
    /// Matches once the patch's effect is present.
    pub guard: Option<AnchorPredicate>,
    pub on_multiple: OnMultiple,
    /// Restricts the patch to matching relative paths. `None` means every file.
    pub files: Option<GlobSet>,
}

impl PatchDescriptor {
    pub fn new(name: impl Into<String>, anchor: AnchorPredicate, operation: Operation) -> Self {
        Self {
            name: name.into(),
            anchor,
            operation,
            payload: String::new(),
            guard: None,
            on_multiple: OnMultiple::default(),
            files: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_guard(mut self, guard: AnchorPredicate) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_on_multiple(mut self, on_multiple: OnMultiple) -> Self {
        self.on_multiple = on_multiple;
        self
    }

    pub fn with_files(mut self, files: GlobSet) -> Self {
        self.files = Some(files);
        self
    }

    /// Why this patch could apply again to its own output, if it can.
    ///
    /// Unguarded inserts always can. An unguarded `replace_with` can when the
    /// payload reuses regex captures or would itself match the anchor.
    pub fn reapply_hazard(&self) -> Option<String> {
        if self.guard.is_some() {
            return None;
        }
        match self.operation {
            Operation::Remove => None,
            Operation::InsertBefore
            | Operation::InsertAfter
            | Operation::AppendToParent
            | Operation::PrependToParent => Some(format!(
                "operation '{}' needs a 'guard', otherwise every run inserts the payload again",
                self.operation
            )),
            Operation::ReplaceWith => {
                let rematches = match &self.anchor {
                    AnchorPredicate::Regex(regex) => {
                        if references_captures(&self.payload) {
                            return Some(
                                "a regex 'replace_with' whose payload uses captures needs a 'guard'"
                                    .to_string(),
                            );
                        }
                        regex.is_match(&self.payload)
                    }
                    AnchorPredicate::Text(needle) => self.payload.contains(needle.as_str()),
                    element => Document::parse_as(DocumentKind::Markup, self.payload.as_bytes().to_vec())
                        .ok()
                        .and_then(|doc| resolve(&doc, element).ok())
                        .map(|r| r.is_found())
                        .unwrap_or(false),
                };
                rematches.then(|| {
                    format!(
                        "payload matches its own anchor {}; add a 'guard'",
                        self.anchor
                    )
                })
            }
        }
    }

    /// Whether this patch should be evaluated for `relative_path` at all.
    pub fn applies_to(&self, relative_path: &Path) -> bool {
        self.files
            .as_ref()
            .map(|set| set.is_match(relative_path))
            .unwrap_or(true)
    }
}

/// Result of applying one patch that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchResult {
    /// The document was changed at `locations` places.
    Applied { locations: usize, ambiguous: bool },
    SkippedAlreadyPresent,
    SkippedAnchorNotFound,
}

/// Applies `patch` to `doc`, honouring the guard.
///
/// On error the document is unchanged.
pub fn apply(doc: &mut Document, patch: &PatchDescriptor) -> Result<PatchResult, PatchApplicationError> {
    if let Some(guard) = &patch.guard {
        // Any number of guard matches means the effect is already there.
        if resolve(doc, guard)?.is_found() {
            return Ok(PatchResult::SkippedAlreadyPresent);
        }
    }

    let resolution = resolve(doc, &patch.anchor)?;
    let found = resolution.len();
    let targets = match (resolution, patch.on_multiple) {
        (Resolution::NotFound, _) => return Ok(PatchResult::SkippedAnchorNotFound),
        (Resolution::Single(loc), _) => vec![loc],
        (Resolution::Multiple(_), OnMultiple::Error) => {
            return Err(PatchApplicationError::Ambiguous(found))
        }
        (Resolution::Multiple(mut locs), OnMultiple::First) => {
            warn!(
                patch = %patch.name,
                anchor = %patch.anchor,
                matches = found,
                "anchor matched more than once; using the first match"
            );
            vec![locs.remove(0)]
        }
        (Resolution::Multiple(locs), OnMultiple::All) => {
            if let Some(w) = locs.windows(2).find(|w| w[1].span.start < w[0].span.end) {
                return Err(PatchApplicationError::Overlap(w[1].span.start));
            }
            locs
        }
    };

    let mut edits = Vec::with_capacity(targets.len());
    for loc in &targets {
        let payload = render_payload(doc, patch, loc);
        edits.push(edit_for(doc, patch.operation, loc, payload)?);
    }

    doc.splice(edits)
        .map_err(PatchApplicationError::BrokenMarkup)?;

    Ok(PatchResult::Applied {
        locations: targets.len(),
        ambiguous: found > 1 && patch.on_multiple == OnMultiple::First,
    })
}

/// `$1`, `$name` or `${name}` anywhere in `payload`; `$$` is an escape.
fn references_captures(payload: &str) -> bool {
    let bytes = payload.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            match bytes.get(i + 1).copied() {
                Some(b'$') => {
                    i += 2;
                    continue;
                }
                Some(b) if b == b'{' || b == b'_' || b.is_ascii_alphanumeric() => return true,
                _ => {}
            }
        }
        i += 1;
    }
    false
}

fn render_payload(doc: &Document, patch: &PatchDescriptor, loc: &Location) -> String {
    match &patch.anchor {
        AnchorPredicate::Regex(regex) => {
            // Re-running from the match start yields the same match, now with
            // its capture groups.
            match regex.captures_at(doc.text(), loc.span.start) {
                Some(caps) => {
                    let mut out = String::new();
                    caps.expand(&patch.payload, &mut out);
                    out
                }
                None => patch.payload.clone(),
            }
        }
        _ => patch.payload.clone(),
    }
}

fn edit_for(
    doc: &Document,
    operation: Operation,
    loc: &Location,
    payload: String,
) -> Result<(std::ops::Range<usize>, String), PatchApplicationError> {
    let span = loc.span.clone();
    let edit = match operation {
        Operation::InsertBefore => (span.start..span.start, payload),
        Operation::InsertAfter => (span.end..span.end, payload),
        Operation::ReplaceWith => (span, payload),
        Operation::Remove => (span, String::new()),
        Operation::AppendToParent | Operation::PrependToParent => {
            let element = match loc.target {
                Target::Element(i) => doc.elements().map(|idx| &idx.elements[i]),
                Target::Span => None,
            };
            let element = match element {
                Some(el) if !el.childless => el,
                Some(el) => {
                    return Err(PatchApplicationError::NoChildren {
                        operation: operation.as_str(),
                        found: format!("childless <{}>", el.name),
                    })
                }
                None => {
                    return Err(PatchApplicationError::NoChildren {
                        operation: operation.as_str(),
                        found: "a text span".to_string(),
                    })
                }
            };
            let at = if operation == Operation::AppendToParent {
                element.inner.end
            } else {
                element.inner.start
            };
            (at..at, payload)
        }
    };
    Ok(edit)
}
