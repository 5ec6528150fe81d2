//! Error taxonomy for the patcher.
//!
//! Configuration problems are fatal and surface before any file is touched.
//! Everything else is scoped to one file (or one patch within a file) and is
//! turned into an [`ApplyOutcome`](crate::report::ApplyOutcome) by the runner.

use std::path::PathBuf;
use thiserror::Error;

/// A malformed config file, patchset, predicate or payload.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Syntax { path: PathBuf, message: String },

    #[error("Invalid regex in patch '{patch}': {source}")]
    Regex {
        patch: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid glob '{glob}': {source}")]
    Glob {
        glob: String,
        #[source]
        source: globset::Error,
    },

    #[error("Patch '{patch}': {message}")]
    Patch { patch: String, message: String },

    #[error("Unknown patchset: '{0}'")]
    UnknownPatchset(String),

    #[error("Root directory does not exist or is not a directory: {0}")]
    BadRoot(PathBuf),

    #[error("{0}")]
    Invalid(String),
}

/// A file's content could not be turned into a [`Document`](crate::document::Document).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("file is not valid UTF-8 (first invalid byte at offset {0})")]
    NotUtf8(usize),

    #[error("unterminated comment starting at line {0}")]
    UnterminatedComment(usize),

    #[error("unterminated <{tag}> tag starting at line {line}")]
    UnterminatedTag { tag: String, line: usize },

    #[error("<{tag}> at line {line} has no closing tag")]
    UnterminatedRawText { tag: String, line: usize },

    #[error("no root element found")]
    NoRootElement,
}

/// A resolved anchor could not support the requested operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchApplicationError {
    #[error("{predicate} anchors need a markup document, but this file is plain text")]
    ElementAnchorOnText { predicate: &'static str },

    #[error("{operation} needs an element with a closing tag, found {found}")]
    NoChildren {
        operation: &'static str,
        found: String,
    },

    #[error("anchor matched {0} locations and the patch requires exactly one")]
    Ambiguous(usize),

    #[error("anchor matches overlap at byte {0}; cannot apply to all of them")]
    Overlap(usize),

    #[error("patched markup no longer parses: {0}")]
    BrokenMarkup(ParseError),
}
