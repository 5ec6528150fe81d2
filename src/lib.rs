//! # sitepatch
//!
//! Idempotent, anchor-based structural patching for static HTML and
//! JavaScript assets.
//!
//! Site-wide edits (inject a script tag, replace the header, drop a widget,
//! rewrite a query in a JS file) are described as data, not written as
//! throwaway scripts. Each patch names an anchor, an operation, a payload and
//! a guard that recognises the patch as already applied, so re-running a
//! patchset is always safe.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//! │  Runner  │──▶│ Document │──▶│  Anchor  │──▶│  Patch   │
//! │ walk+io  │   │ parse    │   │ resolve  │   │ apply    │
//! └────┬─────┘   └──────────┘   └──────────┘   └──────────┘
//!      ▼
//! ┌──────────┐
//! │  Report  │
//! └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sitepatch check                              # validate sitepatch.toml
//! sitepatch run public --dry-run               # preview
//! sitepatch run public --patchset cart         # apply one patchset
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and patchset files |
//! | [`html`] | Span-indexing markup scanner |
//! | [`document`] | Per-file document, byte-exact serialization |
//! | [`anchor`] | Anchor predicates and resolution |
//! | [`patch`] | Patch descriptors and the applier |
//! | [`runner`] | Directory walk, write-back, dry-run, backups |
//! | [`report`] | Outcomes, counts and summaries |
//! | [`progress`] | Stderr progress reporting |
//! | [`logging`] | Tracing setup |
//! | [`error`] | Error taxonomy |

pub mod anchor;
pub mod config;
pub mod document;
pub mod error;
pub mod html;
pub mod logging;
pub mod patch;
pub mod progress;
pub mod report;
pub mod runner;
