//! Run outcomes and their summary.
//!
//! Every (file, patch) pair the runner evaluates produces exactly one
//! [`ApplyOutcome`]. The [`RunReport`] keeps them in processing order so
//! callers (the CLI, tests) can assert on values instead of scraping output.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Applied,
    SkippedAlreadyPresent,
    SkippedAnchorNotFound,
    Error,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Applied,
        Status::SkippedAlreadyPresent,
        Status::SkippedAnchorNotFound,
        Status::Error,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Status::Applied => "applied",
            Status::SkippedAlreadyPresent => "already present",
            Status::SkippedAnchorNotFound => "anchor not found",
            Status::Error => "error",
        }
    }
}

/// Result of one patch against one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    /// Path relative to the run root.
    pub path: PathBuf,
    pub patch: String,
    pub status: Status,
    pub detail: String,
}

/// Outcome tallies, one field per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub applied: usize,
    pub skipped_already_present: usize,
    pub skipped_anchor_not_found: usize,
    pub error: usize,
}

impl StatusCounts {
    fn add(&mut self, status: Status) {
        match status {
            Status::Applied => self.applied += 1,
            Status::SkippedAlreadyPresent => self.skipped_already_present += 1,
            Status::SkippedAnchorNotFound => self.skipped_anchor_not_found += 1,
            Status::Error => self.error += 1,
        }
    }

    pub fn get(&self, status: Status) -> usize {
        match status {
            Status::Applied => self.applied,
            Status::SkippedAlreadyPresent => self.skipped_already_present,
            Status::SkippedAnchorNotFound => self.skipped_anchor_not_found,
            Status::Error => self.error,
        }
    }

    pub fn total(&self) -> usize {
        self.applied + self.skipped_already_present + self.skipped_anchor_not_found + self.error
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub root: PathBuf,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub files_scanned: usize,
    pub files_written: usize,
    outcomes: Vec<ApplyOutcome>,
}

impl RunReport {
    pub fn new(root: &Path, dry_run: bool) -> Self {
        Self {
            root: root.to_path_buf(),
            dry_run,
            started_at: Utc::now(),
            files_scanned: 0,
            files_written: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn push(&mut self, outcome: ApplyOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn extend(&mut self, outcomes: impl IntoIterator<Item = ApplyOutcome>) {
        self.outcomes.extend(outcomes);
    }

    pub fn outcomes(&self) -> &[ApplyOutcome] {
        &self.outcomes
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for o in &self.outcomes {
            counts.add(o.status);
        }
        counts
    }

    pub fn counts_by_patch(&self) -> BTreeMap<String, StatusCounts> {
        let mut by_patch: BTreeMap<String, StatusCounts> = BTreeMap::new();
        for o in &self.outcomes {
            by_patch.entry(o.patch.clone()).or_default().add(o.status);
        }
        by_patch
    }

    /// Distinct files with at least one outcome of `status`, in run order.
    pub fn files_with(&self, status: Status) -> Vec<&Path> {
        let mut files: Vec<&Path> = Vec::new();
        for o in self.outcomes.iter().filter(|o| o.status == status) {
            if files.last() != Some(&o.path.as_path()) && !files.contains(&o.path.as_path()) {
                files.push(&o.path);
            }
        }
        files
    }

    pub fn has_errors(&self) -> bool {
        self.outcomes.iter().any(|o| o.status == Status::Error)
    }

    /// Human-readable summary: totals, per-patch table, then the files
    /// behind every non-applied status.
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let counts = self.counts();

        let _ = writeln!(
            out,
            "sitepatch {}{}",
            self.root.display(),
            if self.dry_run { " (dry-run)" } else { "" }
        );
        let _ = writeln!(out, "  files scanned: {}", self.files_scanned);
        if self.dry_run {
            let would = self.files_with(Status::Applied).len();
            let _ = writeln!(out, "  files that would change: {}", would);
        } else {
            let _ = writeln!(out, "  files written: {}", self.files_written);
        }
        for status in Status::ALL {
            let label = if self.dry_run && status == Status::Applied {
                "would apply"
            } else {
                status.label()
            };
            let _ = writeln!(out, "  {:<17} {}", format!("{}:", label), counts.get(status));
        }

        let by_patch = self.counts_by_patch();
        if !by_patch.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "  {:<28} {:>7} {:>8} {:>9} {:>6}",
                "PATCH", "APPLIED", "PRESENT", "NO ANCHOR", "ERROR"
            );
            let _ = writeln!(out, "  {}", "-".repeat(62));
            for (patch, c) in &by_patch {
                let _ = writeln!(
                    out,
                    "  {:<28} {:>7} {:>8} {:>9} {:>6}",
                    patch, c.applied, c.skipped_already_present, c.skipped_anchor_not_found, c.error
                );
            }
        }

        for status in [Status::SkippedAnchorNotFound, Status::Error] {
            let listed: Vec<&ApplyOutcome> =
                self.outcomes.iter().filter(|o| o.status == status).collect();
            if listed.is_empty() {
                continue;
            }
            let _ = writeln!(out);
            let _ = writeln!(out, "  {}:", status.label());
            for o in listed {
                let _ = writeln!(out, "    {}  [{}]  {}", o.path.display(), o.patch, o.detail);
            }
        }

        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
