//! Batch runner: walk a tree, patch each file, write back.
//!
//! Files are processed one at a time, in lexicographic order of their path
//! relative to the root, so two runs over the same tree report identically.
//! Every per-file failure (read, parse, patch, write) becomes an
//! [`ApplyOutcome`] with [`Status::Error`]; only configuration problems abort
//! the run.
//!
//! A file is either fully patched and replaced in one rename, or left as it
//! was. No partially patched file ever reaches disk.

use chrono::Local;
use globset::GlobSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{build_globset, RunConfig};
use crate::document::Document;
use crate::error::ConfigError;
use crate::patch::{apply, PatchDescriptor, PatchResult};
use crate::progress::{RunProgressEvent, RunProgressReporter};
use crate::report::{ApplyOutcome, RunReport, Status};

/// Always skipped, on top of configured excludes.
const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/node_modules/**",
    "**/backups/**",
    "**/*.backup",
];

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub root: PathBuf,
    /// Extensions to process, with or without the leading dot.
    pub extensions: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
    pub dry_run: bool,
    /// Copy each file to `<name>.<timestamp>.backup` before replacing it.
    pub backup: bool,
}

impl RunOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::from_config(root, &RunConfig::default())
    }

    pub fn from_config(root: impl Into<PathBuf>, run: &RunConfig) -> Self {
        Self {
            root: root.into(),
            extensions: run.extensions.clone(),
            exclude_globs: run.exclude_globs.clone(),
            follow_symlinks: run.follow_symlinks,
            dry_run: false,
            backup: run.backup,
        }
    }

    fn normalized_extensions(&self) -> Vec<String> {
        self.extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect()
    }
}

/// Lists files under the root that match the extension filter, as paths
/// relative to the root, sorted.
pub fn scan_files(opts: &RunOptions) -> Result<Vec<PathBuf>, ConfigError> {
    let root = &opts.root;
    if !root.is_dir() {
        return Err(ConfigError::BadRoot(root.clone()));
    }

    let extensions = opts.normalized_extensions();
    if extensions.is_empty() {
        return Err(ConfigError::Invalid(
            "no file extensions to process".to_string(),
        ));
    }

    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(opts.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    let walker = WalkDir::new(root).follow_links(opts.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);

        if exclude_set.is_match(relative) {
            continue;
        }
        if !has_extension(relative, &extensions) {
            continue;
        }
        files.push(relative.to_path_buf());
    }

    // Sort for deterministic ordering
    files.sort();
    Ok(files)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|want| e.eq_ignore_ascii_case(want)))
        .unwrap_or(false)
}

/// Applies `patches`, in order, to every matching file under `opts.root`.
pub fn run(
    opts: &RunOptions,
    patches: &[PatchDescriptor],
    progress: &dyn RunProgressReporter,
) -> Result<RunReport, ConfigError> {
    progress.report(RunProgressEvent::Discovering {
        root: opts.root.clone(),
    });
    let files = scan_files(opts)?;
    let backup_stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

    let mut report = RunReport::new(&opts.root, opts.dry_run);
    let total = files.len() as u64;
    info!(root = %opts.root.display(), files = total, patches = patches.len(), dry_run = opts.dry_run, "starting run");

    for (n, relative) in files.iter().enumerate() {
        progress.report(RunProgressEvent::Patching {
            n: n as u64 + 1,
            total,
            path: relative.clone(),
        });
        let file = process_file(opts, relative, patches, &backup_stamp);
        report.files_scanned += 1;
        if file.written {
            report.files_written += 1;
        }
        report.extend(file.outcomes);
    }

    Ok(report)
}

struct FileResult {
    outcomes: Vec<ApplyOutcome>,
    written: bool,
}

fn outcome(relative: &Path, patch: &PatchDescriptor, status: Status, detail: String) -> ApplyOutcome {
    ApplyOutcome {
        path: relative.to_path_buf(),
        patch: patch.name.clone(),
        status,
        detail,
    }
}

fn all_errors(relative: &Path, patches: &[&PatchDescriptor], detail: &str) -> FileResult {
    FileResult {
        outcomes: patches
            .iter()
            .map(|p| outcome(relative, p, Status::Error, detail.to_string()))
            .collect(),
        written: false,
    }
}

/// Turns every `Applied` outcome into `Error`: the change was computed but
/// never persisted.
fn downgrade_applied(outcomes: &mut [ApplyOutcome], reason: &str) {
    for o in outcomes.iter_mut().filter(|o| o.status == Status::Applied) {
        o.status = Status::Error;
        o.detail = reason.to_string();
    }
}

fn process_file(
    opts: &RunOptions,
    relative: &Path,
    patches: &[PatchDescriptor],
    backup_stamp: &str,
) -> FileResult {
    let applicable: Vec<&PatchDescriptor> =
        patches.iter().filter(|p| p.applies_to(relative)).collect();
    if applicable.is_empty() {
        return FileResult {
            outcomes: Vec::new(),
            written: false,
        };
    }

    let path = opts.root.join(relative);
    debug!(path = %relative.display(), patches = applicable.len(), "processing file");

    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %relative.display(), error = %e, "read failed");
            return all_errors(relative, &applicable, &format!("read failed: {}", e));
        }
    };

    let mut doc = match Document::parse(relative, bytes) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(path = %relative.display(), error = %e, "parse failed");
            return all_errors(relative, &applicable, &format!("parse failed: {}", e));
        }
    };

    let mut outcomes = Vec::with_capacity(applicable.len());
    for (i, patch) in applicable.iter().enumerate() {
        match apply(&mut doc, patch) {
            Ok(PatchResult::Applied {
                locations,
                ambiguous,
            }) => {
                let mut detail = format!(
                    "{} {} at {} location{}",
                    if opts.dry_run { "would apply" } else { "applied" },
                    patch.operation,
                    locations,
                    if locations == 1 { "" } else { "s" }
                );
                if ambiguous {
                    detail.push_str(&format!("; {} matched more than once, used first", patch.anchor));
                }
                outcomes.push(outcome(relative, patch, Status::Applied, detail));
            }
            Ok(PatchResult::SkippedAlreadyPresent) => {
                let guard = patch
                    .guard
                    .as_ref()
                    .map(|g| g.to_string())
                    .unwrap_or_default();
                outcomes.push(outcome(
                    relative,
                    patch,
                    Status::SkippedAlreadyPresent,
                    format!("guard {} already matches", guard),
                ));
            }
            Ok(PatchResult::SkippedAnchorNotFound) => {
                outcomes.push(outcome(
                    relative,
                    patch,
                    Status::SkippedAnchorNotFound,
                    format!("no match for {}", patch.anchor),
                ));
            }
            Err(e) => {
                warn!(path = %relative.display(), patch = %patch.name, error = %e, "patch failed; file left unchanged");
                downgrade_applied(
                    &mut outcomes,
                    &format!("discarded: patch '{}' failed on this file", patch.name),
                );
                outcomes.push(outcome(relative, patch, Status::Error, e.to_string()));
                for rest in &applicable[i + 1..] {
                    outcomes.push(outcome(
                        relative,
                        rest,
                        Status::Error,
                        format!("not attempted: patch '{}' failed on this file", patch.name),
                    ));
                }
                return FileResult {
                    outcomes,
                    written: false,
                };
            }
        }
    }

    let changed = outcomes.iter().any(|o| o.status == Status::Applied);
    if !changed || opts.dry_run {
        return FileResult {
            outcomes,
            written: false,
        };
    }

    if opts.backup {
        match write_backup(&path, backup_stamp) {
            Ok(backup) => debug!(backup = %backup.display(), "backup written"),
            Err(e) => {
                warn!(path = %relative.display(), error = %e, "backup failed; file left unchanged");
                downgrade_applied(&mut outcomes, &format!("not written: backup failed: {}", e));
                return FileResult {
                    outcomes,
                    written: false,
                };
            }
        }
    }

    match write_atomically(&path, &doc.serialize()) {
        Ok(()) => {
            info!(path = %relative.display(), "file updated");
            FileResult {
                outcomes,
                written: true,
            }
        }
        Err(e) => {
            warn!(path = %relative.display(), error = %e, "write failed");
            downgrade_applied(&mut outcomes, &format!("not written: {}", e));
            FileResult {
                outcomes,
                written: false,
            }
        }
    }
}

/// Copies `path` to a timestamped `.backup` sibling.
fn write_backup(path: &Path, stamp: &str) -> io::Result<PathBuf> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let backup = path.with_file_name(format!("{}.{}.backup", name, stamp));
    fs::copy(path, &backup)?;
    Ok(backup)
}

/// Writes to a temporary sibling and renames it over `path`, keeping the
/// original permissions. A symlink is resolved first so the link survives and
/// its target receives the new content.
fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let resolved = fs::canonicalize(path)?;
    let path = resolved.as_path();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.sitepatch-tmp", name));
    let permissions = fs::metadata(path)?.permissions();

    let result = fs::write(&tmp, bytes)
        .and_then(|_| fs::set_permissions(&tmp, permissions))
        .and_then(|_| fs::rename(&tmp, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
