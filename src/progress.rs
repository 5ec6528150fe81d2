//! Run progress reporting.
//!
//! Reports observable progress during `sitepatch run` so users see which file
//! is being patched and how many are left on large trees. Progress is emitted
//! on **stderr** so stdout remains parseable (`--json`).

use std::io::Write;
use std::path::PathBuf;

/// A single progress event for a run.
#[derive(Clone, Debug)]
pub enum RunProgressEvent {
    /// Walking the root directory. Total unknown.
    Discovering { root: PathBuf },
    /// File `n` of `total` is being processed.
    Patching { n: u64, total: u64, path: PathBuf },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait RunProgressReporter {
    fn report(&self, event: RunProgressEvent);
}

/// Human-friendly progress on stderr: "sitepatch  patching  12 / 1,034  blog/post.html".
pub struct StderrProgress;

impl RunProgressReporter for StderrProgress {
    fn report(&self, event: RunProgressEvent) {
        let line = match &event {
            RunProgressEvent::Discovering { root } => {
                format!("sitepatch  discovering {}...\n", root.display())
            }
            RunProgressEvent::Patching { n, total, path } => format!(
                "sitepatch  patching  {} / {}  {}\n",
                format_number(*n),
                format_number(*total),
                path.display()
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl RunProgressReporter for JsonProgress {
    fn report(&self, event: RunProgressEvent) {
        let obj = match &event {
            RunProgressEvent::Discovering { root } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "root": root,
            }),
            RunProgressEvent::Patching { n, total, path } => serde_json::json!({
                "event": "progress",
                "phase": "patching",
                "n": n,
                "total": total,
                "path": path,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl RunProgressReporter for NoProgress {
    fn report(&self, _event: RunProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn RunProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
