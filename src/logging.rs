//! Tracing subscriber setup for the CLI.
//!
//! Logs go to stderr. `RUST_LOG` wins when set; otherwise the level follows
//! the `-v` / `-q` flags.

use tracing_subscriber::EnvFilter;

/// Maps CLI verbosity to a default filter directive.
pub fn default_directive(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "sitepatch=error";
    }
    match verbose {
        0 => "sitepatch=warn",
        1 => "sitepatch=info",
        2 => "sitepatch=debug",
        _ => "sitepatch=trace",
    }
}

pub fn init(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, quiet)));
    // A second init (e.g. from tests) is harmless; keep the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
