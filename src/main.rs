//! # sitepatch CLI
//!
//! Applies declarative patchsets to a tree of static site files.
//!
//! ## Usage
//!
//! ```bash
//! sitepatch --config ./sitepatch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sitepatch run <root>` | Apply patchsets to every matching file under `<root>` |
//! | `sitepatch check` | Validate the config and list patchsets |
//! | `sitepatch completions <shell>` | Print a shell completion script |
//!
//! ## Examples
//!
//! ```bash
//! # Preview what the cart patchset would change
//! sitepatch run public --patchset cart --dry-run
//!
//! # Apply everything to HTML and JS files, keeping backups
//! sitepatch run public --ext .html,.js --backup
//!
//! # Machine-readable report
//! sitepatch run public --json > report.json
//! ```
//!
//! Exit status is 0 whenever the run completes, even when individual files
//! report errors; configuration problems exit non-zero before any file is
//! touched.

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;

use sitepatch::config::{self, Config};
use sitepatch::logging;
use sitepatch::progress::ProgressMode;
use sitepatch::runner::{self, RunOptions};

/// sitepatch: idempotent structural patching for static site assets.
#[derive(Parser)]
#[command(
    name = "sitepatch",
    about = "sitepatch: idempotent, anchor-based patching for static HTML/JS assets",
    version,
    long_about = "Applies declarative patch descriptors (anchor, operation, payload, guard) \
    to every matching file under a directory. Guards make re-runs safe; files are written \
    atomically or not at all."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./sitepatch.toml`. Run defaults and patchsets are read
    /// from this file.
    #[arg(long, global = true, default_value = "./sitepatch.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patchsets to a directory tree.
    ///
    /// Files are processed in sorted path order. A file is written only when
    /// at least one patch applied and every patch on it succeeded.
    Run {
        /// Root directory to patch (searched recursively).
        root: PathBuf,

        /// Comma-separated extensions to process, e.g. `.html,.js`.
        /// Defaults to `run.extensions` from the config.
        #[arg(long, value_delimiter = ',')]
        ext: Vec<String>,

        /// Report what would change without writing any file.
        #[arg(long)]
        dry_run: bool,

        /// Patchset to apply; repeat for several. Defaults to all, by name.
        #[arg(long = "patchset")]
        patchsets: Vec<String>,

        /// Write a timestamped `.backup` copy before changing a file.
        #[arg(long)]
        backup: bool,

        /// Print the full report as JSON on stdout instead of the summary.
        #[arg(long)]
        json: bool,

        /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Validate the configuration and list patchsets and their patches.
    Check,

    /// Print a shell completion script to stdout.
    Completions {
        shell: Shell,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    // Commands that don't require config
    if let Commands::Completions { shell } = cli.command {
        let mut command = Cli::command();
        generate(shell, &mut command, "sitepatch", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)
        .with_context(|| format!("Invalid configuration: {}", cli.config.display()))?;

    match cli.command {
        Commands::Run {
            root,
            ext,
            dry_run,
            patchsets,
            backup,
            json,
            progress,
        } => {
            let patches = cfg.select(&patchsets)?;

            let mut opts = RunOptions::from_config(root, &cfg.run);
            if !ext.is_empty() {
                opts.extensions = ext;
            }
            opts.dry_run = dry_run;
            opts.backup |= backup;

            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let report = runner::run(&opts, &patches, mode.reporter().as_ref())?;

            if json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", report.render_summary());
                println!("ok");
            }
        }
        Commands::Check => print_check(&cli.config, &cfg),
        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

fn print_check(path: &std::path::Path, cfg: &Config) {
    println!("config {} ok", path.display());
    println!("  extensions: {}", cfg.run.extensions.join(", "));
    if !cfg.run.exclude_globs.is_empty() {
        println!("  exclude: {}", cfg.run.exclude_globs.join(", "));
    }
    println!("  backup: {}", cfg.run.backup);
    println!();
    println!("{:<20} {:<28} {:<18} ANCHOR", "PATCHSET", "PATCH", "OPERATION");
    for set in cfg.patchsets.values() {
        for patch in &set.patches {
            println!(
                "{:<20} {:<28} {:<18} {}",
                set.name, patch.name, patch.operation, patch.anchor
            );
        }
        if let Some(desc) = &set.description {
            println!("{:<20} # {}", "", desc);
        }
    }
}
