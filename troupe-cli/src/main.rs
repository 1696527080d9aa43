//! Troupe: run a manifest of agents, each working through its own task list.
//!
//! # Usage
//!
//! ```text
//! troupe init [--root <dir>] [--force]
//! troupe list [--manifest <file>]
//! troupe run [--manifest <file>] [--agents a,b] [--monitor] [--log-file]
//! troupe status [--manifest <file>] [--json]
//! troupe stop [<agent>...] [--all] [--manifest <file>]
//! troupe logs [--lines <n>] [--manifest <file>]
//! ```

mod commands;
mod logging;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use commands::{
    init::InitArgs, list::ListArgs, logs::LogsArgs, run::RunArgs, status::StatusArgs,
    stop::StopArgs,
};
use troupe_core::{Manifest, MANIFEST_FILE};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "troupe",
    version,
    about = "Coordinate independent agents working through typed task lists",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a demo manifest to get started.
    Init(InitArgs),

    /// List the agents declared in the manifest.
    List(ListArgs),

    /// Start agents and supervise them until every one has finished.
    Run(RunArgs),

    /// Show the latest status report written by a run.
    Status(StatusArgs),

    /// Ask a running `troupe run` to stop some or all agents.
    Stop(StopArgs),

    /// Print recent lines from the run log.
    Logs(LogsArgs),
}

// ---------------------------------------------------------------------------
// Shared manifest argument
// ---------------------------------------------------------------------------

/// `--manifest` flag shared by every command that reads the manifest.
#[derive(Args, Debug, Clone)]
pub struct ManifestArg {
    /// Path to the manifest (YAML, or JSON when the extension is `.json`).
    #[arg(long, short = 'm', value_name = "FILE", default_value = MANIFEST_FILE)]
    pub manifest: PathBuf,
}

impl ManifestArg {
    pub fn load(&self) -> Result<Manifest> {
        Manifest::load(&self.manifest)
            .with_context(|| format!("failed to load manifest '{}'", self.manifest.display()))
    }

    /// Load the manifest along with the project root it points at.
    pub fn load_with_root(&self) -> Result<(Manifest, PathBuf)> {
        let manifest = self.load()?;
        let root = manifest.project_root(&self.manifest);
        Ok((manifest, root))
    }

    /// Project root only; commands that never touch tasks still need it to
    /// find `.troupe/`.
    pub fn project_root(&self) -> Result<PathBuf> {
        Ok(self.load_with_root()?.1)
    }

    pub fn path(&self) -> &Path {
        &self.manifest
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => {
            logging::init_tracing(None)?;
            args.run()
        }
        Commands::List(args) => {
            logging::init_tracing(None)?;
            args.run()
        }
        // `run` installs its own subscriber once it knows where the log file goes.
        Commands::Run(args) => args.run(),
        Commands::Status(args) => {
            logging::init_tracing(None)?;
            args.run()
        }
        Commands::Stop(args) => {
            logging::init_tracing(None)?;
            args.run()
        }
        Commands::Logs(args) => {
            logging::init_tracing(None)?;
            args.run()
        }
    }
}
