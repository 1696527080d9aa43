//! `troupe init [--root <dir>] [--force]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use troupe_core::{Manifest, MANIFEST_FILE};

/// Write a demo manifest to get started.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory that receives `troupe.yaml`.
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Replace an existing manifest.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let path = self.root.join(MANIFEST_FILE);
        let manifest = Manifest::demo();
        manifest
            .save(&path, self.force)
            .with_context(|| format!("failed to write '{}'", path.display()))?;

        println!("✓ Wrote demo manifest with {} agents", manifest.agents.len());
        println!("  Saved to: {}", path.display());
        println!("  Next: troupe run --manifest {}", path.display());
        Ok(())
    }
}
