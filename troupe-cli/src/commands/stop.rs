//! `troupe stop [<agent>...] [--all]`

use anyhow::{bail, Context, Result};
use clap::Args;

use troupe_core::AgentId;
use troupe_runtime::markers::{request_stop, request_stop_all};

use crate::ManifestArg;

/// Ask a running `troupe run` to stop some or all agents.
///
/// Agents finish the task they are on, then stop.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Agents to stop.
    #[arg(value_name = "AGENT", required_unless_present = "all")]
    pub agents: Vec<String>,

    /// Stop every agent.
    #[arg(long, conflicts_with = "agents")]
    pub all: bool,

    #[command(flatten)]
    pub manifest: ManifestArg,
}

impl StopArgs {
    pub fn run(self) -> Result<()> {
        let (manifest, root) = self.manifest.load_with_root()?;

        if self.all {
            let path = request_stop_all(&root).context("failed to write stop-all marker")?;
            println!("✓ Stop requested for all agents");
            tracing::debug!(marker = %path.display(), "stop-all marker written");
            return Ok(());
        }

        let ids: Vec<AgentId> = self.agents.iter().map(|a| AgentId::from(a.as_str())).collect();
        if let Some(unknown) = ids.iter().find(|id| manifest.agent(id).is_none()) {
            bail!(
                "unknown agent '{unknown}'; valid agents: {}",
                join_ids(&manifest.agent_ids())
            );
        }

        for id in &ids {
            let path = request_stop(&root, id)
                .with_context(|| format!("failed to write stop marker for '{id}'"))?;
            println!("✓ Stop requested for '{id}'");
            tracing::debug!(marker = %path.display(), "stop marker written");
        }
        Ok(())
    }
}

pub(crate) fn join_ids(ids: &[AgentId]) -> String {
    ids.iter().map(AgentId::as_str).collect::<Vec<_>>().join(", ")
}
