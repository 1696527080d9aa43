//! `troupe list`

use std::collections::BTreeSet;

use anyhow::Result;
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use crate::ManifestArg;

/// List the agents declared in the manifest.
#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub manifest: ManifestArg,
}

#[derive(Tabled)]
struct AgentRow {
    #[tabled(rename = "agent")]
    agent: String,
    #[tabled(rename = "tasks")]
    tasks: usize,
    #[tabled(rename = "task types")]
    kinds: String,
    #[tabled(rename = "est. hours")]
    hours: String,
    #[tabled(rename = "description")]
    description: String,
}

impl ListArgs {
    pub fn run(self) -> Result<()> {
        let manifest = self.manifest.load()?;
        if manifest.agents.is_empty() {
            println!("No agents declared in {}.", self.manifest.path().display());
            return Ok(());
        }

        let rows: Vec<AgentRow> = manifest
            .agents
            .iter()
            .map(|agent| AgentRow {
                agent: agent.id.to_string(),
                tasks: agent.tasks.len(),
                kinds: agent
                    .tasks
                    .iter()
                    .map(|t| t.kind().as_str())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect::<Vec<_>>()
                    .join(", "),
                hours: agent
                    .estimated_duration_hours
                    .map(|h| format!("{h:.1}"))
                    .unwrap_or_else(|| "-".to_string()),
                description: agent.description.clone().unwrap_or_default(),
            })
            .collect();

        let total_tasks: usize = rows.iter().map(|r| r.tasks).sum();
        println!("{} agents | {} tasks", rows.len(), total_tasks);
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
