//! `troupe status`: render the last `status.json` a run wrote.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use troupe_core::{AgentState, StatusSnapshot};
use troupe_runtime::{paths::status_path, read_report, StatusReport};

use crate::ManifestArg;

const BAR_WIDTH: usize = 20;

/// Arguments for `troupe status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub manifest: ManifestArg,

    /// Emit the raw report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "agent")]
    agent: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "progress")]
    progress: String,
    #[tabled(rename = "done")]
    done: String,
    #[tabled(rename = "completed")]
    completed: usize,
    #[tabled(rename = "failed")]
    failed: usize,
    #[tabled(rename = "current task")]
    current: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let root = self.manifest.project_root()?;
        let path = status_path(&root);
        let report = read_report(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        let Some(report) = report else {
            if self.json {
                println!("null");
            } else {
                println!("No status recorded yet. Run 'troupe run' first.");
            }
            return Ok(());
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        print_table(&report);
        Ok(())
    }
}

fn print_table(report: &StatusReport) {
    let age = Utc::now().signed_duration_since(report.generated_at);
    println!(
        "Troupe v{} | {} agents | {} running | {:.1}% overall | updated {}s ago",
        env!("CARGO_PKG_VERSION"),
        report.totals.agents,
        report.totals.running,
        report.totals.progress_percent,
        age.num_seconds().max(0),
    );

    if report.agents.is_empty() {
        println!("No agents in the last run.");
        return;
    }

    let rows: Vec<StatusTableRow> = report
        .agents
        .iter()
        .map(|s| StatusTableRow {
            agent: s.agent_id.to_string(),
            state: state_label(s.state),
            progress: progress_bar(s.progress_percent),
            done: format!("{}/{}", s.cursor, s.total),
            completed: s.completed_count,
            failed: s.failed_count,
            current: s.current_task.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if report.totals.running > 0 {
        println!("Run 'troupe stop --all' to stop the remaining agents.");
    }
}

/// `████░░░░ 40.0%`: one cell per 5%.
pub(crate) fn progress_bar(percent: f64) -> String {
    let clamped = percent.clamp(0.0, 100.0);
    let filled = ((clamped / 100.0) * BAR_WIDTH as f64).floor() as usize;
    format!(
        "{}{} {:>5.1}%",
        "█".repeat(filled),
        "░".repeat(BAR_WIDTH - filled),
        clamped
    )
}

pub(crate) fn state_label(state: AgentState) -> String {
    let label = state.to_string();
    match state {
        AgentState::Idle => label.bright_black().to_string(),
        AgentState::Running => label.cyan().bold().to_string(),
        AgentState::Completed => label.green().to_string(),
        AgentState::Stopped => label.yellow().to_string(),
    }
}

/// One line per agent, used by `troupe run --monitor`.
pub(crate) fn progress_line(snapshot: &StatusSnapshot) -> String {
    let mut line = format!(
        "  {:<24} {} ({}/{}) {}",
        snapshot.agent_id.as_str(),
        progress_bar(snapshot.progress_percent),
        snapshot.cursor,
        snapshot.total,
        state_label(snapshot.state),
    );
    if let Some(task) = &snapshot.current_task {
        line.push_str(&format!(" :: {task}"));
    }
    line
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_is_always_twenty_cells() {
        for percent in [0.0, 12.5, 50.0, 99.9, 100.0, 140.0, -3.0] {
            let bar = progress_bar(percent);
            let cells = bar.chars().filter(|c| *c == '█' || *c == '░').count();
            assert_eq!(cells, BAR_WIDTH, "{bar}");
        }
    }

    #[test]
    fn bar_fills_one_cell_per_five_percent() {
        assert!(progress_bar(0.0).starts_with(&"░".repeat(20)));
        let half = format!("{}{}", "█".repeat(10), "░".repeat(10));
        assert!(progress_bar(50.0).starts_with(&half));
        assert!(progress_bar(100.0).starts_with(&"█".repeat(20)));
        assert!(progress_bar(100.0).ends_with("100.0%"));
    }
}
