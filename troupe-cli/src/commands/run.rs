//! `troupe run`: create agents from the manifest, start them and supervise
//! the run until every agent is completed or stopped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use troupe_core::{AgentId, AgentManifest, Manifest};
use troupe_handlers::builtin;
use troupe_runtime::{
    log_rotation::rotate_run_log, paths::run_log_path, Coordinator, Dispatcher, StatusReport,
    Supervisor,
};

use super::status::progress_line;
use super::stop::join_ids;
use crate::{logging, ManifestArg};

/// Start agents and supervise them until every one has finished.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub manifest: ManifestArg,

    /// Run only these agents (comma separated or repeated). Defaults to all.
    #[arg(long, short = 'a', value_name = "AGENT", value_delimiter = ',')]
    pub agents: Vec<String>,

    /// Print per-agent progress on every status tick.
    #[arg(long)]
    pub monitor: bool,

    /// Also write JSON logs to `.troupe/logs/run.log`.
    #[arg(long)]
    pub log_file: bool,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let (manifest, root) = self.manifest.load_with_root()?;

        if self.log_file {
            rotate_run_log(&root);
            logging::init_tracing(Some(&run_log_path(&root)))?;
        } else {
            logging::init_tracing(None)?;
        }

        let selected = select_agents(&manifest, &self.agents)?;
        std::fs::create_dir_all(&root)
            .with_context(|| format!("cannot create project root {}", root.display()))?;

        let mut dispatcher = Dispatcher::new();
        dispatcher.extend(builtin(&root, &manifest.settings));
        if let Some(secs) = manifest.settings.slow_task_warn_secs {
            dispatcher = dispatcher.with_slow_task_warning(Duration::from_secs(secs));
        }
        warn_unhandled(&dispatcher, &selected);

        let span = tracing::info_span!("coordinator", manifest = %self.manifest.path().display());
        let coordinator = Arc::new(Coordinator::new(dispatcher).with_span(span));
        for agent in &selected {
            coordinator
                .create_agent(agent.id.clone(), agent.task_list())
                .with_context(|| format!("failed to create agent '{}'", agent.id))?;
        }

        println!(
            "▶ Running {} agents ({} tasks) in {}",
            selected.len(),
            selected.iter().map(|a| a.tasks.len()).sum::<usize>(),
            root.display()
        );

        let mut supervisor = Supervisor::new(coordinator.clone(), &root)
            .status_interval(Duration::from_secs(manifest.settings.status_interval_secs));
        if self.monitor {
            supervisor = supervisor.on_report(print_progress);
        }
        let report = supervisor.run_blocking().context("run supervision failed")?;

        print_results(&coordinator, &report);
        Ok(())
    }
}

/// Agents named on the command line, or every agent when none are named.
fn select_agents<'m>(manifest: &'m Manifest, names: &[String]) -> Result<Vec<&'m AgentManifest>> {
    if names.is_empty() {
        return Ok(manifest.agents.iter().collect());
    }

    let mut selected = Vec::with_capacity(names.len());
    for name in names {
        let id = AgentId::from(name.as_str());
        let Some(agent) = manifest.agent(&id) else {
            bail!(
                "unknown agent '{name}'; valid agents: {}",
                join_ids(&manifest.agent_ids())
            );
        };
        if !selected.iter().any(|a: &&AgentManifest| a.id == agent.id) {
            selected.push(agent);
        }
    }
    Ok(selected)
}

fn warn_unhandled(dispatcher: &Dispatcher, agents: &[&AgentManifest]) {
    for agent in agents {
        for task in agent.tasks.iter().filter(|t| !dispatcher.handles(t.kind())) {
            tracing::warn!(
                agent_id = %agent.id,
                task = task.title(),
                kind = %task.kind(),
                "no handler registered; task will fail"
            );
        }
    }
}

fn print_progress(report: &StatusReport) {
    println!(
        "{} {:.1}% overall ({}/{} tasks, {} running)",
        report.generated_at.format("[%H:%M:%S]").to_string().bright_black(),
        report.totals.progress_percent,
        report.totals.processed,
        report.totals.tasks,
        report.totals.running,
    );
    for snapshot in &report.agents {
        println!("{}", progress_line(snapshot));
    }
}

fn print_results(coordinator: &Coordinator, report: &StatusReport) {
    let separator = "■".repeat(60).bright_black().to_string();
    println!("{separator}");
    println!("{}", "RESULTS".bold());
    for snapshot in &report.agents {
        println!("{}", progress_line(snapshot));
    }
    println!("{separator}");
    println!("Completed: {}", report.totals.completed.to_string().green());
    println!("Failed:    {}", report.totals.failed.to_string().red());
    match report.success_rate() {
        Some(rate) => println!("Success rate: {rate:.1}%"),
        None => println!("Success rate: n/a"),
    }

    let mut any_failed = false;
    for id in coordinator.agent_ids() {
        let Some(agent) = coordinator.agent(&id) else {
            continue;
        };
        for failed in agent.failed() {
            if !any_failed {
                println!("{separator}");
                println!("{}", "FAILURES".bold());
                any_failed = true;
            }
            println!(
                "  {} {} :: {} [{}]: {}",
                "✗".red(),
                id,
                failed.task.title(),
                failed.task.kind(),
                failed.failure
            );
        }
    }
}
