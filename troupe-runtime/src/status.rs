//! Aggregated status reports and the `status.json` file.
//!
//! A [`StatusReport`] is built from independent per-agent snapshots, so it
//! is consistent per agent but not a global atomic cut.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use troupe_core::{progress_percent, AgentId, AgentState, StatusSnapshot};

use crate::coordinator::Coordinator;
use crate::error::{io_err, SupervisorError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub agents: Vec<StatusSnapshot>,
    pub totals: Totals,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub agents: usize,
    pub running: usize,
    pub tasks: usize,
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    pub progress_percent: f64,
}

impl StatusReport {
    pub fn collect(coordinator: &Coordinator) -> Self {
        Self::from_snapshots(coordinator.get_all_status())
    }

    pub fn from_snapshots(snapshots: BTreeMap<AgentId, StatusSnapshot>) -> Self {
        let agents: Vec<StatusSnapshot> = snapshots.into_values().collect();
        let mut totals = agents.iter().fold(Totals::default(), |mut acc, s| {
            acc.agents += 1;
            acc.running += usize::from(s.running);
            acc.tasks += s.total;
            acc.processed += s.cursor;
            acc.completed += s.completed_count;
            acc.failed += s.failed_count;
            acc
        });
        totals.progress_percent = progress_percent(totals.processed, totals.tasks);

        Self {
            generated_at: Utc::now(),
            agents,
            totals,
        }
    }

    pub fn agent(&self, id: &AgentId) -> Option<&StatusSnapshot> {
        self.agents.iter().find(|s| &s.agent_id == id)
    }

    pub fn all_terminal(&self) -> bool {
        self.agents.iter().all(|s| s.state.is_terminal())
    }

    pub fn count_in(&self, state: AgentState) -> usize {
        self.agents.iter().filter(|s| s.state == state).count()
    }

    /// Completed share of processed tasks, `None` before anything ran.
    pub fn success_rate(&self) -> Option<f64> {
        let processed = self.totals.completed + self.totals.failed;
        (processed > 0).then(|| 100.0 * self.totals.completed as f64 / processed as f64)
    }
}

/// Atomically replace the report at `path` (`.tmp` sibling, then rename).
pub fn write_report(path: &Path, report: &StatusReport) -> Result<(), SupervisorError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let contents = serde_json::to_vec_pretty(report).map_err(|source| SupervisorError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents).map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// Read the last written report; `Ok(None)` when there is none yet.
pub fn read_report(path: &Path) -> Result<Option<StatusReport>, SupervisorError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(path, err)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| SupervisorError::Json {
            path: path.to_path_buf(),
            source,
        })
}
