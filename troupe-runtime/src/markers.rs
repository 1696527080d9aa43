//! File-based stop requests.
//!
//! `troupe stop` runs in a different process from the coordinator, so it
//! drops marker files under `<project>/.troupe/`:
//!
//! ```text
//! .troupe/stop/<agent_id>   stop one agent
//! .troupe/stop-all          stop every agent
//! ```
//!
//! The supervisor consumes them and translates each into an in-process
//! cancellation request.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use troupe_core::AgentId;

use crate::coordinator::Coordinator;
use crate::error::{io_err, SupervisorError};
use crate::paths::{stop_all_path, stop_dir};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopRequest {
    All,
    Agent(AgentId),
}

/// Drop a marker asking `agent` to stop.
pub fn request_stop(project: &Path, agent: &AgentId) -> Result<PathBuf, SupervisorError> {
    let name = agent.as_str();
    let has_separator = name.contains(|c: char| c == '/' || c == '\\');
    if name.is_empty() || name == "." || name == ".." || has_separator {
        return Err(SupervisorError::InvalidMarker(name.to_string()));
    }
    let dir = stop_dir(project);
    fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    let path = dir.join(name);
    write_marker(&path)?;
    Ok(path)
}

/// Drop the marker asking every agent to stop.
pub fn request_stop_all(project: &Path) -> Result<PathBuf, SupervisorError> {
    let path = stop_all_path(project);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    write_marker(&path)?;
    Ok(path)
}

/// Remove every marker, returning how many were found.
///
/// Called at run start so requests aimed at an earlier run are ignored.
pub fn clear(project: &Path) -> Result<usize, SupervisorError> {
    Ok(consume(project)?.len())
}

/// Read and delete all pending markers.
pub fn consume(project: &Path) -> Result<Vec<StopRequest>, SupervisorError> {
    let mut requests = Vec::new();

    let all = stop_all_path(project);
    if remove_if_present(&all)? {
        requests.push(StopRequest::All);
    }

    let dir = stop_dir(project);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(requests),
        Err(err) => return Err(io_err(&dir, err)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(&dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
            continue;
        };
        if remove_if_present(&path)? {
            names.push(name);
        }
    }
    names.sort();
    requests.extend(names.into_iter().map(|n| StopRequest::Agent(AgentId::from(n))));
    Ok(requests)
}

/// Forward stop requests to the coordinator. Unknown agents are logged and
/// skipped.
pub fn apply(coordinator: &Coordinator, requests: &[StopRequest]) {
    for request in requests {
        match request {
            StopRequest::All => coordinator.stop_all(),
            StopRequest::Agent(id) => {
                if let Err(err) = coordinator.stop_agent(id) {
                    tracing::warn!(error = %err, "ignoring stop marker");
                }
            }
        }
    }
}

pub(crate) fn is_marker_path(project: &Path, path: &Path) -> bool {
    path == stop_all_path(project) || path.parent() == Some(stop_dir(project).as_path())
}

fn write_marker(path: &Path) -> Result<(), SupervisorError> {
    fs::write(path, Utc::now().to_rfc3339()).map_err(|e| io_err(path, e))
}

fn remove_if_present(path: &Path) -> Result<bool, SupervisorError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;
    use troupe_core::{BoxError, Task, TaskList};

    use crate::dispatch::Dispatcher;

    #[test]
    fn consume_reads_and_removes_markers() {
        let dir = TempDir::new().expect("tempdir");
        request_stop(dir.path(), &AgentId::from("writer")).expect("marker");
        request_stop(dir.path(), &AgentId::from("content")).expect("marker");
        request_stop_all(dir.path()).expect("marker");

        let requests = consume(dir.path()).expect("consume");
        assert_eq!(
            requests,
            vec![
                StopRequest::All,
                StopRequest::Agent(AgentId::from("content")),
                StopRequest::Agent(AgentId::from("writer")),
            ]
        );
        assert!(consume(dir.path()).expect("second consume").is_empty());
    }

    #[test]
    fn clear_on_missing_state_dir_is_zero() {
        let dir = TempDir::new().expect("tempdir");
        assert_eq!(clear(dir.path()).expect("clear"), 0);
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("..")]
    #[case("../escape")]
    #[case("a\\b")]
    fn unsafe_marker_names_are_rejected(#[case] name: &str) {
        let dir = TempDir::new().expect("tempdir");
        let err = request_stop(dir.path(), &AgentId::from(name)).unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidMarker(_)));
    }

    #[test]
    fn marker_path_detection() {
        let project = Path::new("/p");
        assert!(is_marker_path(project, Path::new("/p/.troupe/stop-all")));
        assert!(is_marker_path(project, Path::new("/p/.troupe/stop/writer")));
        assert!(!is_marker_path(project, Path::new("/p/.troupe/status.json")));
    }

    #[test]
    fn apply_stops_idle_agents_and_skips_unknown() {
        let coordinator = Coordinator::new(
            Dispatcher::new()
                .with_handler("testing", |_: &Task| -> Result<(), BoxError> { Ok(()) }),
        );
        let agent = coordinator
            .create_agent("writer", TaskList::empty())
            .expect("create");
        apply(
            &coordinator,
            &[
                StopRequest::Agent(AgentId::from("ghost")),
                StopRequest::Agent(AgentId::from("writer")),
            ],
        );
        assert!(agent.state().is_terminal());
    }
}
