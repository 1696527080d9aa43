use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use troupe_core::{AgentId, TaskKind};

/// Management errors surfaced by the coordinator to its caller.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("agent '{0}' already exists")]
    DuplicateAgent(AgentId),

    #[error("unknown agent '{0}'")]
    UnknownAgent(AgentId),

    #[error("agent '{0}' has already been started")]
    AlreadyStarted(AgentId),

    #[error("agent '{0}' is still running")]
    NotTerminal(AgentId),

    #[error("failed to spawn thread for agent '{id}': {source}")]
    Spawn {
        id: AgentId,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single task did not succeed. Recorded with the task; never aborts
/// the agent loop.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DispatchFailure {
    #[error("unknown task type: {kind}")]
    UnknownTaskType { kind: TaskKind },

    #[error("{kind} handler failed: {message}")]
    Handler { kind: TaskKind, message: String },

    #[error("{kind} handler panicked: {message}")]
    Panicked { kind: TaskKind, message: String },
}

/// Error surface for the supervisor, status files and stop markers.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("status file error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("'{0}' cannot be used as a stop marker name")]
    InvalidMarker(String),

    #[error("{0}")]
    Task(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SupervisorError {
    SupervisorError::Io {
        path: path.into(),
        source,
    }
}
