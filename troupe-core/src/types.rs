//! Domain types shared by the runtime, the handlers and the CLI.
//!
//! Tasks are immutable once built: fields are private and only readable
//! through accessors. A [`TaskList`] is a shared read-only slice.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for an agent, unique within a coordinator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// The `type` tag of a task; the dispatcher's lookup key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskKind(pub String);

impl TaskKind {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TaskKind {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskKind {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A single typed unit of work.
///
/// On the wire a task is a flat mapping: `type` and `title` are required,
/// every other key is handler-specific and lands in [`Task::payload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "type")]
    kind: TaskKind,
    title: String,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl Task {
    pub fn new(kind: impl Into<TaskKind>, title: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            title: title.into(),
            payload: Map::new(),
        }
    }

    /// Builder method to add a payload field. Only usable before the task is
    /// handed to a [`TaskList`].
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// A payload field as a non-empty string.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

// ---------------------------------------------------------------------------
// TaskList
// ---------------------------------------------------------------------------

/// Ordered, immutable sequence of tasks owned by one agent.
///
/// Cloning is cheap and shares the same backing slice.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskList(Arc<[Task]>);

impl TaskList {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self(tasks.into())
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn as_slice(&self) -> &[Task] {
        &self.0
    }
}

impl Deref for TaskList {
    type Target = [Task];

    fn deref(&self) -> &[Task] {
        &self.0
    }
}

impl From<Vec<Task>> for TaskList {
    fn from(tasks: Vec<Task>) -> Self {
        Self::new(tasks)
    }
}

impl FromIterator<Task> for TaskList {
    fn from_iter<I: IntoIterator<Item = Task>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Agent state + status snapshot
// ---------------------------------------------------------------------------

/// Lifecycle of an agent: `Idle → Running → {Completed, Stopped}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    #[default]
    Idle,
    Running,
    Completed,
    Stopped,
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::Idle => write!(f, "idle"),
            AgentState::Running => write!(f, "running"),
            AgentState::Completed => write!(f, "completed"),
            AgentState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Point-in-time copy of one agent's externally visible progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub agent_id: AgentId,
    pub state: AgentState,
    pub running: bool,
    pub cursor: usize,
    pub total: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub progress_percent: f64,
    /// Title of the task being dispatched right now, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
}

/// `100 * cursor / total`, defined as `0` for an empty task list.
pub fn progress_percent(cursor: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * cursor as f64 / total as f64
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
