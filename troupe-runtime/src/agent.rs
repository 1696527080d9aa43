//! A single agent: one task list, one cursor, one sequential loop.
//!
//! All mutable state lives in an [`AgentRecord`] behind a mutex. The loop
//! holds the lock only between dispatches, so a status read never waits on
//! a running handler and never sees a half-applied task outcome.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Span;
use troupe_core::{progress_percent, AgentId, AgentState, StatusSnapshot, Task, TaskList};

use crate::cancel::CancellationSignal;
use crate::dispatch::Dispatcher;
use crate::error::{CoordinatorError, DispatchFailure};

/// Shared handle to a registered agent.
pub type AgentHandle = Arc<Agent>;

/// A task that did not succeed, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedTask {
    pub task: Task,
    pub failure: DispatchFailure,
}

#[derive(Debug, Default)]
struct AgentRecord {
    state: AgentState,
    cursor: usize,
    completed: Vec<Task>,
    failed: Vec<FailedTask>,
    current_task: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl AgentRecord {
    fn finish(&mut self, state: AgentState) {
        self.state = state;
        self.current_task = None;
        self.finished_at = Some(Utc::now());
    }
}

pub struct Agent {
    id: AgentId,
    tasks: TaskList,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationSignal,
    record: Mutex<AgentRecord>,
    span: Span,
}

impl Agent {
    pub fn new(id: AgentId, tasks: TaskList, dispatcher: Arc<Dispatcher>) -> Self {
        let span = tracing::info_span!("agent", agent_id = %id);
        Self::with_span(id, tasks, dispatcher, span)
    }

    pub(crate) fn with_span(
        id: AgentId,
        tasks: TaskList,
        dispatcher: Arc<Dispatcher>,
        span: Span,
    ) -> Self {
        Self {
            id,
            tasks,
            dispatcher,
            cancel: CancellationSignal::new(),
            record: Mutex::new(AgentRecord::default()),
            span,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn tasks(&self) -> &TaskList {
        &self.tasks
    }

    pub fn state(&self) -> AgentState {
        self.lock().state
    }

    /// Run the loop on the calling thread until the agent is terminal.
    ///
    /// Fails with `AlreadyStarted` unless the agent is idle.
    pub fn start(&self) -> Result<(), CoordinatorError> {
        self.begin()?;
        self.run();
        Ok(())
    }

    /// Ask the agent to stop after its in-flight task.
    ///
    /// An idle agent becomes `Stopped` immediately; a terminal agent is left
    /// untouched.
    pub fn stop(&self) {
        let mut record = self.lock();
        match record.state {
            AgentState::Idle => {
                record.finish(AgentState::Stopped);
                tracing::info!(parent: &self.span, "agent stopped before start");
            }
            AgentState::Running => self.cancel.request(),
            AgentState::Completed | AgentState::Stopped => {}
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        let record = self.lock();
        let total = self.tasks.len();
        StatusSnapshot {
            agent_id: self.id.clone(),
            state: record.state,
            running: record.state == AgentState::Running,
            cursor: record.cursor,
            total,
            completed_count: record.completed.len(),
            failed_count: record.failed.len(),
            progress_percent: progress_percent(record.cursor, total),
            current_task: record.current_task.clone(),
        }
    }

    pub fn completed(&self) -> Vec<Task> {
        self.lock().completed.clone()
    }

    pub fn failed(&self) -> Vec<FailedTask> {
        self.lock().failed.clone()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.lock().finished_at
    }

    /// `Idle → Running`. Done on the caller's thread so a second start is
    /// rejected even before the loop thread is scheduled.
    pub(crate) fn begin(&self) -> Result<(), CoordinatorError> {
        let mut record = self.lock();
        if record.state != AgentState::Idle {
            return Err(CoordinatorError::AlreadyStarted(self.id.clone()));
        }
        record.state = AgentState::Running;
        record.started_at = Some(Utc::now());
        Ok(())
    }

    /// Undo [`Agent::begin`] when no thread could be spawned for the loop.
    pub(crate) fn revert_begin(&self) {
        let mut record = self.lock();
        if record.state == AgentState::Running && record.cursor == 0 {
            record.state = AgentState::Idle;
            record.started_at = None;
            self.cancel.take();
        }
    }

    pub(crate) fn run(&self) {
        let _entered = self.span.enter();
        tracing::info!(tasks = self.tasks.len(), "agent started");

        loop {
            let task = {
                let mut record = self.lock();
                if record.state != AgentState::Running {
                    return;
                }
                if self.cancel.take() {
                    record.finish(AgentState::Stopped);
                    tracing::info!(
                        cursor = record.cursor,
                        total = self.tasks.len(),
                        "agent stopped"
                    );
                    return;
                }
                let Some(task) = self.tasks.get(record.cursor) else {
                    record.finish(AgentState::Completed);
                    tracing::info!(
                        completed = record.completed.len(),
                        failed = record.failed.len(),
                        "agent completed"
                    );
                    return;
                };
                record.current_task = Some(task.title().to_string());
                task
            };

            tracing::debug!(task = task.title(), kind = %task.kind(), "dispatching task");
            let outcome = self.dispatcher.dispatch(task);

            let mut record = self.lock();
            match outcome {
                Ok(()) => {
                    tracing::info!(task = task.title(), "task completed");
                    record.completed.push(task.clone());
                }
                Err(failure) => {
                    tracing::warn!(task = task.title(), error = %failure, "task failed");
                    record.failed.push(FailedTask {
                        task: task.clone(),
                        failure,
                    });
                }
            }
            record.cursor += 1;
            record.current_task = None;
        }
    }

    fn lock(&self) -> MutexGuard<'_, AgentRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("tasks", &self.tasks.len())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use troupe_core::BoxError;

    fn ok(_: &Task) -> Result<(), BoxError> {
        Ok(())
    }

    fn agent(tasks: Vec<Task>, dispatcher: Dispatcher) -> Agent {
        Agent::new(AgentId::from("a"), TaskList::new(tasks), Arc::new(dispatcher))
    }

    #[test]
    fn runs_every_task_in_order() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let record = move |t: &Task| -> Result<(), BoxError> {
            tx.lock().expect("lock").send(t.title().to_string())?;
            Ok(())
        };
        let dispatcher = Dispatcher::new().with_handler("testing", record);
        let agent = agent(
            vec![
                Task::new("testing", "one"),
                Task::new("testing", "two"),
                Task::new("testing", "three"),
            ],
            dispatcher,
        );

        agent.start().expect("start");

        let seen: Vec<String> = rx.try_iter().collect();
        assert_eq!(seen, ["one", "two", "three"]);
        let status = agent.status();
        assert_eq!(status.state, AgentState::Completed);
        assert!(!status.running);
        assert_eq!(status.cursor, 3);
        assert_eq!(status.progress_percent, 100.0);
        assert!(agent.finished_at().is_some());
    }

    #[test]
    fn failures_are_recorded_and_loop_continues() {
        let agent = agent(
            vec![
                Task::new("testing", "ok"),
                Task::new("unknown", "nobody handles me"),
                Task::new("testing", "ok again"),
            ],
            Dispatcher::new().with_handler("testing", ok),
        );
        agent.start().expect("start");

        let status = agent.status();
        assert_eq!(status.completed_count, 2);
        assert_eq!(status.failed_count, 1);
        assert_eq!(status.cursor, status.completed_count + status.failed_count);
        let failed = agent.failed();
        assert_eq!(failed[0].task.title(), "nobody handles me");
        assert_eq!(failed[0].failure.to_string(), "unknown task type: unknown");
    }

    #[test]
    fn empty_task_list_completes_immediately() {
        let agent = agent(vec![], Dispatcher::new());
        agent.start().expect("start");
        let status = agent.status();
        assert_eq!(status.state, AgentState::Completed);
        assert_eq!(status.progress_percent, 0.0);
    }

    #[test]
    fn second_start_is_rejected() {
        let agent = agent(vec![], Dispatcher::new());
        agent.start().expect("first start");
        let err = agent.start().unwrap_err();
        assert!(matches!(err, CoordinatorError::AlreadyStarted(_)));
    }

    #[test]
    fn stop_on_idle_agent_prevents_dispatch() {
        let agent = agent(
            vec![Task::new("testing", "never")],
            Dispatcher::new().with_handler("testing", ok),
        );
        agent.stop();
        assert_eq!(agent.state(), AgentState::Stopped);
        assert!(agent.start().is_err());
        assert_eq!(agent.status().cursor, 0);
    }

    #[test]
    fn stop_on_terminal_agent_is_a_noop() {
        let agent = agent(
            vec![Task::new("testing", "t")],
            Dispatcher::new().with_handler("testing", ok),
        );
        agent.start().expect("start");
        agent.stop();
        assert_eq!(agent.state(), AgentState::Completed);
        assert!(!agent.cancel.is_requested());
    }

    #[test]
    fn stop_requested_during_a_task_takes_effect_after_it() {
        // The handler stops its own agent while the first task is in flight.
        let slot: Arc<Mutex<Option<Arc<Agent>>>> = Arc::new(Mutex::new(None));
        let handle = slot.clone();
        let stop_self = move |_: &Task| -> Result<(), BoxError> {
            if let Some(agent) = handle.lock().expect("lock").as_ref() {
                agent.stop();
            }
            Ok(())
        };
        let dispatcher = Dispatcher::new().with_handler("testing", stop_self);
        let agent = Arc::new(Agent::new(
            AgentId::from("self-stopper"),
            TaskList::new(vec![
                Task::new("testing", "first"),
                Task::new("testing", "second"),
            ]),
            Arc::new(dispatcher),
        ));
        *slot.lock().expect("lock") = Some(agent.clone());

        agent.start().expect("start");
        *slot.lock().expect("lock") = None;

        let status = agent.status();
        assert_eq!(status.state, AgentState::Stopped);
        assert_eq!(status.cursor, 1, "in-flight task finishes, next is skipped");
        assert_eq!(status.completed_count, 1);
    }
}
