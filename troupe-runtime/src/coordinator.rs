//! Registry and lifecycle owner for a set of agents.
//!
//! Every coordinator operation runs on the caller's thread and is safe while
//! agents are running. Each started agent gets its own named OS thread; its
//! join handle is kept until [`Coordinator::wait_for_completion`] (or
//! [`Coordinator::remove_agent`]) collects it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::JoinHandle;

use tracing::Span;
use troupe_core::{AgentId, AgentState, StatusSnapshot, TaskList};

use crate::agent::{Agent, AgentHandle};
use crate::dispatch::Dispatcher;
use crate::error::CoordinatorError;

pub struct Coordinator {
    dispatcher: Arc<Dispatcher>,
    agents: RwLock<BTreeMap<AgentId, AgentHandle>>,
    /// Ids of removed agents; never handed out again.
    retired: Mutex<HashSet<AgentId>>,
    threads: Mutex<HashMap<AgentId, JoinHandle<()>>>,
    span: Span,
}

impl Coordinator {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            agents: RwLock::new(BTreeMap::new()),
            retired: Mutex::new(HashSet::new()),
            threads: Mutex::new(HashMap::new()),
            span: tracing::info_span!("coordinator"),
        }
    }

    /// Parent span for this coordinator and every agent it creates.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    pub fn create_agent(
        &self,
        id: impl Into<AgentId>,
        tasks: impl Into<TaskList>,
    ) -> Result<AgentHandle, CoordinatorError> {
        let id = id.into();
        let tasks = tasks.into();

        let mut agents = write(&self.agents);
        if agents.contains_key(&id) || lock(&self.retired).contains(&id) {
            return Err(CoordinatorError::DuplicateAgent(id));
        }

        let span = tracing::info_span!(parent: &self.span, "agent", agent_id = %id);
        let agent = Arc::new(Agent::with_span(
            id.clone(),
            tasks,
            self.dispatcher.clone(),
            span,
        ));
        agents.insert(id.clone(), agent.clone());
        tracing::debug!(
            parent: &self.span,
            agent_id = %id,
            tasks = agent.tasks().len(),
            "agent created"
        );
        Ok(agent)
    }

    /// Discard a registry entry. Only idle or terminal agents can be removed;
    /// the id stays reserved.
    pub fn remove_agent(&self, id: &AgentId) -> Result<AgentHandle, CoordinatorError> {
        let agent = {
            let mut agents = write(&self.agents);
            let agent = agents
                .get(id)
                .ok_or_else(|| CoordinatorError::UnknownAgent(id.clone()))?;
            if agent.state() == AgentState::Running {
                return Err(CoordinatorError::NotTerminal(id.clone()));
            }
            lock(&self.retired).insert(id.clone());
            agents
                .remove(id)
                .ok_or_else(|| CoordinatorError::UnknownAgent(id.clone()))?
        };

        if let Some(thread) = lock(&self.threads).remove(id) {
            join_agent_thread(id, thread);
        }
        Ok(agent)
    }

    pub fn agent(&self, id: &AgentId) -> Option<AgentHandle> {
        read(&self.agents).get(id).cloned()
    }

    pub fn agent_ids(&self) -> Vec<AgentId> {
        read(&self.agents).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        read(&self.agents).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn start_agent(&self, id: &AgentId) -> Result<(), CoordinatorError> {
        let agent = self
            .agent(id)
            .ok_or_else(|| CoordinatorError::UnknownAgent(id.clone()))?;
        self.spawn(agent)
    }

    /// Start every idle agent. Returns how many were started.
    pub fn start_all(&self) -> Result<usize, CoordinatorError> {
        let idle: Vec<AgentHandle> = read(&self.agents)
            .values()
            .filter(|agent| agent.state() == AgentState::Idle)
            .cloned()
            .collect();

        let mut started = 0;
        for agent in idle {
            match self.spawn(agent) {
                Ok(()) => started += 1,
                Err(CoordinatorError::AlreadyStarted(_)) => {}
                Err(err) => return Err(err),
            }
        }
        tracing::info!(parent: &self.span, started, "agents started");
        Ok(started)
    }

    pub fn stop_agent(&self, id: &AgentId) -> Result<(), CoordinatorError> {
        let agent = self
            .agent(id)
            .ok_or_else(|| CoordinatorError::UnknownAgent(id.clone()))?;
        tracing::info!(parent: &self.span, agent_id = %id, "stop requested");
        agent.stop();
        Ok(())
    }

    pub fn stop_all(&self) {
        tracing::info!(parent: &self.span, "stop requested for all agents");
        for agent in read(&self.agents).values() {
            agent.stop();
        }
    }

    /// Block until every spawned agent thread has exited.
    ///
    /// Agents started while waiting are joined as well.
    pub fn wait_for_completion(&self) {
        loop {
            let pending: Vec<(AgentId, JoinHandle<()>)> = lock(&self.threads).drain().collect();
            if pending.is_empty() {
                break;
            }
            for (id, thread) in pending {
                join_agent_thread(&id, thread);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// One independent snapshot per registered agent.
    pub fn get_all_status(&self) -> BTreeMap<AgentId, StatusSnapshot> {
        read(&self.agents)
            .iter()
            .map(|(id, agent)| (id.clone(), agent.status()))
            .collect()
    }

    /// `true` when no registered agent is idle or running.
    pub fn all_terminal(&self) -> bool {
        read(&self.agents)
            .values()
            .all(|agent| agent.state().is_terminal())
    }

    fn spawn(&self, agent: AgentHandle) -> Result<(), CoordinatorError> {
        agent.begin()?;

        // Nothing to dispatch: finish on the caller's thread.
        if agent.tasks().is_empty() {
            agent.run();
            return Ok(());
        }

        let id = agent.id().clone();
        let runner = agent.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("agent-{id}"))
            .spawn(move || runner.run());

        match spawned {
            Ok(thread) => {
                lock(&self.threads).insert(id, thread);
                Ok(())
            }
            Err(source) => {
                agent.revert_begin();
                tracing::error!(
                    parent: &self.span,
                    agent_id = %id,
                    error = %source,
                    "failed to spawn agent thread"
                );
                Err(CoordinatorError::Spawn { id, source })
            }
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if !self.all_terminal() {
            self.stop_all();
        }
        self.wait_for_completion();
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("agents", &self.agent_ids())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

fn join_agent_thread(id: &AgentId, thread: JoinHandle<()>) {
    if thread.join().is_err() {
        tracing::error!(agent_id = %id, "agent thread panicked");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(rw: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    rw.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(rw: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    rw.write().unwrap_or_else(PoisonError::into_inner)
}
