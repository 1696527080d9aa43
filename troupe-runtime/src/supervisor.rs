//! Async supervision of a coordinator run.
//!
//! Four tasks run side by side until every agent thread has exited:
//!
//! 1. completion waiter: `wait_for_completion` on a blocking thread
//! 2. reporter: writes `status.json` and notifies the observer every tick
//! 3. marker watcher: turns `.troupe/stop*` files into stop requests
//! 4. signal handler: Ctrl-C → `stop_all`
//!
//! The waiter broadcasts shutdown when it returns; the others exit on it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};

use crate::coordinator::Coordinator;
use crate::error::{io_err, SupervisorError};
use crate::markers;
use crate::paths::{logs_dir, state_root, status_path, stop_dir, MARKER_RESCAN_INTERVAL};
use crate::status::{write_report, StatusReport};

/// Called with every status report, including the final one.
pub type Observer = Arc<dyn Fn(&StatusReport) + Send + Sync>;

const MIN_STATUS_INTERVAL: Duration = Duration::from_millis(50);

pub struct Supervisor {
    coordinator: Arc<Coordinator>,
    project_root: PathBuf,
    status_interval: Duration,
    watch_markers: bool,
    handle_ctrl_c: bool,
    observer: Option<Observer>,
}

impl Supervisor {
    pub fn new(coordinator: Arc<Coordinator>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            coordinator,
            project_root: project_root.into(),
            status_interval: Duration::from_secs(2),
            watch_markers: true,
            handle_ctrl_c: true,
            observer: None,
        }
    }

    pub fn status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval.max(MIN_STATUS_INTERVAL);
        self
    }

    pub fn watch_markers(mut self, enabled: bool) -> Self {
        self.watch_markers = enabled;
        self
    }

    pub fn handle_ctrl_c(mut self, enabled: bool) -> Self {
        self.handle_ctrl_c = enabled;
        self
    }

    pub fn on_report<F>(mut self, observer: F) -> Self
    where
        F: Fn(&StatusReport) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Build a runtime and block the current thread until the run ends.
    pub fn run_blocking(self) -> Result<StatusReport, SupervisorError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| io_err("tokio-runtime", e))?;
        runtime.block_on(self.run())
    }

    /// Clear stale stop markers, start every idle agent, and supervise until
    /// all agent threads have exited. Returns the final report, which is
    /// also written to `status.json`.
    pub async fn run(self) -> Result<StatusReport, SupervisorError> {
        let Supervisor {
            coordinator,
            project_root,
            status_interval,
            watch_markers,
            handle_ctrl_c,
            observer,
        } = self;

        ensure_state_dirs(&project_root)?;
        let stale = markers::clear(&project_root)?;
        if stale > 0 {
            tracing::info!(count = stale, "cleared stale stop markers");
        }
        let started = coordinator.start_all()?;
        tracing::info!(agents = coordinator.len(), started, "supervising run");

        let status_file = status_path(&project_root);
        let (shutdown_tx, _) = broadcast::channel::<()>(16);

        let waiter_handle = {
            let shutdown = shutdown_tx.clone();
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                let result = tokio::task::spawn_blocking(move || coordinator.wait_for_completion())
                    .await
                    .map_err(|err| {
                        SupervisorError::Task(format!("completion waiter join error: {err}"))
                    });
                let _ = shutdown.send(());
                result
            })
        };

        let reporter_handle = {
            let shutdown_rx = shutdown_tx.subscribe();
            let coordinator = coordinator.clone();
            let status_file = status_file.clone();
            let observer = observer.clone();
            tokio::spawn(async move {
                reporter_task(
                    coordinator,
                    status_file,
                    status_interval,
                    observer,
                    shutdown_rx,
                )
                .await
            })
        };

        let marker_handle = {
            let shutdown_rx = shutdown_tx.subscribe();
            let coordinator = coordinator.clone();
            let project_root = project_root.clone();
            tokio::spawn(async move {
                if watch_markers {
                    marker_task(coordinator, project_root, shutdown_rx).await
                } else {
                    Ok(())
                }
            })
        };

        let signal_handle = {
            let mut shutdown_rx = shutdown_tx.subscribe();
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                if !handle_ctrl_c {
                    return Ok(());
                }
                tokio::select! {
                    _ = shutdown_rx.recv() => {}
                    signal = tokio::signal::ctrl_c() => match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, stopping agents");
                            coordinator.stop_all();
                        }
                        Err(err) => tracing::warn!(error = %err, "ctrl-c handler unavailable"),
                    }
                }
                Ok(())
            })
        };

        let (waiter_result, reporter_result, marker_result, signal_result) =
            tokio::join!(waiter_handle, reporter_handle, marker_handle, signal_handle);

        handle_join("completion_waiter", waiter_result)?;
        handle_join("reporter", reporter_result)?;
        handle_join("marker_watcher", marker_result)?;
        handle_join("signal_handler", signal_result)?;

        let report = StatusReport::collect(&coordinator);
        write_report(&status_file, &report)?;
        if let Some(observer) = &observer {
            observer(&report);
        }
        tracing::info!(
            completed = report.totals.completed,
            failed = report.totals.failed,
            "run finished"
        );
        Ok(report)
    }
}

async fn reporter_task(
    coordinator: Arc<Coordinator>,
    status_file: PathBuf,
    interval: Duration,
    observer: Option<Observer>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), SupervisorError> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let report = StatusReport::collect(&coordinator);
                if let Err(err) = write_report(&status_file, &report) {
                    tracing::warn!(error = %err, "failed to write status file");
                }
                if let Some(observer) = &observer {
                    observer(&report);
                }
            }
        }
    }
    Ok(())
}

async fn marker_task(
    coordinator: Arc<Coordinator>,
    project_root: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), SupervisorError> {
    // Canonicalize so watcher paths (which arrive as real paths, e.g.
    // /private/var/... on macOS) match `is_marker_path`.
    let project_root = fs::canonicalize(&project_root).unwrap_or(project_root);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let _watcher = match watch_marker_dirs(&project_root, event_tx) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            tracing::warn!(error = %err, "stop marker watcher unavailable, polling instead");
            None
        }
    };

    let mut rescan = tokio::time::interval(MARKER_RESCAN_INTERVAL);
    rescan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = rescan.tick() => drain_markers(&coordinator, &project_root),
            Some(event) = event_rx.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if is_relevant_event_kind(&event.kind)
                    && event.paths.iter().any(|p| markers::is_marker_path(&project_root, p))
                {
                    drain_markers(&coordinator, &project_root);
                }
            }
        }
    }
    Ok(())
}

fn watch_marker_dirs(
    project_root: &Path,
    event_tx: mpsc::UnboundedSender<notify::Result<Event>>,
) -> Result<RecommendedWatcher, SupervisorError> {
    let mut watcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&state_root(project_root), RecursiveMode::NonRecursive)?;
    watcher.watch(&stop_dir(project_root), RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

fn drain_markers(coordinator: &Coordinator, project_root: &Path) {
    match markers::consume(project_root) {
        Ok(requests) if requests.is_empty() => {}
        Ok(requests) => {
            tracing::info!(count = requests.len(), "stop markers received");
            markers::apply(coordinator, &requests);
        }
        Err(err) => tracing::warn!(error = %err, "failed to read stop markers"),
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn ensure_state_dirs(project_root: &Path) -> Result<(), SupervisorError> {
    for dir in [stop_dir(project_root), logs_dir(project_root)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), SupervisorError>, tokio::task::JoinError>,
) -> Result<(), SupervisorError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(SupervisorError::Task(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use troupe_core::{AgentId, AgentState, BoxError, Task, TaskList};

    use crate::dispatch::Dispatcher;
    use crate::status::read_report;

    fn sleepy(ms: u64) -> impl Fn(&Task) -> Result<(), BoxError> + Send + Sync {
        move |_: &Task| {
            std::thread::sleep(Duration::from_millis(ms));
            Ok(())
        }
    }

    fn supervisor(coordinator: Arc<Coordinator>, root: &Path) -> Supervisor {
        Supervisor::new(coordinator, root)
            .status_interval(Duration::from_millis(50))
            .handle_ctrl_c(false)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_starts_idle_agents_and_writes_final_status() {
        let dir = TempDir::new().expect("tempdir");
        let coordinator = Arc::new(Coordinator::new(
            Dispatcher::new().with_handler("testing", sleepy(5)),
        ));
        coordinator
            .create_agent("a", vec![Task::new("testing", "t1"), Task::new("testing", "t2")])
            .expect("create");
        coordinator.create_agent("b", TaskList::empty()).expect("create");

        let report = supervisor(coordinator.clone(), dir.path())
            .run()
            .await
            .expect("run");

        assert!(report.all_terminal());
        assert_eq!(report.totals.completed, 2);
        let on_disk = read_report(&status_path(dir.path()))
            .expect("read")
            .expect("status.json written");
        assert_eq!(on_disk.totals, report.totals);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn observer_sees_monotone_progress() {
        let dir = TempDir::new().expect("tempdir");
        let coordinator = Arc::new(Coordinator::new(
            Dispatcher::new().with_handler("testing", sleepy(20)),
        ));
        let tasks: Vec<Task> = (0..6).map(|i| Task::new("testing", format!("t{i}"))).collect();
        coordinator.create_agent("a", tasks).expect("create");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        supervisor(coordinator, dir.path())
            .on_report(move |report| {
                sink.lock().expect("lock").push(report.totals.processed);
            })
            .run()
            .await
            .expect("run");

        let seen = seen.lock().expect("lock");
        assert!(seen.len() >= 2, "expected periodic reports, got {seen:?}");
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert_eq!(seen.last().copied(), Some(6));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_marker_stops_a_running_agent() {
        let dir = TempDir::new().expect("tempdir");
        let coordinator = Arc::new(Coordinator::new(
            Dispatcher::new().with_handler("testing", sleepy(50)),
        ));
        let tasks: Vec<Task> = (0..100).map(|i| Task::new("testing", format!("t{i}"))).collect();
        coordinator.create_agent("slow", tasks).expect("create");

        let root = dir.path().to_path_buf();
        let marker_root = root.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            markers::request_stop(&marker_root, &AgentId::from("slow")).expect("marker");
        });

        let report = supervisor(coordinator, &root).run().await.expect("run");
        writer.await.expect("writer");

        let slow = report.agent(&AgentId::from("slow")).expect("agent in report");
        assert_eq!(slow.state, AgentState::Stopped);
        assert!(slow.cursor < 100);
        assert!(markers::consume(&root).expect("consume").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stale_markers_are_cleared_before_start() {
        let dir = TempDir::new().expect("tempdir");
        markers::request_stop_all(dir.path()).expect("stale marker");

        let coordinator = Arc::new(Coordinator::new(
            Dispatcher::new().with_handler("testing", sleepy(1)),
        ));
        coordinator
            .create_agent("a", vec![Task::new("testing", "t")])
            .expect("create");

        let report = supervisor(coordinator, dir.path()).run().await.expect("run");
        assert_eq!(report.count_in(AgentState::Completed), 1);
    }
}
