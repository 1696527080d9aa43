use std::path::{Path, PathBuf};
use std::time::Duration;

pub const STATE_DIR: &str = ".troupe";
pub const STATUS_FILE: &str = "status.json";
pub const STOP_DIR: &str = "stop";
pub const STOP_ALL_MARKER: &str = "stop-all";
pub const LOGS_DIR: &str = "logs";
pub const RUN_LOG: &str = "run.log";

/// Fallback rescan of the stop markers when no watcher event arrives.
pub const MARKER_RESCAN_INTERVAL: Duration = Duration::from_secs(1);

pub fn state_root(project: &Path) -> PathBuf {
    project.join(STATE_DIR)
}

pub fn status_path(project: &Path) -> PathBuf {
    state_root(project).join(STATUS_FILE)
}

pub fn stop_dir(project: &Path) -> PathBuf {
    state_root(project).join(STOP_DIR)
}

pub fn stop_all_path(project: &Path) -> PathBuf {
    state_root(project).join(STOP_ALL_MARKER)
}

pub fn logs_dir(project: &Path) -> PathBuf {
    state_root(project).join(LOGS_DIR)
}

pub fn run_log_path(project: &Path) -> PathBuf {
    logs_dir(project).join(RUN_LOG)
}
