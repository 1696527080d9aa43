//! Built-in task handlers, each bound to one project root.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use walkdir::WalkDir;
use troupe_core::{BoxError, Settings, Task, TaskHandler, TaskKind};

use crate::error::HandlerError;
use crate::writer::{append, atomic_write, read_optional, resolve, WriteResult};

pub const CODE_IMPLEMENTATION: &str = "code_implementation";
pub const DOCUMENTATION: &str = "documentation";
pub const CONTENT_CREATION: &str = "content_creation";
pub const BUG_FIXING: &str = "bug_fixing";
pub const DATA_ANALYSIS: &str = "data_analysis";
pub const TESTING: &str = "testing";
pub const OPTIMIZATION: &str = "optimization";

/// Every built-in handler, keyed by the task type it serves.
pub fn builtin(root: &Path, settings: &Settings) -> Vec<(TaskKind, Arc<dyn TaskHandler>)> {
    let root = root.to_path_buf();
    let work = &settings.simulated_work;
    vec![
        entry(CODE_IMPLEMENTATION, CodeImplementation::new(root.clone())),
        entry(DOCUMENTATION, Documentation::new(root.clone())),
        entry(
            CONTENT_CREATION,
            ContentCreation::new(root.clone(), settings.collections.clone()),
        ),
        entry(BUG_FIXING, BugFixing::new(root.clone())),
        entry(DATA_ANALYSIS, DataAnalysis::new(root)),
        entry(
            TESTING,
            SimulatedWork::testing(Duration::from_millis(work.testing_ms)),
        ),
        entry(
            OPTIMIZATION,
            SimulatedWork::optimization(Duration::from_millis(work.optimization_ms)),
        ),
    ]
}

fn entry<H>(kind: &str, handler: H) -> (TaskKind, Arc<dyn TaskHandler>)
where
    H: TaskHandler + 'static,
{
    (TaskKind::from(kind), Arc::new(handler))
}

fn required<'t>(task: &'t Task, field: &'static str) -> Result<&'t str, HandlerError> {
    task.str_field(field)
        .ok_or(HandlerError::MissingField { field })
}

// ---------------------------------------------------------------------------
// code_implementation
// ---------------------------------------------------------------------------

/// Writes `code_content` to `file_path`.
#[derive(Debug, Clone)]
pub struct CodeImplementation {
    root: PathBuf,
}

impl CodeImplementation {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn run(&self, task: &Task) -> Result<WriteResult, HandlerError> {
        let path = resolve(&self.root, required(task, "file_path")?)?;
        let content = required(task, "code_content")?;
        let result = atomic_write(&path, content)?;
        let written = matches!(result, WriteResult::Written { .. });
        tracing::info!(path = %path.display(), written, "code implemented");
        Ok(result)
    }
}

impl TaskHandler for CodeImplementation {
    fn handle(&self, task: &Task) -> Result<(), BoxError> {
        self.run(task)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// documentation
// ---------------------------------------------------------------------------

/// Appends `content` under a timestamped heading to `doc_path`.
#[derive(Debug, Clone)]
pub struct Documentation {
    root: PathBuf,
}

impl Documentation {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn run(&self, task: &Task) -> Result<WriteResult, HandlerError> {
        let path = resolve(&self.root, required(task, "doc_path")?)?;
        let content = required(task, "content")?;
        let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let result = append(&path, &format!("\n\n## {stamp}\n{content}"))?;
        tracing::info!(path = %path.display(), "documentation updated");
        Ok(result)
    }
}

impl TaskHandler for Documentation {
    fn handle(&self, task: &Task) -> Result<(), BoxError> {
        self.run(task)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// content_creation
// ---------------------------------------------------------------------------

/// Appends `content_data[content_type]` entries to a JSON array collection.
#[derive(Debug, Clone)]
pub struct ContentCreation {
    root: PathBuf,
    collections: BTreeMap<String, PathBuf>,
}

impl ContentCreation {
    pub fn new(root: PathBuf, collections: BTreeMap<String, PathBuf>) -> Self {
        Self { root, collections }
    }

    /// Returns how many entries were added.
    pub fn run(&self, task: &Task) -> Result<usize, HandlerError> {
        let content_type = required(task, "content_type")?;
        let relative = self.collections.get(content_type).ok_or_else(|| {
            HandlerError::UnknownCollection {
                content_type: content_type.to_string(),
            }
        })?;
        let path = resolve(&self.root, &relative.to_string_lossy())?;

        let data = task
            .field("content_data")
            .ok_or(HandlerError::MissingField {
                field: "content_data",
            })?
            .as_object()
            .ok_or_else(|| HandlerError::InvalidField {
                field: "content_data",
                reason: "must be a mapping".into(),
            })?;
        let entries = match data.get(content_type) {
            None => Vec::new(),
            Some(Value::Array(entries)) => entries.clone(),
            Some(_) => {
                return Err(HandlerError::InvalidField {
                    field: "content_data",
                    reason: format!("key '{content_type}' must be a list"),
                })
            }
        };

        let mut collection = load_collection(&path)?;
        let added = entries.len();
        collection.extend(entries);

        let mut rendered =
            serde_json::to_string_pretty(&collection).map_err(|source| HandlerError::Json {
                path: path.clone(),
                source,
            })?;
        rendered.push('\n');
        atomic_write(&path, &rendered)?;

        tracing::info!(content_type, added, path = %path.display(), "content created");
        Ok(added)
    }
}

impl TaskHandler for ContentCreation {
    fn handle(&self, task: &Task) -> Result<(), BoxError> {
        self.run(task)?;
        Ok(())
    }
}

fn load_collection(path: &Path) -> Result<Vec<Value>, HandlerError> {
    let Some(text) = read_optional(path)? else {
        return Ok(Vec::new());
    };
    let value: Value = serde_json::from_str(&text).map_err(|source| HandlerError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Array(entries) => Ok(entries),
        _ => Err(HandlerError::NotAnArray {
            path: path.to_path_buf(),
        }),
    }
}

// ---------------------------------------------------------------------------
// bug_fixing
// ---------------------------------------------------------------------------

/// Replaces an existing file with `fix_code` unless it already contains it.
#[derive(Debug, Clone)]
pub struct BugFixing {
    root: PathBuf,
}

impl BugFixing {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn run(&self, task: &Task) -> Result<WriteResult, HandlerError> {
        let path = resolve(&self.root, required(task, "file_path")?)?;
        let fix = required(task, "fix_code")?;
        let current = read_optional(&path)?.ok_or_else(|| HandlerError::NotFound {
            path: path.clone(),
        })?;

        if current.contains(fix) {
            tracing::info!(path = %path.display(), "fix already present");
            return Ok(WriteResult::Unchanged { path });
        }

        let result = atomic_write(&path, fix)?;
        tracing::info!(path = %path.display(), "fix applied");
        Ok(result)
    }
}

impl TaskHandler for BugFixing {
    fn handle(&self, task: &Task) -> Result<(), BoxError> {
        self.run(task)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// data_analysis
// ---------------------------------------------------------------------------

/// Collections with fewer entries than this are reported as thin.
const MIN_COLLECTION_ITEMS: usize = 10;
const RECOMMENDED_COLLECTION_ITEMS: usize = 20;
/// Serialized size above which a file is worth splitting.
const SPLIT_THRESHOLD_BYTES: usize = 10_000;

/// Result of a `data_analysis` task, written as JSON to `output_path`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataReport {
    pub files_analyzed: usize,
    pub total_items: usize,
    pub optimization_opportunities: Vec<OversizedFile>,
    pub missing_content: Vec<ThinCollection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OversizedFile {
    pub file: String,
    pub size: usize,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThinCollection {
    pub file: String,
    pub current_count: usize,
    pub recommended_count: usize,
}

/// Surveys the `.json` files under `data_path` (default `data`).
///
/// The report goes to `output_path`, defaulting to
/// `analysis_<data_path with '/' as '_'>.json` in the project root. A
/// missing data directory yields an empty report.
#[derive(Debug, Clone)]
pub struct DataAnalysis {
    root: PathBuf,
}

impl DataAnalysis {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn run(&self, task: &Task) -> Result<DataReport, HandlerError> {
        let data_path = task.str_field("data_path").unwrap_or("data");
        let data_dir = resolve(&self.root, data_path)?;
        let output = match task.str_field("output_path") {
            Some(output) => resolve(&self.root, output)?,
            None => self.root.join(default_report_name(data_path)),
        };

        let report = analyze(&data_dir)?;
        let mut rendered =
            serde_json::to_string_pretty(&report).map_err(|source| HandlerError::Json {
                path: output.clone(),
                source,
            })?;
        rendered.push('\n');
        atomic_write(&output, &rendered)?;

        tracing::info!(
            files = report.files_analyzed,
            items = report.total_items,
            report = %output.display(),
            "data analysed"
        );
        Ok(report)
    }
}

impl TaskHandler for DataAnalysis {
    fn handle(&self, task: &Task) -> Result<(), BoxError> {
        self.run(task)?;
        Ok(())
    }
}

fn default_report_name(data_path: &str) -> String {
    let stem: String = data_path
        .trim_matches('/')
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!("analysis_{stem}.json")
}

fn analyze(data_dir: &Path) -> Result<DataReport, HandlerError> {
    let mut report = DataReport::default();
    if !data_dir.is_dir() {
        return Ok(report);
    }

    for entry in WalkDir::new(data_dir).sort_by_file_name() {
        let entry = entry.map_err(|source| HandlerError::Walk {
            path: data_dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        if !entry.file_type().is_file() || !is_json {
            continue;
        }

        let text = read_optional(path)?.unwrap_or_default();
        let value: Value = serde_json::from_str(&text).map_err(|source| HandlerError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let file = path
            .strip_prefix(data_dir)
            .unwrap_or(path)
            .display()
            .to_string();
        report.files_analyzed += 1;

        if let Value::Array(entries) = &value {
            report.total_items += entries.len();
            if entries.len() < MIN_COLLECTION_ITEMS {
                report.missing_content.push(ThinCollection {
                    file: file.clone(),
                    current_count: entries.len(),
                    recommended_count: RECOMMENDED_COLLECTION_ITEMS,
                });
            }
        }

        let size = value.to_string().len();
        if size > SPLIT_THRESHOLD_BYTES {
            report.optimization_opportunities.push(OversizedFile {
                file,
                size,
                recommendation: "Consider splitting into smaller files".to_string(),
            });
        }
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// testing / optimization
// ---------------------------------------------------------------------------

/// Stand-in for work that happens outside this process: logs the target
/// and sleeps for a configured delay.
#[derive(Debug, Clone)]
pub struct SimulatedWork {
    activity: &'static str,
    target_field: &'static str,
    delay: Duration,
}

impl SimulatedWork {
    pub fn testing(delay: Duration) -> Self {
        Self {
            activity: "running tests",
            target_field: "test_target",
            delay,
        }
    }

    pub fn optimization(delay: Duration) -> Self {
        Self {
            activity: "optimizing",
            target_field: "target_system",
            delay,
        }
    }
}

impl TaskHandler for SimulatedWork {
    fn handle(&self, task: &Task) -> Result<(), BoxError> {
        let subject = task.str_field(self.target_field).unwrap_or("all");
        match task.str_field("optimization_type") {
            Some(strategy) => tracing::info!(subject, strategy, "{}", self.activity),
            None => tracing::info!(subject, "{}", self.activity),
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
