//! Run manifest: project root, settings and per-agent task lists.
//!
//! # Layout
//!
//! ```text
//! <project>/
//!   troupe.yaml        (manifest, mode 0600 when written by `troupe init`)
//! ```
//!
//! `.json` manifests are parsed with serde_json, everything else as YAML.
//! `project_path` is resolved relative to the directory holding the manifest.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{io_err, ManifestError};
use crate::types::{AgentId, Task, TaskList};

/// Default manifest file name looked up in the working directory.
pub const MANIFEST_FILE: &str = "troupe.yaml";

pub const MANIFEST_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// 1. Types
// ---------------------------------------------------------------------------

/// Root of a troupe manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_project_path")]
    pub project_path: PathBuf,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub agents: Vec<AgentManifest>,
}

/// One agent entry: an id plus its ordered task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentManifest {
    pub id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_hours: Option<f64>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl AgentManifest {
    pub fn task_list(&self) -> TaskList {
        TaskList::new(self.tasks.clone())
    }
}

/// Tunables shared by the runtime and the built-in handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Seconds between status reports while agents run.
    pub status_interval_secs: u64,
    /// Warn when a single task runs longer than this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow_task_warn_secs: Option<u64>,
    pub simulated_work: SimulatedWork,
    /// `content_type` → JSON array file, relative to the project root.
    pub collections: BTreeMap<String, PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        let collections = [
            ("items", "data/items/items_expanded.json"),
            ("quests", "data/quests/quests.json"),
            ("characters", "data/dialogue/characters.json"),
        ]
        .into_iter()
        .map(|(name, path)| (name.to_string(), PathBuf::from(path)))
        .collect();

        Self {
            status_interval_secs: 2,
            slow_task_warn_secs: None,
            simulated_work: SimulatedWork::default(),
            collections,
        }
    }
}

/// Delays for task types whose work is only simulated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedWork {
    pub testing_ms: u64,
    pub optimization_ms: u64,
}

impl Default for SimulatedWork {
    fn default() -> Self {
        Self {
            testing_ms: 2000,
            optimization_ms: 1000,
        }
    }
}

fn default_version() -> u32 {
    MANIFEST_VERSION
}

fn default_project_path() -> PathBuf {
    PathBuf::from(".")
}

// ---------------------------------------------------------------------------
// 2. Load / validate
// ---------------------------------------------------------------------------

impl Manifest {
    /// Load and validate a manifest.
    ///
    /// Returns `ManifestError::NotFound` if absent, `Parse`/`Json` (with path
    /// context) if malformed, `Invalid` if validation fails.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        if !path.exists() {
            return Err(ManifestError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let manifest = Self::parse(path, &contents)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn parse(path: &Path, contents: &str) -> Result<Self, ManifestError> {
        if is_json(path) {
            serde_json::from_str(contents).map_err(|source| ManifestError::Json {
                path: path.to_path_buf(),
                source,
            })
        } else {
            serde_yaml::from_str(contents).map_err(|source| ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    /// Reject empty or duplicate agent ids and untyped tasks.
    pub fn validate(&self) -> Result<(), ManifestError> {
        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.id.0.trim().is_empty() {
                return Err(ManifestError::Invalid("agent id must not be empty".into()));
            }
            if !seen.insert(&agent.id) {
                return Err(ManifestError::Invalid(format!(
                    "duplicate agent id '{}'",
                    agent.id
                )));
            }
            if let Some(pos) = agent
                .tasks
                .iter()
                .position(|t| t.kind().as_str().trim().is_empty())
            {
                return Err(ManifestError::Invalid(format!(
                    "task #{} of agent '{}' has an empty type",
                    pos + 1,
                    agent.id
                )));
            }
        }
        Ok(())
    }

    /// Project root, resolved against the manifest's own directory.
    pub fn project_root(&self, manifest_path: &Path) -> PathBuf {
        if self.project_path.is_absolute() {
            return self.project_path.clone();
        }
        let base = manifest_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        base.join(&self.project_path)
    }

    pub fn agent(&self, id: &AgentId) -> Option<&AgentManifest> {
        self.agents.iter().find(|a| &a.id == id)
    }

    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.iter().map(|a| a.id.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

impl Manifest {
    /// Atomically write the manifest to `path`.
    ///
    /// Write flow: serialize → `.tmp` sibling → `chmod 0600` → `rename`.
    /// Fails with `AlreadyExists` unless `overwrite` is set.
    pub fn save(&self, path: &Path, overwrite: bool) -> Result<(), ManifestError> {
        if path.exists() && !overwrite {
            return Err(ManifestError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }

        let contents = if is_json(path) {
            serde_json::to_string_pretty(self).map_err(|source| ManifestError::Json {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            serde_yaml::to_string(self)?
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| MANIFEST_FILE.to_string());
        let tmp_path = path.with_file_name(format!("{file_name}.tmp"));
        std::fs::write(&tmp_path, contents).map_err(|e| io_err(&tmp_path, e))?;
        set_file_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 4. Demo manifest (written by `troupe init`)
// ---------------------------------------------------------------------------

impl Manifest {
    /// Two small agents touching files, a doc log and the items collection.
    pub fn demo() -> Self {
        let writer = AgentManifest {
            id: AgentId::from("demo_agent_1"),
            description: Some("Creates a file and records it in the demo log".into()),
            estimated_duration_hours: Some(0.1),
            tasks: vec![
                Task::new("code_implementation", "Create Demo File 1")
                    .with_field("file_path", "demo/demo_file_1.txt")
                    .with_field("code_content", "This is demo file 1 created by agent 1\n"),
                Task::new("documentation", "Update Demo Log")
                    .with_field("doc_path", "demo/demo_log.md")
                    .with_field("content", "Agent 1 completed demo file creation"),
            ],
        };
        let content = AgentManifest {
            id: AgentId::from("demo_agent_2"),
            description: Some("Creates a file, adds an item and runs the tests".into()),
            estimated_duration_hours: Some(0.1),
            tasks: vec![
                Task::new("code_implementation", "Create Demo File 2")
                    .with_field("file_path", "demo/demo_file_2.txt")
                    .with_field("code_content", "This is demo file 2 created by agent 2\n"),
                Task::new("content_creation", "Create Demo Content")
                    .with_field("content_type", "items")
                    .with_field(
                        "content_data",
                        json!({
                            "items": [
                                {
                                    "id": "demo_sword",
                                    "name": "Demo Sword",
                                    "type": "weapon",
                                    "damage": 10
                                }
                            ]
                        }),
                    ),
                Task::new("testing", "Test Demo Content").with_field("test_target", "items"),
            ],
        };

        Self {
            version: MANIFEST_VERSION,
            project_path: default_project_path(),
            settings: Settings::default(),
            agents: vec![writer, content],
        }
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ManifestError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ManifestError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_fill_missing_settings() {
        let manifest: Manifest = serde_yaml::from_str("agents: []\n").expect("parse");
        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert_eq!(manifest.project_path, PathBuf::from("."));
        assert_eq!(manifest.settings.status_interval_secs, 2);
        assert_eq!(manifest.settings.simulated_work.testing_ms, 2000);
        assert!(manifest.settings.collections.contains_key("quests"));
    }

    #[test]
    fn partial_settings_keep_other_defaults() {
        let yaml = "settings:\n  simulated_work:\n    testing_ms: 0\n";
        let manifest: Manifest = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(manifest.settings.simulated_work.testing_ms, 0);
        assert_eq!(manifest.settings.simulated_work.optimization_ms, 1000);
        assert_eq!(manifest.settings.status_interval_secs, 2);
    }

    #[test]
    fn project_root_is_relative_to_manifest_dir() {
        let mut manifest = Manifest::demo();
        manifest.project_path = PathBuf::from("game");
        let root = manifest.project_root(Path::new("/work/troupe.yaml"));
        assert_eq!(root, PathBuf::from("/work/game"));

        let bare = manifest.project_root(Path::new("troupe.yaml"));
        assert_eq!(bare, PathBuf::from("./game"));

        manifest.project_path = PathBuf::from("/abs/game");
        assert_eq!(
            manifest.project_root(Path::new("/work/troupe.yaml")),
            PathBuf::from("/abs/game")
        );
    }

    #[test]
    fn duplicate_agent_ids_are_invalid() {
        let mut manifest = Manifest::demo();
        let dup = manifest.agents[0].clone();
        manifest.agents.push(dup);
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate agent id 'demo_agent_1'"));
    }

    #[test]
    fn demo_manifest_is_valid() {
        let manifest = Manifest::demo();
        manifest.validate().expect("demo must validate");
        assert_eq!(manifest.agents.len(), 2);
        assert_eq!(manifest.agents[1].task_list().len(), 3);
    }

    #[test]
    fn save_refuses_to_overwrite() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(MANIFEST_FILE);
        Manifest::demo().save(&path, false).expect("first save");
        let err = Manifest::demo().save(&path, false).unwrap_err();
        assert!(matches!(err, ManifestError::AlreadyExists { .. }));
        Manifest::demo().save(&path, true).expect("overwrite");
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(MANIFEST_FILE);
        Manifest::demo().save(&path, false).expect("save");
        assert!(!dir.path().join("troupe.yaml.tmp").exists());
    }

    #[test]
    fn load_missing_manifest_returns_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let err = Manifest::load(&dir.path().join(MANIFEST_FILE)).unwrap_err();
        assert!(matches!(err, ManifestError::NotFound { .. }));
    }
}
