//! Troupe core library: domain types, the handler capability, manifest loading.
//!
//! - [`types`]: newtypes, [`Task`], [`TaskList`], [`StatusSnapshot`]
//! - [`handler`]: the [`TaskHandler`] capability handlers implement
//! - [`manifest`]: load / save / validate `troupe.yaml`
//! - [`error`]: [`ManifestError`]

pub mod error;
pub mod handler;
pub mod manifest;
pub mod types;

pub use error::ManifestError;
pub use handler::{BoxError, TaskHandler};
pub use manifest::{AgentManifest, Manifest, Settings, SimulatedWork, MANIFEST_FILE};
pub use types::{progress_percent, AgentId, AgentState, StatusSnapshot, Task, TaskKind, TaskList};
