//! # troupe-handlers
//!
//! Built-in task handlers and the hash-gated atomic writer they share.
//!
//! Call [`builtin`] to get every handler bound to a project root, ready to
//! be registered with a dispatcher.

pub mod error;
pub mod handlers;
pub mod writer;

pub use error::HandlerError;
pub use handlers::{
    builtin, BugFixing, CodeImplementation, ContentCreation, DataAnalysis, DataReport,
    Documentation, SimulatedWork,
};
pub use writer::{atomic_write, WriteResult};
