//! Troupe runtime: agents, dispatch, the coordinator and run supervision.

pub mod agent;
pub mod cancel;
pub mod coordinator;
pub mod dispatch;
mod error;
pub mod log_rotation;
pub mod markers;
pub mod paths;
pub mod status;
pub mod supervisor;

pub use agent::{Agent, AgentHandle, FailedTask};
pub use cancel::CancellationSignal;
pub use coordinator::Coordinator;
pub use dispatch::Dispatcher;
pub use error::{CoordinatorError, DispatchFailure, SupervisorError};
pub use markers::StopRequest;
pub use status::{read_report, write_report, StatusReport, Totals};
pub use supervisor::{Observer, Supervisor};
