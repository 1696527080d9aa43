//! Type-based task dispatch.
//!
//! A [`Dispatcher`] maps a task's `type` to a shared [`TaskHandler`]. A
//! missing handler, a handler error and a handler panic all come back as a
//! [`DispatchFailure`] value; nothing escapes to the agent loop.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use troupe_core::{BoxError, Task, TaskHandler, TaskKind};

use crate::error::DispatchFailure;

#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
    slow_task_warn: Option<Duration>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Dispatcher::register`].
    pub fn with_handler<H>(mut self, kind: impl Into<TaskKind>, handler: H) -> Self
    where
        H: TaskHandler + 'static,
    {
        self.register(kind, Arc::new(handler));
        self
    }

    /// Log a warning for any dispatch that runs longer than `threshold`.
    /// The handler is never interrupted.
    pub fn with_slow_task_warning(mut self, threshold: Duration) -> Self {
        self.slow_task_warn = Some(threshold);
        self
    }

    /// Bind `kind` to `handler`, returning the handler it replaced.
    pub fn register(
        &mut self,
        kind: impl Into<TaskKind>,
        handler: Arc<dyn TaskHandler>,
    ) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.insert(kind.into(), handler)
    }

    pub fn extend<I>(&mut self, handlers: I)
    where
        I: IntoIterator<Item = (TaskKind, Arc<dyn TaskHandler>)>,
    {
        self.handlers.extend(handlers);
    }

    pub fn handles(&self, kind: &TaskKind) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered task types, sorted.
    pub fn kinds(&self) -> Vec<&TaskKind> {
        let mut kinds: Vec<_> = self.handlers.keys().collect();
        kinds.sort();
        kinds
    }

    pub fn dispatch(&self, task: &Task) -> Result<(), DispatchFailure> {
        let kind = task.kind();
        let Some(handler) = self.handlers.get(kind) else {
            return Err(DispatchFailure::UnknownTaskType { kind: kind.clone() });
        };

        let started = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(task)));
        let elapsed = started.elapsed();

        if let Some(threshold) = self.slow_task_warn {
            if elapsed > threshold {
                tracing::warn!(
                    task = task.title(),
                    kind = %kind,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "slow task",
                );
            }
        }

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(DispatchFailure::Handler {
                kind: kind.clone(),
                message: error_chain(err),
            }),
            Err(payload) => Err(DispatchFailure::Panicked {
                kind: kind.clone(),
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("kinds", &self.kinds())
            .field("slow_task_warn", &self.slow_task_warn)
            .finish()
    }
}

/// `outer: cause: root cause`
fn error_chain(err: BoxError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
