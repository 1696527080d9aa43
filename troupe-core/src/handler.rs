//! The handler capability a dispatcher resolves task types to.

use crate::types::Task;

/// Error type handlers report failures with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Performs the side effects of one task type.
///
/// `Ok(())` is success; any `Err` is a failure whose message (and source
/// chain) becomes the task's diagnostic. Handlers are shared between agent
/// threads, so they must be `Send + Sync`.
pub trait TaskHandler: Send + Sync {
    fn handle(&self, task: &Task) -> Result<(), BoxError>;
}

impl<F> TaskHandler for F
where
    F: Fn(&Task) -> Result<(), BoxError> + Send + Sync,
{
    fn handle(&self, task: &Task) -> Result<(), BoxError> {
        self(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_handlers() {
        let handler = |task: &Task| -> Result<(), BoxError> {
            if task.title() == "bad" {
                return Err("refused".into());
            }
            Ok(())
        };
        assert!(handler.handle(&Task::new("x", "good")).is_ok());
        let err = handler.handle(&Task::new("x", "bad")).unwrap_err();
        assert_eq!(err.to_string(), "refused");
    }
}
