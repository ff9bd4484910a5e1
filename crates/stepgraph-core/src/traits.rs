use crate::error::Result;
use crate::types::RunState;

/// Unit of work bound to a graph node.
///
/// Receives the run's current state and returns a partial update that the
/// engine merges back. Returning `Err` fails the run.
pub trait NodeFunction: Send + Sync + 'static {
    fn call(&self, state: &RunState) -> Result<RunState>;
}

impl<F> NodeFunction for F
where
    F: Fn(&RunState) -> Result<RunState> + Send + Sync + 'static,
{
    fn call(&self, state: &RunState) -> Result<RunState> {
        self(state)
    }
}
