//! Workflow execution engine.
//!
//! A workflow is a graph of named nodes, each bound to a registered
//! [`NodeFunction`](stepgraph_core::NodeFunction), connected by edges that may
//! be guarded by a [`Condition`](stepgraph_core::Condition) over the run's
//! accumulated state.
//!
//! The [`WorkflowEngine`] drives a run from its start node: it executes the
//! node's function, merges the returned update into the state, resolves the
//! next node from the outgoing edges, and repeats until there is no
//! transition, the `End` sentinel is reached, or the step limit is hit.

pub mod condition;
pub mod dispatch;
pub mod engine;
pub mod registry;
pub mod sample;
pub mod store;
pub mod transition;
pub mod validation;

pub use condition::evaluate;
pub use dispatch::RunDispatcher;
pub use engine::WorkflowEngine;
pub use registry::{FunctionRegistry, GraphRegistry};
pub use store::RunStore;
pub use transition::resolve;
pub use validation::{unbound_functions, validate_graph, GraphIssue};
