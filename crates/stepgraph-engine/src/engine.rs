use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error, info, warn};

use stepgraph_core::config::EngineConfig;
use stepgraph_core::error::{Result, StepgraphError};
use stepgraph_core::event::{EventBus, RunEvent};
use stepgraph_core::graph::{GraphDefinition, END_NODE};
use stepgraph_core::traits::NodeFunction;
use stepgraph_core::types::{RunId, RunState, RunStatus, WorkflowRun};

use crate::registry::{FunctionRegistry, GraphRegistry};
use crate::store::RunStore;
use crate::transition;
use crate::validation::{describe_issues, validate_graph};

/// Executes workflow graphs.
///
/// One engine owns its graph registry, function registry, and run store.
/// Registration is expected to happen during setup; after that the engine is
/// shared (usually behind an `Arc`) and drivers for different runs may execute
/// concurrently. Driving the same run from two threads at once is not supported.
pub struct WorkflowEngine {
    config: EngineConfig,
    graphs: RwLock<GraphRegistry>,
    functions: RwLock<FunctionRegistry>,
    runs: RunStore,
    events: Option<Arc<EventBus>>,
}

impl WorkflowEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            graphs: RwLock::new(GraphRegistry::new()),
            functions: RwLock::new(FunctionRegistry::new()),
            runs: RunStore::new(),
            events: None,
        }
    }

    /// Publish run lifecycle events to `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Register (or replace) a graph definition.
    ///
    /// References to nodes and functions are not checked unless
    /// `strict_registration` is enabled; dangling references otherwise surface
    /// as run failures.
    pub fn register_graph(&self, graph: GraphDefinition) -> Result<()> {
        if self.config.strict_registration {
            let issues = validate_graph(&graph);
            if !issues.is_empty() {
                return Err(StepgraphError::InvalidGraph(format!(
                    "{}: {}",
                    graph.id,
                    describe_issues(&issues)
                )));
            }
        }

        let id = graph.id.clone();
        self.graphs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(graph);
        info!(graph_id = %id, "Registered graph");
        Ok(())
    }

    /// Register (or replace) a node function under `name`.
    pub fn register_function(&self, name: impl Into<String>, function: impl NodeFunction) {
        let name = name.into();
        self.functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(name.clone(), function);
        info!(function = %name, "Registered function");
    }

    /// Create a pending run of `graph_id` with `initial_state`.
    ///
    /// Fails without creating any record when the graph is unknown.
    pub fn create_run(&self, graph_id: &str, initial_state: RunState) -> Result<RunId> {
        if self.graph(graph_id).is_none() {
            return Err(StepgraphError::GraphNotFound(graph_id.to_string()));
        }

        let run_id = RunId::new();
        self.runs
            .insert(WorkflowRun::pending(run_id.clone(), graph_id, initial_state))?;

        info!(run_id = %run_id, graph_id, "Created run");
        self.publish(RunEvent::RunCreated {
            run_id: run_id.clone(),
            graph_id: graph_id.to_string(),
        });
        Ok(run_id)
    }

    /// Point-in-time snapshot of a run. Never blocks on a running driver.
    pub fn get_run(&self, run_id: &RunId) -> Option<WorkflowRun> {
        self.runs.get(run_id)
    }

    /// Drive a pending run from its start node to a terminal status.
    ///
    /// Run-fatal errors (see [`StepgraphError::is_run_fatal`]) finalize the
    /// run as `failed` and still return `Ok`. Anything else escapes as `Err`:
    /// an unknown run id, a run whose graph is no longer registered, or a
    /// broken run store. Driving a run that already left `pending` is a no-op.
    pub fn drive(&self, run_id: &RunId) -> Result<RunStatus> {
        let run = self
            .runs
            .get(run_id)
            .ok_or_else(|| StepgraphError::RunNotFound(run_id.to_string()))?;

        if run.status != RunStatus::Pending {
            warn!(run_id = %run_id, status = %run.status, "Run already driven, ignoring");
            return Ok(run.status);
        }

        // Not reachable through the public API: graphs are never removed.
        let graph = self
            .graph(&run.graph_id)
            .ok_or_else(|| StepgraphError::GraphNotFound(run.graph_id.clone()))?;

        let claimed = self.runs.update(run_id, |run| {
            if run.status == RunStatus::Pending {
                run.mark_running();
                true
            } else {
                false
            }
        })?;
        if !claimed {
            return Ok(self.runs.status(run_id).unwrap_or(RunStatus::Running));
        }
        self.publish(RunEvent::RunStarted {
            run_id: run_id.clone(),
        });

        match self.execute(run_id, &graph) {
            Ok(steps) => {
                self.runs.update(run_id, |run| run.mark_completed())?;
                info!(run_id = %run_id, steps, "Run completed");
                self.publish(RunEvent::RunCompleted {
                    run_id: run_id.clone(),
                    steps,
                });
                Ok(RunStatus::Completed)
            }
            Err(e) if e.is_run_fatal() => {
                let message = e.to_string();
                self.runs.update(run_id, |run| run.mark_failed(message.clone()))?;
                error!(run_id = %run_id, error = %message, "Run failed");
                self.publish(RunEvent::RunFailed {
                    run_id: run_id.clone(),
                    error: message,
                });
                Ok(RunStatus::Failed)
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Driver aborted, run left unfinished");
                Err(e)
            }
        }
    }

    /// The step loop. Returns the number of steps taken.
    fn execute(&self, run_id: &RunId, graph: &GraphDefinition) -> Result<usize> {
        let max_steps = self.config.max_steps;
        let mut current = non_empty(graph.start_node.clone());
        let mut steps = 0;

        while let Some(node_id) = current.clone() {
            if steps >= max_steps {
                return Err(StepgraphError::StepLimitExceeded(max_steps));
            }

            // Recorded before execution so a failing step still shows up.
            let state = self.runs.update(run_id, |run| {
                run.history.push(node_id.clone());
                run.state.clone()
            })?;
            info!(run_id = %run_id, step = steps + 1, node_id = %node_id, "Executing node");
            self.publish(RunEvent::NodeEntered {
                run_id: run_id.clone(),
                step: steps + 1,
                node_id: node_id.clone(),
            });

            let node = graph
                .find_node(&node_id)
                .ok_or_else(|| StepgraphError::NodeNotFound {
                    node: node_id.clone(),
                    graph: graph.id.clone(),
                })?;

            let function = self
                .function(&node.function_name)
                .ok_or_else(|| StepgraphError::FunctionNotRegistered(node.function_name.clone()))?;

            let update = invoke(&node.function_name, function.as_ref(), &state)?;
            debug!(run_id = %run_id, node_id = %node_id, keys = update.len(), "Merging state update");

            let state = self.runs.update(run_id, |run| {
                run.state.merge(update);
                run.state.clone()
            })?;

            current = match transition::resolve(graph, &node_id, &state)? {
                Some(next) if next == END_NODE => None,
                Some(next) => non_empty(next),
                None => None,
            };
            steps += 1;
        }

        Ok(steps)
    }

    pub fn graph(&self, id: &str) -> Option<Arc<GraphDefinition>> {
        self.graphs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
    }

    pub fn graph_ids(&self) -> Vec<String> {
        let graphs = self.graphs.read().unwrap_or_else(PoisonError::into_inner);
        graphs.list().into_iter().map(String::from).collect()
    }

    pub fn function_names(&self) -> Vec<String> {
        let functions = self.functions.read().unwrap_or_else(PoisonError::into_inner);
        functions.list().into_iter().map(String::from).collect()
    }

    pub fn run_ids(&self) -> Vec<RunId> {
        self.runs.ids()
    }

    fn function(&self, name: &str) -> Option<Arc<dyn NodeFunction>> {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
    }

    fn publish(&self, event: RunEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Call a node function, turning its errors and panics into run failures.
fn invoke(name: &str, function: &dyn NodeFunction, state: &RunState) -> Result<RunState> {
    match panic::catch_unwind(AssertUnwindSafe(|| function.call(state))) {
        Ok(Ok(update)) => Ok(update),
        Ok(Err(e @ StepgraphError::NodeFunction { .. })) => Err(e),
        Ok(Err(e)) => Err(StepgraphError::node_function(name, e.to_string())),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(StepgraphError::node_function(
                name,
                format!("panicked: {}", message),
            ))
        }
    }
}

fn non_empty(id: String) -> Option<String> {
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepgraph_core::graph::{Condition, Edge, Node};

    fn set(key: &'static str, value: i64) -> impl NodeFunction {
        move |_: &RunState| -> Result<RunState> { Ok(RunState::new().with(key, value)) }
    }

    fn increment(key: &'static str) -> impl NodeFunction {
        move |state: &RunState| -> Result<RunState> {
            let n = state.get_i64(key).unwrap_or(0);
            Ok(RunState::new().with(key, n + 1))
        }
    }

    fn linear_engine() -> WorkflowEngine {
        let engine = WorkflowEngine::default();
        engine.register_function("set_a", set("a", 1));
        engine.register_function("set_b", set("b", 2));
        engine
            .register_graph(
                GraphDefinition::new("linear", "A")
                    .with_node(Node::new("A", "set_a"))
                    .with_node(Node::new("B", "set_b"))
                    .with_edge(Edge::always("A", "B")),
            )
            .unwrap();
        engine
    }

    #[test]
    fn test_create_run_is_pending() {
        let engine = linear_engine();
        let id = engine
            .create_run("linear", RunState::new().with("input", "x"))
            .unwrap();
        let run = engine.get_run(&id).unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.history.is_empty());
        assert_eq!(run.state.get("input"), Some(&json!("x")));
    }

    #[test]
    fn test_create_run_unknown_graph_leaves_no_record() {
        let engine = linear_engine();
        let err = engine.create_run("nope", RunState::new()).unwrap_err();
        assert!(matches!(err, StepgraphError::GraphNotFound(_)));
        assert_eq!(err.to_string(), "Graph 'nope' not found.");
        assert!(engine.run_ids().is_empty());
    }

    #[test]
    fn test_linear_run_merges_updates() {
        let engine = linear_engine();
        assert_eq!(engine.function_names(), vec!["set_a", "set_b"]);
        let id = engine.create_run("linear", RunState::new()).unwrap();
        assert_eq!(engine.drive(&id).unwrap(), RunStatus::Completed);

        let run = engine.get_run(&id).unwrap();
        assert_eq!(run.history, vec!["A", "B"]);
        assert_eq!(run.state.get_i64("a"), Some(1));
        assert_eq!(run.state.get_i64("b"), Some(2));
        assert!(run.error.is_none());
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_single_node_without_edges_takes_one_step() {
        let engine = WorkflowEngine::default();
        engine.register_function("f", set("x", 1));
        engine
            .register_graph(GraphDefinition::new("solo", "only").with_node(Node::new("only", "f")))
            .unwrap();

        let id = engine.create_run("solo", RunState::new()).unwrap();
        assert_eq!(engine.drive(&id).unwrap(), RunStatus::Completed);
        assert_eq!(engine.get_run(&id).unwrap().history, vec!["only"]);
    }

    #[test]
    fn test_end_sentinel_needs_no_node() {
        let engine = WorkflowEngine::default();
        engine.register_function("f", set("x", 1));
        engine
            .register_graph(
                GraphDefinition::new("g", "a")
                    .with_node(Node::new("a", "f"))
                    .with_edge(Edge::always("a", END_NODE)),
            )
            .unwrap();

        let id = engine.create_run("g", RunState::new()).unwrap();
        assert_eq!(engine.drive(&id).unwrap(), RunStatus::Completed);
        assert_eq!(engine.get_run(&id).unwrap().history, vec!["a"]);
    }

    #[test]
    fn test_step_limit_fails_the_run() {
        let engine = WorkflowEngine::new(EngineConfig::default().with_max_steps(5));
        engine.register_function("inc", increment("n"));
        engine
            .register_graph(
                GraphDefinition::new("loop", "a")
                    .with_node(Node::new("a", "inc"))
                    .with_edge(Edge::always("a", "a")),
            )
            .unwrap();

        let id = engine.create_run("loop", RunState::new()).unwrap();
        assert_eq!(engine.drive(&id).unwrap(), RunStatus::Failed);

        let run = engine.get_run(&id).unwrap();
        assert_eq!(run.history.len(), 5);
        assert_eq!(run.state.get_i64("n"), Some(5));
        assert_eq!(
            run.error.as_deref(),
            Some("Max steps (5) exceeded. Possible infinite loop.")
        );
    }

    #[test]
    fn test_exactly_max_steps_completes() {
        let engine = WorkflowEngine::new(EngineConfig::default().with_max_steps(2));
        engine.register_function("f", set("x", 1));
        engine
            .register_graph(
                GraphDefinition::new("g", "a")
                    .with_node(Node::new("a", "f"))
                    .with_node(Node::new("b", "f"))
                    .with_edge(Edge::always("a", "b")),
            )
            .unwrap();
        let id = engine.create_run("g", RunState::new()).unwrap();
        assert_eq!(engine.drive(&id).unwrap(), RunStatus::Completed);
    }

    #[test]
    fn test_missing_function_fails_run() {
        let engine = WorkflowEngine::default();
        engine
            .register_graph(GraphDefinition::new("g", "a").with_node(Node::new("a", "ghost")))
            .unwrap();
        let id = engine.create_run("g", RunState::new()).unwrap();
        assert_eq!(engine.drive(&id).unwrap(), RunStatus::Failed);

        let run = engine.get_run(&id).unwrap();
        assert_eq!(run.history, vec!["a"]);
        assert_eq!(run.error.as_deref(), Some("Function ghost not registered."));
    }

    #[test]
    fn test_function_registered_after_graph_resolves_lazily() {
        let engine = WorkflowEngine::default();
        engine
            .register_graph(GraphDefinition::new("g", "a").with_node(Node::new("a", "late")))
            .unwrap();
        let id = engine.create_run("g", RunState::new()).unwrap();
        engine.register_function("late", set("x", 1));
        assert_eq!(engine.drive(&id).unwrap(), RunStatus::Completed);
    }

    #[test]
    fn test_missing_node_fails_run_and_keeps_prior_state() {
        let engine = WorkflowEngine::default();
        engine.register_function("f", set("x", 1));
        engine
            .register_graph(
                GraphDefinition::new("g", "a")
                    .with_node(Node::new("a", "f"))
                    .with_edge(Edge::always("a", "ghost")),
            )
            .unwrap();
        let id = engine.create_run("g", RunState::new()).unwrap();
        assert_eq!(engine.drive(&id).unwrap(), RunStatus::Failed);

        let run = engine.get_run(&id).unwrap();
        assert_eq!(run.history, vec!["a", "ghost"]);
        assert_eq!(run.state.get_i64("x"), Some(1));
        assert_eq!(
            run.error.as_deref(),
            Some("Node ghost definition missing in graph g")
        );
    }

    #[test]
    fn test_incomparable_condition_fails_run() {
        let engine = WorkflowEngine::default();
        engine.register_function("f", |_: &RunState| -> Result<RunState> {
            Ok(RunState::new().with("score", "high"))
        });
        engine
            .register_graph(
                GraphDefinition::new("g", "a")
                    .with_node(Node::new("a", "f"))
                    .with_edge(Edge::when("a", "a", Condition::new("score", "<", 80))),
            )
            .unwrap();
        let id = engine.create_run("g", RunState::new()).unwrap();
        assert_eq!(engine.drive(&id).unwrap(), RunStatus::Failed);
        let error = engine.get_run(&id).unwrap().error.unwrap();
        assert!(error.contains("score"), "{error}");
    }

    #[test]
    fn test_failing_and_panicking_functions() {
        let engine = WorkflowEngine::default();
        engine.register_function("fails", |_: &RunState| -> Result<RunState> {
            Err(StepgraphError::node_function("fails", "disk full"))
        });
        engine.register_function("panics", |_: &RunState| -> Result<RunState> {
            panic!("kaboom")
        });
        for (graph_id, function) in [("g1", "fails"), ("g2", "panics")] {
            engine
                .register_graph(
                    GraphDefinition::new(graph_id, "a").with_node(Node::new("a", function)),
                )
                .unwrap();
        }

        let id = engine.create_run("g1", RunState::new()).unwrap();
        assert_eq!(engine.drive(&id).unwrap(), RunStatus::Failed);
        assert_eq!(
            engine.get_run(&id).unwrap().error.as_deref(),
            Some("Function fails failed: disk full")
        );

        let id = engine.create_run("g2", RunState::new()).unwrap();
        assert_eq!(engine.drive(&id).unwrap(), RunStatus::Failed);
        assert_eq!(
            engine.get_run(&id).unwrap().error.as_deref(),
            Some("Function panics failed: panicked: kaboom")
        );
    }

    #[test]
    fn test_drive_is_noop_after_terminal() {
        let engine = linear_engine();
        let id = engine.create_run("linear", RunState::new()).unwrap();
        engine.drive(&id).unwrap();
        let first = engine.get_run(&id).unwrap();

        assert_eq!(engine.drive(&id).unwrap(), RunStatus::Completed);
        let second = engine.get_run(&id).unwrap();
        assert_eq!(second.history, first.history);
        assert_eq!(second.finished_at, first.finished_at);
    }

    #[test]
    fn test_drive_unknown_run_is_driver_error() {
        let engine = linear_engine();
        let err = engine.drive(&RunId::from_str("missing")).unwrap_err();
        assert!(matches!(err, StepgraphError::RunNotFound(_)));
        assert!(engine.get_run(&RunId::from_str("missing")).is_none());
    }

    #[test]
    fn test_graph_missing_at_drive_time_leaves_run_pending() {
        let engine = linear_engine();
        let id = engine.create_run("linear", RunState::new()).unwrap();
        *engine.graphs.write().unwrap() = GraphRegistry::new();

        let err = engine.drive(&id).unwrap_err();
        assert!(matches!(err, StepgraphError::GraphNotFound(ref g) if g == "linear"));
        let run = engine.get_run(&id).unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.history.is_empty());
        assert!(run.error.is_none());
    }

    #[test]
    fn test_store_failure_escapes_driver_instead_of_failing_run() {
        let engine = Arc::new(WorkflowEngine::default());
        let handle = Arc::downgrade(&engine);
        // Poisons every record lock while the step is in flight.
        engine.register_function("poison", move |_: &RunState| -> Result<RunState> {
            if let Some(engine) = handle.upgrade() {
                for id in engine.run_ids() {
                    let _ = panic::catch_unwind(AssertUnwindSafe(|| {
                        engine.runs.update::<()>(&id, |_| panic!("record lock poisoned"))
                    }));
                }
            }
            Ok(RunState::new().with("x", 1))
        });
        engine
            .register_graph(GraphDefinition::new("g", "a").with_node(Node::new("a", "poison")))
            .unwrap();

        let id = engine.create_run("g", RunState::new()).unwrap();
        let err = engine.drive(&id).unwrap_err();
        assert!(matches!(err, StepgraphError::Store(_)), "{err}");
        assert!(!err.is_run_fatal());

        // Snapshots still read through the poisoned lock.
        let run = engine.get_run(&id).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.error.is_none());
        assert!(run.state.get("x").is_none());
    }

    #[test]
    fn test_empty_start_node_completes_without_steps() {
        let engine = WorkflowEngine::default();
        engine.register_graph(GraphDefinition::new("g", "")).unwrap();
        let id = engine.create_run("g", RunState::new()).unwrap();
        assert_eq!(engine.drive(&id).unwrap(), RunStatus::Completed);
        assert!(engine.get_run(&id).unwrap().history.is_empty());
    }

    #[test]
    fn test_strict_registration_rejects_broken_graph() {
        let engine = WorkflowEngine::new(EngineConfig::default().with_strict_registration(true));
        let err = engine
            .register_graph(GraphDefinition::new("g", "missing"))
            .unwrap_err();
        assert!(matches!(err, StepgraphError::InvalidGraph(_)));
        assert!(engine.graph("g").is_none());

        // permissive engine accepts the same graph
        let engine = WorkflowEngine::default();
        engine.register_graph(GraphDefinition::new("g", "missing")).unwrap();
        assert_eq!(engine.graph_ids(), vec!["g"]);
    }

    #[test]
    fn test_events_published() {
        let bus = Arc::new(EventBus::new(32));
        let mut rx = bus.subscribe();
        let engine = linear_engine().with_event_bus(Arc::clone(&bus));

        let id = engine.create_run("linear", RunState::new()).unwrap();
        engine.drive(&id).unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.run_id(), &id);
            kinds.push(serde_json::to_value(&event).unwrap()["type"].clone());
        }
        assert_eq!(
            kinds,
            vec![
                json!("run_created"),
                json!("run_started"),
                json!("node_entered"),
                json!("node_entered"),
                json!("run_completed"),
            ]
        );
    }
}
