//! Fixtures shared by the integration tests.

use std::io::Write;
use std::sync::Arc;

use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::sync::broadcast::Receiver;

use stepgraph_core::error::{Result, StepgraphError};
use stepgraph_core::event::RunEvent;
use stepgraph_core::graph::{Edge, GraphDefinition, Node};
use stepgraph_core::traits::NodeFunction;
use stepgraph_core::types::RunState;
use stepgraph_core::EngineConfig;
use stepgraph_engine::sample;
use stepgraph_engine::WorkflowEngine;

/// An engine with the code-review sample workflow registered.
pub fn code_review_engine() -> Arc<WorkflowEngine> {
    code_review_engine_with(EngineConfig::default())
}

pub fn code_review_engine_with(config: EngineConfig) -> Arc<WorkflowEngine> {
    let engine = WorkflowEngine::new(config);
    sample::register_code_review(&engine).expect("register sample workflow");
    Arc::new(engine)
}

/// Node function that always returns `{key: value}`.
pub fn constant(key: &'static str, value: impl Into<Value>) -> impl NodeFunction {
    let value = value.into();
    move |_: &RunState| -> Result<RunState> { Ok(RunState::new().with(key, value.clone())) }
}

/// Node function that increments integer `key` (missing counts as 0).
pub fn counter(key: &'static str) -> impl NodeFunction {
    move |state: &RunState| -> Result<RunState> {
        let n = state.get_i64(key).unwrap_or(0);
        Ok(RunState::new().with(key, n + 1))
    }
}

/// Node function that always fails with `message`.
pub fn failing(name: &'static str, message: &'static str) -> impl NodeFunction {
    move |_: &RunState| -> Result<RunState> { Err(StepgraphError::node_function(name, message)) }
}

/// `ids[0] -> ids[1] -> ...`, every node bound to `function_name`.
pub fn linear_graph(id: &str, ids: &[&str], function_name: &str) -> GraphDefinition {
    let start = ids.first().copied().unwrap_or_default();
    let mut graph = GraphDefinition::new(id, start);
    for node in ids {
        graph = graph.with_node(Node::new(*node, function_name));
    }
    for pair in ids.windows(2) {
        graph = graph.with_edge(Edge::always(pair[0], pair[1]));
    }
    graph
}

/// One node that unconditionally transitions to itself.
pub fn self_loop_graph(id: &str, function_name: &str) -> GraphDefinition {
    GraphDefinition::new(id, "spin")
        .with_node(Node::new("spin", function_name))
        .with_edge(Edge::always("spin", "spin"))
}

/// Write `contents` to a temporary TOML file.
pub fn write_config(contents: &str) -> NamedTempFile {
    let mut tmp = NamedTempFile::new().expect("create temp file");
    tmp.write_all(contents.as_bytes()).expect("write toml");
    tmp
}

/// Drain every event currently buffered in `rx`.
pub fn drain_events(rx: &mut Receiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
