//! The code-review sample workflow.
//!
//! `Extract -> Analyze -> CheckStyle`, then `CheckStyle` loops through
//! `AutoFix` while `quality_score < 80` and otherwise ends. The first style
//! check scores 65; every check after a fix adds 20.

use serde_json::json;
use tracing::info;

use stepgraph_core::error::Result;
use stepgraph_core::graph::{Condition, Edge, GraphDefinition, Node, END_NODE};
use stepgraph_core::types::RunState;

use crate::engine::WorkflowEngine;

pub const CODE_REVIEW_GRAPH_ID: &str = "code_review_v1";

/// Passing threshold for `quality_score`.
pub const QUALITY_THRESHOLD: i64 = 80;

const INITIAL_SCORE: i64 = 65;
const FIX_BONUS: i64 = 20;

pub fn extract_code(_state: &RunState) -> Result<RunState> {
    info!("Extracting code");
    Ok(RunState::new()
        .with("code", "def foo():\n    print('hello')\n    pass")
        .with("lines", 3))
}

pub fn analyze_complexity(_state: &RunState) -> Result<RunState> {
    info!("Analyzing complexity");
    Ok(RunState::new().with("complexity", 5))
}

pub fn check_style(state: &RunState) -> Result<RunState> {
    let current = state.get_i64("quality_score").unwrap_or(0);
    let score = if state.get_i64("fix_attempts").unwrap_or(0) > 0 {
        (current + FIX_BONUS).min(100)
    } else {
        INITIAL_SCORE
    };
    info!(score, "Checked style");
    Ok(RunState::new().with("quality_score", score))
}

pub fn auto_fix(state: &RunState) -> Result<RunState> {
    let attempts = state.get_i64("fix_attempts").unwrap_or(0) + 1;
    info!(attempts, "Auto-fixing code");
    Ok(RunState::new()
        .with("fix_attempts", attempts)
        .with("status", "fixing"))
}

/// The code-review graph definition.
pub fn code_review_graph() -> GraphDefinition {
    GraphDefinition::new(CODE_REVIEW_GRAPH_ID, "Extract")
        .with_node(Node::new("Extract", "extract_code"))
        .with_node(Node::new("Analyze", "analyze_complexity"))
        .with_node(Node::new("CheckStyle", "check_style"))
        .with_node(Node::new("AutoFix", "auto_fix"))
        .with_edge(Edge::always("Extract", "Analyze"))
        .with_edge(Edge::always("Analyze", "CheckStyle"))
        .with_edge(Edge::when(
            "CheckStyle",
            "AutoFix",
            Condition::new("quality_score", "<", json!(QUALITY_THRESHOLD)),
        ))
        .with_edge(Edge::always("CheckStyle", END_NODE))
        .with_edge(Edge::always("AutoFix", "CheckStyle"))
}

/// Register the sample functions and only the functions.
pub fn register_code_review_functions(engine: &WorkflowEngine) {
    engine.register_function("extract_code", extract_code);
    engine.register_function("analyze_complexity", analyze_complexity);
    engine.register_function("check_style", check_style);
    engine.register_function("auto_fix", auto_fix);
}

/// Register the sample functions and the code-review graph.
pub fn register_code_review(engine: &WorkflowEngine) -> Result<()> {
    register_code_review_functions(engine);
    engine.register_graph(code_review_graph())
}
