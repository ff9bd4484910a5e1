use tracing::debug;

use stepgraph_core::error::Result;
use stepgraph_core::graph::GraphDefinition;
use stepgraph_core::types::RunState;

use crate::condition::evaluate;

/// Pick the next node after `current` using the post-update `state`.
///
/// Conditioned edges are tried first, in declaration order, and the first one
/// whose condition holds wins. Only when none holds is the first unconditioned
/// edge taken. `Ok(None)` means the node has no applicable transition.
pub fn resolve(graph: &GraphDefinition, current: &str, state: &RunState) -> Result<Option<String>> {
    for edge in graph.outgoing_edges(current) {
        if let Some(condition) = &edge.condition {
            if evaluate(state, condition)? {
                debug!(from = %current, to = %edge.to_node, %condition, "Conditional edge taken");
                return Ok(Some(edge.to_node.clone()));
            }
        }
    }

    let fallback = graph
        .outgoing_edges(current)
        .find(|e| !e.is_conditional())
        .map(|e| e.to_node.clone());

    match &fallback {
        Some(next) => debug!(from = %current, to = %next, "Default edge taken"),
        None => debug!(from = %current, "No transition"),
    }
    Ok(fallback)
}
