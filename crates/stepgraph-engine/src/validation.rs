//! Structural checks for graph definitions.
//!
//! Registration is permissive by default; these checks run only under
//! `strict_registration` or from the `check` command. Function names are not
//! part of [`validate_graph`] because functions may be registered after the
//! graph; [`unbound_functions`] reports them against a known set instead.

use std::collections::HashSet;
use std::fmt;

use stepgraph_core::graph::{GraphDefinition, END_NODE};

/// A single structural problem found in a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphIssue {
    EmptyGraphId,
    DuplicateNode(String),
    MissingStartNode(String),
    UnknownEdgeSource { index: usize, node: String },
    UnknownEdgeTarget { index: usize, node: String },
    UnsupportedOperator { index: usize, operator: String },
}

impl fmt::Display for GraphIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphIssue::EmptyGraphId => write!(f, "graph id is empty"),
            GraphIssue::DuplicateNode(id) => write!(f, "node '{}' is declared more than once", id),
            GraphIssue::MissingStartNode(id) => {
                write!(f, "start node '{}' is not a declared node", id)
            }
            GraphIssue::UnknownEdgeSource { index, node } => {
                write!(f, "edge #{} leaves unknown node '{}'", index, node)
            }
            GraphIssue::UnknownEdgeTarget { index, node } => {
                write!(f, "edge #{} targets unknown node '{}'", index, node)
            }
            GraphIssue::UnsupportedOperator { index, operator } => {
                write!(f, "edge #{} uses unsupported operator '{}'", index, operator)
            }
        }
    }
}

/// Collect every structural issue in `graph`. An empty result means the graph is sound.
pub fn validate_graph(graph: &GraphDefinition) -> Vec<GraphIssue> {
    let mut issues = Vec::new();

    if graph.id.trim().is_empty() {
        issues.push(GraphIssue::EmptyGraphId);
    }

    let mut seen = HashSet::new();
    for node in &graph.nodes {
        if !seen.insert(node.id.as_str()) {
            issues.push(GraphIssue::DuplicateNode(node.id.clone()));
        }
    }

    if !seen.contains(graph.start_node.as_str()) {
        issues.push(GraphIssue::MissingStartNode(graph.start_node.clone()));
    }

    for (index, edge) in graph.edges.iter().enumerate() {
        if !seen.contains(edge.from_node.as_str()) {
            issues.push(GraphIssue::UnknownEdgeSource {
                index,
                node: edge.from_node.clone(),
            });
        }
        if edge.to_node != END_NODE && !seen.contains(edge.to_node.as_str()) {
            issues.push(GraphIssue::UnknownEdgeTarget {
                index,
                node: edge.to_node.clone(),
            });
        }
        if let Some(condition) = &edge.condition {
            if !condition.operator.is_supported() {
                issues.push(GraphIssue::UnsupportedOperator {
                    index,
                    operator: condition.operator.symbol().to_string(),
                });
            }
        }
    }

    issues
}

/// Function names referenced by `graph` that are not in `known`, sorted and
/// deduplicated.
pub fn unbound_functions(graph: &GraphDefinition, known: &[String]) -> Vec<String> {
    let known: HashSet<&str> = known.iter().map(String::as_str).collect();
    let mut missing: Vec<String> = graph
        .nodes
        .iter()
        .map(|node| node.function_name.as_str())
        .filter(|name| !known.contains(name))
        .map(String::from)
        .collect();
    missing.sort_unstable();
    missing.dedup();
    missing
}

/// Join issues into one human-readable line.
pub fn describe_issues(issues: &[GraphIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
