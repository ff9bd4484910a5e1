//! Static workflow definitions: nodes, guarded edges, and the graph that holds them.
//!
//! A graph is plain data. Nothing here checks that `start_node`, edge targets,
//! or function names resolve; those references are looked up lazily when a run
//! reaches them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved transition target that terminates a run.
///
/// It never needs to appear in a graph's node list.
pub const END_NODE: &str = "End";

/// A named step bound to a registered function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within the graph.
    pub id: String,
    /// Name looked up in the function registry when the node executes.
    pub function_name: String,
}

impl Node {
    pub fn new(id: impl Into<String>, function_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            function_name: function_name.into(),
        }
    }
}

/// Comparison operator of a [`Condition`].
///
/// Serialized as its symbol. Unknown symbols are kept as
/// [`Operator::Unsupported`] so a malformed graph still registers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Unsupported(String),
}

impl Operator {
    pub fn symbol(&self) -> &str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Unsupported(raw) => raw,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Operator::Unsupported(_))
    }
}

impl From<String> for Operator {
    fn from(raw: String) -> Self {
        match raw.trim() {
            "==" => Operator::Eq,
            "!=" => Operator::Ne,
            ">" => Operator::Gt,
            "<" => Operator::Lt,
            ">=" => Operator::Ge,
            "<=" => Operator::Le,
            _ => Operator::Unsupported(raw),
        }
    }
}

impl From<&str> for Operator {
    fn from(raw: &str) -> Self {
        Operator::from(raw.to_string())
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        match op {
            Operator::Unsupported(raw) => raw,
            other => other.symbol().to_string(),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A single comparator predicate over one state variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// State key to look up.
    pub variable: String,
    pub operator: Operator,
    /// Right-hand operand.
    pub value: serde_json::Value,
}

impl Condition {
    pub fn new(
        variable: impl Into<String>,
        operator: impl Into<Operator>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            variable: variable.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.variable, self.operator, self.value)
    }
}

/// A directed transition between two nodes.
///
/// An edge without a condition is the default (else) branch of its source node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id.
    pub from_node: String,
    /// Target node id, or [`END_NODE`].
    pub to_node: String,
    /// Guard that must hold to take this edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl Edge {
    /// Create an unconditional edge.
    pub fn always(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from_node: from.into(),
            to_node: to.into(),
            condition: None,
        }
    }

    /// Create an edge guarded by `condition`.
    pub fn when(from: impl Into<String>, to: impl Into<String>, condition: Condition) -> Self {
        Self {
            from_node: from.into(),
            to_node: to.into(),
            condition: Some(condition),
        }
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}

/// A complete workflow graph.
///
/// Node and edge order is preserved exactly as declared; edge order decides
/// which transition wins when several match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub id: String,
    pub start_node: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl GraphDefinition {
    /// Create an empty graph that starts at `start_node`.
    pub fn new(id: impl Into<String>, start_node: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            start_node: start_node.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Append a node.
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Append an edge.
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Find a node by id.
    pub fn find_node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// All edges leaving `node_id`, in declaration order.
    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from_node == node_id)
    }

    /// Parse a graph from its JSON form.
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
