use std::collections::HashMap;
use std::sync::Arc;

use stepgraph_core::graph::GraphDefinition;
use stepgraph_core::traits::NodeFunction;

/// Registry of node functions, keyed by name.
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn NodeFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Register a function. An existing entry with the same name is replaced.
    pub fn register(&mut self, name: impl Into<String>, function: impl NodeFunction) {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// Get a function by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn NodeFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// List all registered function names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of graph definitions, keyed by graph id.
///
/// Graphs are stored behind `Arc` so a run keeps the definition it started
/// with even if the id is re-registered mid-run.
#[derive(Default)]
pub struct GraphRegistry {
    graphs: HashMap<String, Arc<GraphDefinition>>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a graph. Last write wins; there is no merge.
    pub fn register(&mut self, graph: GraphDefinition) {
        self.graphs.insert(graph.id.clone(), Arc::new(graph));
    }

    pub fn get(&self, id: &str) -> Option<Arc<GraphDefinition>> {
        self.graphs.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.graphs.contains_key(id)
    }

    /// List all registered graph ids, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.graphs.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}
