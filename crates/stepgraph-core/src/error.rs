use thiserror::Error;

#[derive(Debug, Error)]
pub enum StepgraphError {
    // Setup errors
    #[error("Graph '{0}' not found.")]
    GraphNotFound(String),

    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    // Run-fatal errors
    #[error("Node {node} definition missing in graph {graph}")]
    NodeNotFound { node: String, graph: String },

    #[error("Function {0} not registered.")]
    FunctionNotRegistered(String),

    #[error("Max steps ({0}) exceeded. Possible infinite loop.")]
    StepLimitExceeded(usize),

    #[error("Cannot compare '{variable}' ({left}) {operator} {right}")]
    IncomparableOperands {
        variable: String,
        operator: String,
        left: String,
        right: String,
    },

    #[error("Function {function} failed: {message}")]
    NodeFunction { function: String, message: String },

    // Driver-fatal errors
    #[error("Run {0} not found.")]
    RunNotFound(String),

    #[error("Run store error: {0}")]
    Store(String),

    #[error("Run driver failed: {0}")]
    Driver(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StepgraphError {
    /// Whether this error belongs to a single run and should finalize that run
    /// as failed instead of escaping the driver.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            StepgraphError::NodeNotFound { .. }
                | StepgraphError::FunctionNotRegistered(_)
                | StepgraphError::StepLimitExceeded(_)
                | StepgraphError::IncomparableOperands { .. }
                | StepgraphError::NodeFunction { .. }
        )
    }

    /// Shorthand for a node function reporting its own failure.
    pub fn node_function(function: impl Into<String>, message: impl Into<String>) -> Self {
        StepgraphError::NodeFunction {
            function: function.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StepgraphError>;
