pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod traits;
pub mod types;

pub use config::{AppConfig, EngineConfig};
pub use error::{Result, StepgraphError};
pub use event::{EventBus, RunEvent};
pub use graph::{Condition, Edge, GraphDefinition, Node, Operator, END_NODE};
pub use traits::NodeFunction;
pub use types::*;
