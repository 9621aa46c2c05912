//! A declarative step-graph engine.
//!
//! Workflows are described in YAML: an entry point, named nodes and typed
//! edges. A [`Network`] loads the document, resolves every node to a step
//! implementation through a [`StepRegistry`], compiles the edges into a
//! schedule and runs it over a shared [`State`].
//!
//! # Example
//!
//! ```rust,no_run
//! use amime::prelude::*;
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct Greet(StepName);
//!
//! impl From<StepName> for Greet {
//!     fn from(name: StepName) -> Self {
//!         Self(name)
//!     }
//! }
//!
//! #[async_trait]
//! impl Step for Greet {
//!     async fn invoke(&self, state: &mut State) -> Result<StepOutput, StepError> {
//!         state.insert("greeting", "hello");
//!         Ok(StepOutput::next())
//!     }
//!
//!     fn name(&self) -> &StepName {
//!         &self.0
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), WorkflowError> {
//!     let mut registry = StepRegistry::new();
//!     registry.register_step::<Greet>("greet")?;
//!
//!     let mut network = Network::from_path("hello", "networks/hello.yaml", Arc::new(registry));
//!     network.compile()?;
//!     let execution = network.run(State::new()).await?;
//!     println!("{:?}", execution.final_state());
//!     Ok(())
//! }
//! ```

pub mod config;
mod error;
mod executor;
mod graph;
mod network;
mod registry;

// Re-export core types
pub use amime_core::*;

pub use config::{load, load_str, EdgeDeclaration, EdgeKind, GraphDeclaration, NodeDeclaration};
pub use error::{ValidationError, WorkflowError};
pub use executor::{Execution, Executor, ExecutorConfig, Terminal, DEFAULT_STEP_LIMIT};
pub use graph::{compile, CompiledGraph, EdgeInfo, GraphSummary, Schedule};
pub use network::{GraphSource, Network};
pub use registry::{ResolvedSteps, StepFactory, StepRegistry};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        EdgeDeclaration, Execution, GraphDeclaration, Network, NodeDeclaration, State, Step,
        StepError, StepName, StepOutput, StepRegistry, WorkflowError,
    };
}
