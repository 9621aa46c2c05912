//! The network facade: one object per workflow definition.

use crate::config::{self, GraphDeclaration};
use crate::executor::{Execution, Executor, ExecutorConfig};
use crate::graph::{self, CompiledGraph, GraphSummary};
use crate::registry::StepRegistry;
use crate::WorkflowError;
use amime_core::{State, StepName};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Where a network's declaration comes from.
#[derive(Debug, Clone)]
pub enum GraphSource {
    /// A YAML document on disk, read at compile time.
    Path(PathBuf),
    /// A declaration built in memory.
    Declaration(GraphDeclaration),
}

/// A named workflow: its declaration source, the registry that resolves its
/// steps, and (after [`Network::compile`]) the compiled graph.
///
/// # Examples
///
/// ```
/// use amime::{EdgeDeclaration, GraphDeclaration, Network, StepRegistry};
/// use amime_core::{State, Step, StepError, StepName, StepOutput};
/// use async_trait::async_trait;
/// use std::sync::Arc;
///
/// #[derive(Debug)]
/// struct Count(StepName);
///
/// impl From<StepName> for Count {
///     fn from(name: StepName) -> Self {
///         Self(name)
///     }
/// }
///
/// #[async_trait]
/// impl Step for Count {
///     async fn invoke(&self, state: &mut State) -> Result<StepOutput, StepError> {
///         let seen = state.get("count").and_then(|v| v.as_u64()).unwrap_or(0);
///         state.insert("count", seen + 1);
///         Ok(StepOutput::next())
///     }
///
///     fn name(&self) -> &StepName {
///         &self.0
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), amime::WorkflowError> {
/// let mut registry = StepRegistry::new();
/// registry.register_step::<Count>("count")?;
///
/// let declaration = GraphDeclaration::new("First")
///     .with_node(amime::NodeDeclaration::new("First").with_type("count"))
///     .with_node(amime::NodeDeclaration::new("Second").with_type("count"))
///     .with_edge(EdgeDeclaration::always("First", "Second"));
///
/// let mut network = Network::from_declaration("counter", declaration, Arc::new(registry));
/// network.compile()?;
/// let execution = network.run(State::new()).await?;
/// assert_eq!(
///     execution.final_state().and_then(|s| s.get("count")),
///     Some(&serde_json::json!(2))
/// );
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Network {
    name: String,
    source: GraphSource,
    registry: Arc<StepRegistry>,
    executor_config: ExecutorConfig,
    compiled: Option<CompiledGraph>,
}

impl Network {
    /// Creates a network backed by the YAML document at `path`.
    pub fn from_path(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        registry: Arc<StepRegistry>,
    ) -> Self {
        Self::with_source(name, GraphSource::Path(path.into()), registry)
    }

    /// Creates a network from an in-memory declaration.
    pub fn from_declaration(
        name: impl Into<String>,
        declaration: GraphDeclaration,
        registry: Arc<StepRegistry>,
    ) -> Self {
        Self::with_source(name, GraphSource::Declaration(declaration), registry)
    }

    fn with_source(name: impl Into<String>, source: GraphSource, registry: Arc<StepRegistry>) -> Self {
        Self {
            name: name.into(),
            source,
            registry,
            executor_config: ExecutorConfig::default(),
            compiled: None,
        }
    }

    /// Sets the executor configuration used by [`Network::run`].
    pub fn with_executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    /// Returns the network's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declaration source.
    pub fn source(&self) -> &GraphSource {
        &self.source
    }

    /// Returns the document path, if the network was created from one.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            GraphSource::Path(path) => Some(path),
            GraphSource::Declaration(_) => None,
        }
    }

    /// Loads, resolves and compiles the declaration.
    ///
    /// Calling this again reloads the document and replaces the compiled
    /// graph. On failure the previously compiled graph, if any, is kept.
    pub fn compile(&mut self) -> Result<&CompiledGraph, WorkflowError> {
        let declaration = match &self.source {
            GraphSource::Path(path) => config::load(path)?,
            GraphSource::Declaration(declaration) => {
                declaration.validate()?;
                declaration.clone()
            }
        };
        let resolved = self.registry.resolve_all(&declaration)?;
        let compiled = graph::compile(&declaration, resolved)?;
        info!(
            network = %self.name,
            nodes = compiled.nodes().len(),
            transitions = compiled.schedule().transition_count(),
            "Network compiled"
        );
        Ok(self.compiled.insert(compiled))
    }

    /// Returns the compiled graph, if [`Network::compile`] has succeeded.
    pub fn compiled(&self) -> Option<&CompiledGraph> {
        self.compiled.as_ref()
    }

    /// Returns `true` once the network has been compiled.
    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    fn require_compiled(&self) -> Result<&CompiledGraph, WorkflowError> {
        self.compiled
            .as_ref()
            .ok_or_else(|| WorkflowError::NotCompiled(self.name.clone()))
    }

    /// Runs the compiled graph over `state`.
    pub async fn run(&self, state: State) -> Result<Execution, WorkflowError> {
        let graph = self.require_compiled()?;
        info!(network = %self.name, entry_point = %graph.entry_point(), "Running network");
        Executor::new(graph)
            .with_config(self.executor_config)
            .run(state)
            .await
    }

    /// Returns the compiled nodes and edges, conditional edges included.
    pub fn nodes_edges(&self) -> Result<GraphSummary, WorkflowError> {
        Ok(self.require_compiled()?.summary())
    }

    /// Returns the sources of every edge ending at `node`.
    pub fn predecessors(&self, node: &str) -> Result<Vec<StepName>, WorkflowError> {
        let graph = self.require_compiled()?;
        Ok(graph.predecessors(node).into_iter().cloned().collect())
    }

    /// Returns the targets of every edge starting at `node`.
    pub fn successors(&self, node: &str) -> Result<Vec<StepName>, WorkflowError> {
        let graph = self.require_compiled()?;
        Ok(graph.successors(node).into_iter().cloned().collect())
    }
}
