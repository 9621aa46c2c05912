//! Step registry: maps step-type names to factories.

use crate::config::{GraphDeclaration, NodeDeclaration};
use crate::error::WorkflowError;
use amime_core::{Step, StepName};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds a step instance for the node with the given name.
pub type StepFactory = Arc<dyn Fn(StepName) -> Box<dyn Step> + Send + Sync>;

/// Step instances keyed by the node they were built for.
pub type ResolvedSteps = HashMap<StepName, Box<dyn Step>>;

/// Registry of step implementations.
///
/// Keys are compared case-insensitively. Registration needs `&mut self`, so
/// once the registry is shared behind an `Arc` it is read-only.
///
/// # Examples
///
/// ```
/// use amime::StepRegistry;
/// use amime_core::{State, Step, StepError, StepName, StepOutput};
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct Noop(StepName);
///
/// impl From<StepName> for Noop {
///     fn from(name: StepName) -> Self {
///         Self(name)
///     }
/// }
///
/// #[async_trait]
/// impl Step for Noop {
///     async fn invoke(&self, _state: &mut State) -> Result<StepOutput, StepError> {
///         Ok(StepOutput::next())
///     }
///
///     fn name(&self) -> &StepName {
///         &self.0
///     }
/// }
///
/// let mut registry = StepRegistry::new();
/// registry.register_step::<Noop>("Noop").expect("first registration");
/// assert!(registry.contains("noop"));
/// assert!(registry.register_step::<Noop>("NOOP").is_err());
/// ```
#[derive(Clone, Default)]
pub struct StepRegistry {
    factories: HashMap<String, StepFactory>,
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

impl StepRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Returns the canonical form of a registry key.
    pub fn canonical_key(name: &str) -> String {
        name.to_lowercase()
    }

    /// Registers a factory under `key`.
    ///
    /// Fails with [`WorkflowError::DuplicateRegistration`] if the canonical
    /// key is already taken.
    pub fn register<F>(&mut self, key: &str, factory: F) -> Result<(), WorkflowError>
    where
        F: Fn(StepName) -> Box<dyn Step> + Send + Sync + 'static,
    {
        let canonical = Self::canonical_key(key);
        if self.factories.contains_key(&canonical) {
            return Err(WorkflowError::DuplicateRegistration(canonical));
        }
        debug!(key = %canonical, "Registered step type");
        self.factories.insert(canonical, Arc::new(factory));
        Ok(())
    }

    /// Registers a step type that can be built from its node name.
    pub fn register_step<S>(&mut self, key: &str) -> Result<(), WorkflowError>
    where
        S: Step + From<StepName> + 'static,
    {
        self.register(key, |name| Box::new(S::from(name)) as Box<dyn Step>)
    }

    /// Returns the factory registered under `key`.
    pub fn resolve(&self, key: &str) -> Result<&StepFactory, WorkflowError> {
        let canonical = Self::canonical_key(key);
        self.factories
            .get(&canonical)
            .ok_or(WorkflowError::UnknownStep(canonical))
    }

    /// Builds a fresh instance for a declared node.
    pub fn instantiate(&self, node: &NodeDeclaration) -> Result<Box<dyn Step>, WorkflowError> {
        let factory = self.resolve(node.registry_key())?;
        Ok(factory(StepName::new(node.name.as_str())))
    }

    /// Builds one instance per declared node.
    ///
    /// Fails with [`WorkflowError::UnresolvedStep`] on the first node whose
    /// key is not registered.
    pub fn resolve_all(&self, declaration: &GraphDeclaration) -> Result<ResolvedSteps, WorkflowError> {
        let mut resolved = HashMap::with_capacity(declaration.nodes.len());
        for node in &declaration.nodes {
            let step = self.instantiate(node).map_err(|e| {
                warn!(node = %node.name, key = %node.registry_key(), error = %e, "Cannot resolve step");
                WorkflowError::UnresolvedStep(StepName::new(node.name.as_str()))
            })?;
            resolved.insert(StepName::new(node.name.as_str()), step);
        }
        Ok(resolved)
    }

    /// Returns `true` if a factory is registered under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(&Self::canonical_key(key))
    }

    /// Returns all registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Returns the number of registered step types.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
