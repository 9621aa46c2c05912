//! Engine error types.

use amime_core::{State, StepError, StepName};
use std::path::PathBuf;
use thiserror::Error;

/// A referential or structural problem in a graph declaration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    /// `entry_point` does not name a declared node.
    #[error("entry point '{0}' is not a declared node")]
    UnknownEntryPoint(String),

    /// Two nodes share a name.
    #[error("node '{0}' is declared more than once")]
    DuplicateNode(String),

    /// A node was declared with an empty name.
    #[error("node at position {0} has an empty name")]
    EmptyNodeName(usize),

    /// An edge starts at an undeclared node.
    #[error("edge {index} starts at undeclared node '{name}'")]
    UnknownEdgeSource {
        /// Position of the edge in the declaration.
        index: usize,
        /// The undeclared name.
        name: String,
    },

    /// An edge ends at an undeclared node.
    #[error("edge {index} ends at undeclared node '{name}'")]
    UnknownEdgeTarget {
        /// Position of the edge in the declaration.
        index: usize,
        /// The undeclared name.
        name: String,
    },
}

/// Errors that can occur while loading, compiling or running a graph.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkflowError {
    /// A graph document (or an included file) could not be read.
    #[error("Failed to read graph document '{}': {source}", .path.display())]
    Io {
        /// The file that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A graph document is not valid YAML or does not match the model.
    #[error("Failed to parse graph document '{}': {source}", .path.display())]
    Parse {
        /// The file that failed.
        path: PathBuf,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },

    /// A document includes itself, directly or through other documents.
    #[error("Include cycle detected at '{}'", .path.display())]
    IncludeCycle {
        /// The file that was included a second time.
        path: PathBuf,
    },

    /// An `!inc` directive does not hold a file path.
    #[error("Invalid include directive in '{}': {details}", .path.display())]
    InvalidInclude {
        /// The document containing the directive.
        path: PathBuf,
        /// What was wrong with it.
        details: String,
    },

    /// The declaration is malformed or referentially inconsistent.
    #[error("Invalid graph configuration: {0}")]
    ConfigValidation(#[from] ValidationError),

    /// Two factories claimed the same registry key.
    #[error("Step type already registered: {0}")]
    DuplicateRegistration(String),

    /// No factory is registered under the requested key.
    #[error("Unknown step type: {0}")]
    UnknownStep(String),

    /// A declared node has no step instance.
    #[error("No step implementation resolved for node '{0}'")]
    UnresolvedStep(StepName),

    /// A step invocation failed. The run is aborted.
    #[error("Step '{step_name}' failed: {source}")]
    StepExecution {
        /// The node whose step failed.
        step_name: StepName,
        /// The error the step returned, unchanged.
        #[source]
        source: StepError,
        /// The state as it was before the failing step ran.
        state: Box<State>,
    },

    /// A step routed to a node it has no declared edge to.
    #[error("Step '{from}' routed to '{to}', which is not one of its declared successors")]
    InvalidRoute {
        /// The routing node.
        from: StepName,
        /// The requested target.
        to: StepName,
    },

    /// The run performed more step invocations than allowed.
    #[error("Step limit of {limit} reached before running '{step_name}'")]
    StepLimitExceeded {
        /// The configured limit.
        limit: usize,
        /// The step that would have run next.
        step_name: StepName,
    },

    /// `run` or an introspection query was called before `compile`.
    #[error("Network '{0}' has not been compiled")]
    NotCompiled(String),
}

impl WorkflowError {
    /// Returns the last good state carried by a [`WorkflowError::StepExecution`].
    pub fn last_state(&self) -> Option<&State> {
        match self {
            WorkflowError::StepExecution { state, .. } => Some(&**state),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let error = WorkflowError::UnresolvedStep(StepName::new("JsonParser"));
        assert_eq!(
            error.to_string(),
            "No step implementation resolved for node 'JsonParser'"
        );

        let error = WorkflowError::from(ValidationError::UnknownEdgeTarget {
            index: 1,
            name: "Ghost".to_string(),
        });
        assert_eq!(
            error.to_string(),
            "Invalid graph configuration: edge 1 ends at undeclared node 'Ghost'"
        );
    }

    #[test]
    fn test_step_execution_keeps_source() {
        let mut state = State::new();
        state.insert("x", 1);
        let error = WorkflowError::StepExecution {
            step_name: StepName::new("B"),
            source: StepError::fatal("boom"),
            state: Box::new(state.clone()),
        };

        assert_eq!(error.to_string(), "Step 'B' failed: boom");
        assert_eq!(error.last_state(), Some(&state));
        let source = error.source().expect("has a source");
        assert!(source.downcast_ref::<StepError>().is_some());
    }
}
