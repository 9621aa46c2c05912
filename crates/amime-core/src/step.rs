//! Step trait and related types.

use crate::error::StepError;
use crate::state::State;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

/// Name of a node in a graph declaration.
///
/// Names keep the case they were declared with; only registry lookups are
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the step name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StepName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for StepName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for StepName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Output from a step invocation.
///
/// Tells the engine where traversal goes after the step returns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StepOutput {
    /// Follow the node's unconditional (`always`) edges.
    #[default]
    Next,
    /// Jump to the named successor. The node must declare an edge to it,
    /// of any kind.
    Route(StepName),
    /// Stop this branch here.
    End,
}

impl StepOutput {
    /// Follows the compiled schedule.
    pub fn next() -> Self {
        Self::Next
    }

    /// Routes to the given successor.
    pub fn route(name: impl Into<StepName>) -> Self {
        Self::Route(name.into())
    }

    /// Terminates the current branch.
    pub fn done() -> Self {
        Self::End
    }
}

/// A graph node that transforms the shared state.
///
/// The engine lends the state to the step for the duration of
/// [`invoke`](Step::invoke); whatever the step leaves in it is what the next
/// step observes.
///
/// # Examples
///
/// ```
/// use amime_core::{State, Step, StepError, StepName, StepOutput};
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct Upper {
///     name: StepName,
/// }
///
/// impl From<StepName> for Upper {
///     fn from(name: StepName) -> Self {
///         Self { name }
///     }
/// }
///
/// #[async_trait]
/// impl Step for Upper {
///     async fn invoke(&self, state: &mut State) -> Result<StepOutput, StepError> {
///         let text = state.require_str("text")?.to_uppercase();
///         state.insert("text", text);
///         Ok(StepOutput::next())
///     }
///
///     fn name(&self) -> &StepName {
///         &self.name
///     }
/// }
/// ```
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Runs the step against the current state.
    ///
    /// # Returns
    ///
    /// - `Ok(StepOutput::Next)` - Continue along unconditional edges
    /// - `Ok(StepOutput::Route(name))` - Continue at a declared successor
    /// - `Ok(StepOutput::End)` - Stop this branch
    /// - `Err(error)` - Step failed; the run is aborted
    async fn invoke(&self, state: &mut State) -> Result<StepOutput, StepError>;

    /// Returns the name of the node this instance was created for.
    fn name(&self) -> &StepName;
}
