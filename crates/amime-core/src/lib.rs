//! Step contract and shared types for the amime graph engine.
//!
//! This crate provides minimal abstractions without runtime dependencies.
//! Step authors depend on this crate; the engine lives in `amime`.
//!
//! # Core Types
//!
//! - [`Step`] - The contract every graph node implements
//! - [`StepOutput`] - What the engine should do after a step returns
//! - [`State`] - JSON-valued mapping threaded through a run
//! - [`StepError`] - Errors raised by step implementations
//! - [`RetryPolicy`] - Backoff settings for steps that retry their own work

mod error;
mod retry;
mod state;
mod step;

pub use error::StepError;
pub use retry::{RetryPolicy, RetryPolicyError};
pub use state::State;
pub use step::{Step, StepName, StepOutput};
