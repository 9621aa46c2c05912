//! Built-in steps for amime graphs.
//!
//! - `codegenerator` ([`CodeGenerator`]): renders a prompt from
//!   `input_data`, sends it to a chat model and stores the reply under
//!   `llm_output`.
//! - `jsonparser` ([`CodeBlockParser`]): pulls the code out of the fenced
//!   block in `llm_output` and stores it under `parsed_output`.
//!
//! ```no_run
//! use amime::StepRegistry;
//! use amime_steps::{register_builtin_steps, BuiltinConfig};
//!
//! let mut registry = StepRegistry::new();
//! register_builtin_steps(&mut registry, BuiltinConfig::default())?;
//! assert!(registry.contains("CodeGenerator"));
//! # Ok::<(), amime::WorkflowError>(())
//! ```

pub mod chat;
mod codegen;
mod parser;
mod prompt;
mod retry;

use amime::{StepRegistry, WorkflowError};
use amime_core::{RetryPolicy, Step};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use chat::{ChatClient, ChatCompletion, ChatMessage, ChatModelConfig, Platform};
pub use codegen::{CodeGenerator, GeneratorSettings, INPUT_DATA_KEY, INPUT_PROMPT_KEY};
pub use parser::{extract_code, CodeBlockParser, Extraction, LLM_OUTPUT_KEY, PARSED_OUTPUT_KEY};
pub use prompt::{PromptError, PromptTemplate, DEFAULT_TEMPLATE_DIR};
pub use retry::with_retry;

/// Registry key of [`CodeGenerator`].
pub const CODE_GENERATOR_KEY: &str = "codegenerator";
/// Registry key of [`CodeBlockParser`].
pub const CODE_BLOCK_PARSER_KEY: &str = "jsonparser";

/// Settings for [`register_builtin_steps`].
#[derive(Debug, Clone)]
pub struct BuiltinConfig {
    /// Prompt template directory.
    pub template_dir: PathBuf,
    /// Chat model used by the code generator.
    pub model: ChatModelConfig,
    /// Retry policy for chat requests.
    pub retry: RetryPolicy,
}

impl Default for BuiltinConfig {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from(DEFAULT_TEMPLATE_DIR),
            model: ChatModelConfig::default(),
            retry: RetryPolicy::exponential(5, Duration::from_secs(1)),
        }
    }
}

/// Registers the built-in steps, backed by an HTTP [`ChatClient`].
pub fn register_builtin_steps(
    registry: &mut StepRegistry,
    config: BuiltinConfig,
) -> Result<(), WorkflowError> {
    let backend: Arc<dyn ChatCompletion> = Arc::new(ChatClient::new(config.model));
    register_with_backend(
        registry,
        GeneratorSettings {
            template_dir: config.template_dir,
            retry: config.retry,
            backend,
        },
    )
}

/// Registers the built-in steps with a caller-supplied chat backend.
pub fn register_with_backend(
    registry: &mut StepRegistry,
    settings: GeneratorSettings,
) -> Result<(), WorkflowError> {
    registry.register(CODE_GENERATOR_KEY, move |name| {
        Box::new(CodeGenerator::new(name, settings.clone())) as Box<dyn Step>
    })?;
    registry.register_step::<CodeBlockParser>(CODE_BLOCK_PARSER_KEY)
}
