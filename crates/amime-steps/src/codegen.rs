//! LLM-backed code generation.

use crate::chat::{ChatCompletion, ChatMessage};
use crate::parser::LLM_OUTPUT_KEY;
use crate::prompt::PromptTemplate;
use crate::retry::with_retry;
use amime_core::{RetryPolicy, State, Step, StepError, StepName, StepOutput};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// State key holding the template variables.
pub const INPUT_DATA_KEY: &str = "input_data";
/// State key the rendered prompt is written to.
pub const INPUT_PROMPT_KEY: &str = "input_prompt";

/// Shared settings for every [`CodeGenerator`] built by a registry.
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    /// Directory holding the prompt template files.
    pub template_dir: PathBuf,
    /// Retry policy for backend calls.
    pub retry: RetryPolicy,
    /// Backend the prompt is sent to.
    pub backend: Arc<dyn ChatCompletion>,
}

/// Renders the prompt from `input_data`, asks the backend for a reply and
/// stores it under `llm_output`.
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    name: StepName,
    settings: GeneratorSettings,
}

impl CodeGenerator {
    /// Creates a generator for the node `name`.
    pub fn new(name: impl Into<StepName>, settings: GeneratorSettings) -> Self {
        Self {
            name: name.into(),
            settings,
        }
    }
}

#[async_trait]
impl Step for CodeGenerator {
    async fn invoke(&self, state: &mut State) -> Result<StepOutput, StepError> {
        let variables = state.require_object(INPUT_DATA_KEY)?;
        // Re-read on every call so edits to the templates apply without a rebuild.
        let template = PromptTemplate::load_dir(&self.settings.template_dir)?;
        let prompt = template.render(variables)?;
        debug!(step = %self.name, prompt_bytes = prompt.len(), "Rendered prompt");

        let messages = [ChatMessage::user(prompt.as_str())];
        let reply = with_retry(&self.settings.retry, self.name.as_str(), || {
            self.settings.backend.complete(&messages)
        })
        .await?;
        info!(step = %self.name, reply_bytes = reply.len(), "Received completion");

        state.insert(LLM_OUTPUT_KEY, reply);
        state.insert(INPUT_PROMPT_KEY, prompt);
        Ok(StepOutput::next())
    }

    fn name(&self) -> &StepName {
        &self.name
    }
}
