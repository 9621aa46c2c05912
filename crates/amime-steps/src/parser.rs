//! Extracts code from a fenced block in a model reply.

use amime_core::{State, Step, StepError, StepName, StepOutput};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

/// State key the parser reads.
pub const LLM_OUTPUT_KEY: &str = "llm_output";
/// State key the parser writes.
pub const PARSED_OUTPUT_KEY: &str = "parsed_output";

const FENCED_BLOCK: &str = r"(?s)```[a-z]*\n(.*?)```";
const UNTERMINATED_BLOCK: &str = r"(?s)```[a-z]*\n(.*?)\n?\z";

/// Which rule produced the extracted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    /// The last complete fenced block.
    Fenced,
    /// A block whose closing fence is missing.
    Unterminated,
    /// No fence at all; the whole reply.
    Raw,
}

/// Returns the code in `reply` and how it was found.
///
/// The last complete fenced block wins. Without one, an opening fence that
/// runs to the end of the text is used, minus one trailing newline.
/// Otherwise the reply is returned unchanged.
pub fn extract_code(reply: &str) -> Result<(&str, Extraction), regex::Error> {
    let fenced = Regex::new(FENCED_BLOCK)?;
    if let Some(block) = fenced
        .captures_iter(reply)
        .filter_map(|caps| caps.get(1))
        .last()
    {
        return Ok((block.as_str(), Extraction::Fenced));
    }

    let unterminated = Regex::new(UNTERMINATED_BLOCK)?;
    if let Some(block) = unterminated.captures(reply).and_then(|caps| caps.get(1)) {
        return Ok((block.as_str(), Extraction::Unterminated));
    }

    Ok((reply, Extraction::Raw))
}

/// Step that copies the code from `llm_output` into `parsed_output`.
#[derive(Debug, Clone)]
pub struct CodeBlockParser {
    name: StepName,
}

impl CodeBlockParser {
    /// Creates a parser for the node `name`.
    pub fn new(name: impl Into<StepName>) -> Self {
        Self { name: name.into() }
    }
}

impl From<StepName> for CodeBlockParser {
    fn from(name: StepName) -> Self {
        Self { name }
    }
}

#[async_trait]
impl Step for CodeBlockParser {
    async fn invoke(&self, state: &mut State) -> Result<StepOutput, StepError> {
        let reply = state.require_str(LLM_OUTPUT_KEY)?;
        let (code, extraction) = extract_code(reply).map_err(StepError::other)?;
        debug!(step = %self.name, ?extraction, bytes = code.len(), "Extracted code");
        let code = code.to_string();
        state.insert(PARSED_OUTPUT_KEY, code);
        Ok(StepOutput::next())
    }

    fn name(&self) -> &StepName {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_fenced_block_wins() {
        let reply = "First:\n```python\nprint(1)\n```\nThen:\n```rust\nfn main() {}\n```\nDone.";
        let (code, extraction) = extract_code(reply).expect("valid patterns");
        assert_eq!(code, "fn main() {}\n");
        assert_eq!(extraction, Extraction::Fenced);
    }

    #[test]
    fn test_block_without_language() {
        let (code, _) = extract_code("```\n{\"a\": 1}\n```").expect("valid patterns");
        assert_eq!(code, "{\"a\": 1}\n");
    }

    #[test]
    fn test_unterminated_block_runs_to_end() {
        let reply = "Here you go:\n```json\n{\"partial\": true";
        let (code, extraction) = extract_code(reply).expect("valid patterns");
        assert_eq!(code, "{\"partial\": true");
        assert_eq!(extraction, Extraction::Unterminated);
    }

    #[test]
    fn test_unterminated_block_drops_final_newline() {
        let reply = "```json\n{\"partial\": true\n";
        let (code, extraction) = extract_code(reply).expect("valid patterns");
        assert_eq!(code, "{\"partial\": true");
        assert_eq!(extraction, Extraction::Unterminated);

        let (code, _) = extract_code("```\nline\n\n").expect("valid patterns");
        assert_eq!(code, "line\n");
    }

    #[test]
    fn test_plain_text_is_kept() {
        let reply = "no code here";
        assert_eq!(
            extract_code(reply).expect("valid patterns"),
            ("no code here", Extraction::Raw)
        );
    }

    #[test]
    fn test_uppercase_language_tag_is_not_a_fence() {
        let reply = "```JSON\n{}\n```";
        let (_, extraction) = extract_code(reply).expect("valid patterns");
        assert_eq!(extraction, Extraction::Raw);
    }

    #[tokio::test]
    async fn test_step_writes_parsed_output() {
        let parser = CodeBlockParser::new("JsonParser");
        let mut state = State::new();
        state.insert(LLM_OUTPUT_KEY, "```json\n[1, 2]\n```");

        let output = parser.invoke(&mut state).await.expect("parses");
        assert_eq!(output, StepOutput::Next);
        assert_eq!(state.get(PARSED_OUTPUT_KEY), Some(&json!("[1, 2]\n")));
        assert_eq!(state.get(LLM_OUTPUT_KEY), Some(&json!("```json\n[1, 2]\n```")));
    }

    #[tokio::test]
    async fn test_step_requires_llm_output() {
        let parser = CodeBlockParser::new("JsonParser");
        let result = parser.invoke(&mut State::new()).await;
        assert!(matches!(result, Err(StepError::MissingKey(ref key)) if key == LLM_OUTPUT_KEY));
    }
}
