//! Prompt templates with `{name}` placeholders.

use amime_core::StepError;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory the code generator reads its prompt from by default.
pub const DEFAULT_TEMPLATE_DIR: &str = "templates/prompt/DP";

/// Errors raised while loading or rendering a template.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PromptError {
    /// A template file or directory could not be read.
    #[error("Failed to read template '{}': {source}", .path.display())]
    Io {
        /// The path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The template directory holds no files.
    #[error("Template directory '{}' contains no files", .0.display())]
    EmptyDirectory(PathBuf),

    /// A `{` without a matching `}`.
    #[error("Unclosed placeholder starting at byte {0}")]
    UnclosedPlaceholder(usize),

    /// A single `}` outside a placeholder.
    #[error("Single '}}' encountered at byte {0}")]
    UnmatchedBrace(usize),

    /// `{}` with no variable name.
    #[error("Empty placeholder at byte {0}")]
    EmptyPlaceholder(usize),

    /// A placeholder names a variable that was not supplied.
    #[error("Missing template variable: {0}")]
    MissingVariable(String),
}

impl From<PromptError> for StepError {
    fn from(error: PromptError) -> Self {
        match error {
            PromptError::MissingVariable(name) => StepError::MissingKey(name),
            other => StepError::other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Variable(String),
}

/// A parsed prompt template.
///
/// `{name}` is replaced by the variable `name`; `{{` and `}}` produce
/// literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parses template text.
    pub fn parse(text: &str) -> Result<Self, PromptError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = text.char_indices().peekable();

        while let Some((index, c)) = chars.next() {
            match c {
                '{' if chars.next_if(|&(_, next)| next == '{').is_some() => literal.push('{'),
                '}' if chars.next_if(|&(_, next)| next == '}').is_some() => literal.push('}'),
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, inner) in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        name.push(inner);
                    }
                    if !closed {
                        return Err(PromptError::UnclosedPlaceholder(index));
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(PromptError::EmptyPlaceholder(index));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Variable(name.to_string()));
                }
                '}' => return Err(PromptError::UnmatchedBrace(index)),
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Text(literal));
        }
        Ok(Self { segments })
    }

    /// Loads every file in `dir`, in file-name order, joined by a blank line.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, PromptError> {
        let dir = dir.as_ref();
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| PromptError::Io { path, source }
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_error(dir))? {
            let path = entry.map_err(io_error(dir))?.path();
            if path.is_file() {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(PromptError::EmptyDirectory(dir.to_path_buf()));
        }
        files.sort();

        let mut parts = Vec::with_capacity(files.len());
        for path in &files {
            parts.push(fs::read_to_string(path).map_err(io_error(path))?);
        }
        Self::parse(&parts.join("\n\n"))
    }

    /// Returns the variable names in order of first use.
    pub fn variables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Variable(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Fills the placeholders from `variables`.
    ///
    /// Strings are inserted verbatim; other values as compact JSON.
    pub fn render(&self, variables: &Map<String, Value>) -> Result<String, PromptError> {
        let mut rendered = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => rendered.push_str(text),
                Segment::Variable(name) => match variables.get(name) {
                    Some(Value::String(text)) => rendered.push_str(text),
                    Some(value) => rendered.push_str(&value.to_string()),
                    None => return Err(PromptError::MissingVariable(name.clone())),
                },
            }
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("Expected an object, got {other}"),
        }
    }

    #[test]
    fn test_render_placeholders() {
        let template = PromptTemplate::parse("Write {language} code for: {task}").expect("valid");
        let rendered = template
            .render(&vars(json!({"language": "Rust", "task": "a parser", "unused": 1})))
            .expect("all variables present");
        assert_eq!(rendered, "Write Rust code for: a parser");
        assert_eq!(template.variables(), vec!["language", "task"]);
    }

    #[test]
    fn test_non_string_values_render_as_json() {
        let template = PromptTemplate::parse("Cases: {cases}").expect("valid");
        let rendered = template
            .render(&vars(json!({"cases": [1, 2]})))
            .expect("present");
        assert_eq!(rendered, "Cases: [1,2]");
    }

    #[test]
    fn test_escaped_braces() {
        let template = PromptTemplate::parse("Return {{\"answer\": {answer}}}").expect("valid");
        let rendered = template
            .render(&vars(json!({"answer": "42"})))
            .expect("present");
        assert_eq!(rendered, "Return {\"answer\": 42}");
    }

    #[test]
    fn test_missing_variable() {
        let template = PromptTemplate::parse("Hello {name}").expect("valid");
        let error = template.render(&Map::new()).expect_err("name is missing");
        assert!(matches!(error, PromptError::MissingVariable(ref name) if name == "name"));
        assert!(matches!(StepError::from(error), StepError::MissingKey(ref key) if key == "name"));
    }

    #[test]
    fn test_malformed_templates() {
        assert!(matches!(
            PromptTemplate::parse("oops {name"),
            Err(PromptError::UnclosedPlaceholder(5))
        ));
        assert!(matches!(
            PromptTemplate::parse("oops }"),
            Err(PromptError::UnmatchedBrace(5))
        ));
        assert!(matches!(
            PromptTemplate::parse("oops {}"),
            Err(PromptError::EmptyPlaceholder(5))
        ));
    }

    #[test]
    fn test_load_dir_joins_files_in_name_order() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("02_task.txt"), "Task: {task}").expect("write task");
        fs::write(dir.path().join("01_role.txt"), "You are a careful engineer.").expect("write role");

        let template = PromptTemplate::load_dir(dir.path()).expect("loads");
        let rendered = template
            .render(&vars(json!({"task": "sum a list"})))
            .expect("present");
        assert_eq!(rendered, "You are a careful engineer.\n\nTask: sum a list");
    }

    #[test]
    fn test_load_dir_errors() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(matches!(
            PromptTemplate::load_dir(dir.path()),
            Err(PromptError::EmptyDirectory(_))
        ));
        assert!(matches!(
            PromptTemplate::load_dir(dir.path().join("absent")),
            Err(PromptError::Io { .. })
        ));
    }
}
