//! Graph declarations and the YAML document loader.
//!
//! A graph document names an entry point, an ordered list of nodes and a list
//! of edges. The graph may sit at the document root or under a top-level
//! `graph` key. Any scalar tagged `!inc` is replaced by the file it names
//! before the document is interpreted.
//!
//! ```yaml
//! graph:
//!   entry_point: CodeGenerator
//!   nodes:
//!     - name: CodeGenerator
//!     - name: JsonParser
//!   edges:
//!     - pair: [CodeGenerator, JsonParser]
//!       type: always
//! ```

use crate::error::{ValidationError, WorkflowError};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// YAML tag that splices another file in place.
pub const INCLUDE_TAG: &str = "!inc";

const GRAPH_KEY: &str = "graph";

/// Kind of an edge declaration.
///
/// Only `always` edges become part of the executable schedule. Every other
/// kind is kept for introspection and can be taken when the source step
/// routes to its target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EdgeKind {
    /// Unconditional transition.
    Always,
    /// Any other kind, kept verbatim.
    Other(String),
}

impl EdgeKind {
    const ALWAYS: &'static str = "always";

    /// Returns the kind as written in the document.
    pub fn as_str(&self) -> &str {
        match self {
            EdgeKind::Always => Self::ALWAYS,
            EdgeKind::Other(kind) => kind,
        }
    }

    /// Returns `true` for `always` edges.
    pub fn is_unconditional(&self) -> bool {
        matches!(self, EdgeKind::Always)
    }
}

impl From<String> for EdgeKind {
    fn from(kind: String) -> Self {
        if kind == Self::ALWAYS {
            EdgeKind::Always
        } else {
            EdgeKind::Other(kind)
        }
    }
}

impl From<&str> for EdgeKind {
    fn from(kind: &str) -> Self {
        Self::from(kind.to_string())
    }
}

impl From<EdgeKind> for String {
    fn from(kind: EdgeKind) -> Self {
        match kind {
            EdgeKind::Always => EdgeKind::ALWAYS.to_string(),
            EdgeKind::Other(kind) => kind,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in a graph declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDeclaration {
    /// Unique node name, case preserved.
    pub name: String,
    /// Registry key of the implementation. Defaults to `name`.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub step_type: Option<String>,
}

impl NodeDeclaration {
    /// Declares a node whose implementation is looked up by its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            step_type: None,
        }
    }

    /// Looks the implementation up under `step_type` instead of the name.
    pub fn with_type(mut self, step_type: impl Into<String>) -> Self {
        self.step_type = Some(step_type.into());
        self
    }

    /// Returns the key used to find this node's factory in the registry.
    pub fn registry_key(&self) -> &str {
        self.step_type.as_deref().unwrap_or(&self.name)
    }
}

/// A directed edge in a graph declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDeclaration {
    /// `(source, target)` node names.
    pub pair: (String, String),
    /// Edge kind, written as `type` in documents.
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    /// Kind-specific parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kwargs: Option<Map<String, serde_json::Value>>,
}

impl EdgeDeclaration {
    /// Declares an edge of the given kind.
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        kind: impl Into<EdgeKind>,
    ) -> Self {
        Self {
            pair: (source.into(), target.into()),
            kind: kind.into(),
            kwargs: None,
        }
    }

    /// Declares an unconditional edge.
    pub fn always(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(source, target, EdgeKind::Always)
    }

    /// Attaches kind-specific parameters.
    pub fn with_kwargs(mut self, kwargs: Map<String, serde_json::Value>) -> Self {
        self.kwargs = Some(kwargs);
        self
    }

    /// Returns the source node name.
    pub fn source(&self) -> &str {
        &self.pair.0
    }

    /// Returns the target node name.
    pub fn target(&self) -> &str {
        &self.pair.1
    }
}

/// A complete graph declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDeclaration {
    /// Name of the node traversal starts at.
    pub entry_point: String,
    /// Nodes in declaration order.
    pub nodes: Vec<NodeDeclaration>,
    /// Edges in declaration order.
    #[serde(default)]
    pub edges: Vec<EdgeDeclaration>,
}

impl GraphDeclaration {
    /// Creates an empty declaration starting at `entry_point`.
    pub fn new(entry_point: impl Into<String>) -> Self {
        Self {
            entry_point: entry_point.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Appends a node.
    pub fn with_node(mut self, node: impl Into<NodeDeclaration>) -> Self {
        self.nodes.push(node.into());
        self
    }

    /// Appends an edge.
    pub fn with_edge(mut self, edge: EdgeDeclaration) -> Self {
        self.edges.push(edge);
        self
    }

    /// Returns the node declared under `name`.
    pub fn find_node(&self, name: &str) -> Option<&NodeDeclaration> {
        self.nodes.iter().find(|node| node.name == name)
    }

    /// Checks names and references.
    ///
    /// Node names must be non-empty and unique; the entry point and every
    /// edge endpoint must name a declared node.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut names = HashSet::with_capacity(self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            if node.name.is_empty() {
                return Err(ValidationError::EmptyNodeName(index));
            }
            if !names.insert(node.name.as_str()) {
                return Err(ValidationError::DuplicateNode(node.name.clone()));
            }
        }

        if !names.contains(self.entry_point.as_str()) {
            return Err(ValidationError::UnknownEntryPoint(self.entry_point.clone()));
        }

        for (index, edge) in self.edges.iter().enumerate() {
            if !names.contains(edge.source()) {
                return Err(ValidationError::UnknownEdgeSource {
                    index,
                    name: edge.source().to_string(),
                });
            }
            if !names.contains(edge.target()) {
                return Err(ValidationError::UnknownEdgeTarget {
                    index,
                    name: edge.target().to_string(),
                });
            }
        }

        Ok(())
    }
}

impl From<&str> for NodeDeclaration {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Loads and validates the graph document at `path`.
pub fn load(path: impl AsRef<Path>) -> Result<GraphDeclaration, WorkflowError> {
    let path = path.as_ref();
    let value = DocumentLoader::default().load_file(path)?;
    into_declaration(value, path)
}

/// Loads and validates an in-memory graph document.
///
/// `!inc` paths are resolved relative to `base_dir`.
pub fn load_str(text: &str, base_dir: impl AsRef<Path>) -> Result<GraphDeclaration, WorkflowError> {
    let base_dir = base_dir.as_ref();
    let value: Value = serde_yaml::from_str(text).map_err(|source| WorkflowError::Parse {
        path: base_dir.to_path_buf(),
        source,
    })?;
    let value = DocumentLoader::default().resolve(value, base_dir, base_dir)?;
    into_declaration(value, base_dir)
}

fn into_declaration(value: Value, origin: &Path) -> Result<GraphDeclaration, WorkflowError> {
    let declaration: GraphDeclaration =
        serde_yaml::from_value(unwrap_graph(value)).map_err(|source| WorkflowError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
    declaration.validate()?;
    debug!(
        origin = %origin.display(),
        nodes = declaration.nodes.len(),
        edges = declaration.edges.len(),
        "Loaded graph declaration"
    );
    Ok(declaration)
}

fn unwrap_graph(value: Value) -> Value {
    match value {
        Value::Mapping(mut mapping) => match mapping.remove(GRAPH_KEY) {
            Some(graph) => graph,
            None => Value::Mapping(mapping),
        },
        other => other,
    }
}

/// Resolves `!inc` directives, tracking the chain of open files.
#[derive(Debug, Default)]
struct DocumentLoader {
    open: Vec<PathBuf>,
}

impl DocumentLoader {
    fn load_file(&mut self, path: &Path) -> Result<Value, WorkflowError> {
        let text = read_file(path)?;
        let canonical = path.canonicalize().map_err(|source| WorkflowError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if self.open.contains(&canonical) {
            return Err(WorkflowError::IncludeCycle {
                path: path.to_path_buf(),
            });
        }

        let value: Value = serde_yaml::from_str(&text).map_err(|source| WorkflowError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        self.open.push(canonical);
        let resolved = self.resolve(value, base_dir, path);
        self.open.pop();
        resolved
    }

    fn resolve(&mut self, value: Value, base_dir: &Path, origin: &Path) -> Result<Value, WorkflowError> {
        match value {
            Value::Tagged(tagged) if tagged.tag == INCLUDE_TAG => {
                let TaggedValue { value, .. } = *tagged;
                self.include(value, base_dir, origin)
            }
            Value::Tagged(mut tagged) => {
                let inner = std::mem::replace(&mut tagged.value, Value::Null);
                tagged.value = self.resolve(inner, base_dir, origin)?;
                Ok(Value::Tagged(tagged))
            }
            Value::Sequence(items) => items
                .into_iter()
                .map(|item| self.resolve(item, base_dir, origin))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Sequence),
            Value::Mapping(mapping) => {
                let mut resolved = Mapping::with_capacity(mapping.len());
                for (key, item) in mapping {
                    resolved.insert(key, self.resolve(item, base_dir, origin)?);
                }
                Ok(Value::Mapping(resolved))
            }
            other => Ok(other),
        }
    }

    fn include(&mut self, target: Value, base_dir: &Path, origin: &Path) -> Result<Value, WorkflowError> {
        let relative = match target {
            Value::String(relative) => relative,
            other => {
                return Err(WorkflowError::InvalidInclude {
                    path: origin.to_path_buf(),
                    details: format!("expected a file path, found {other:?}"),
                })
            }
        };

        let path = base_dir.join(relative);
        debug!(include = %path.display(), "Resolving include");
        if is_structured(&path) {
            self.load_file(&path)
        } else {
            read_file(&path).map(Value::String)
        }
    }
}

fn is_structured(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ["yaml", "yml", "json"]
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

fn read_file(path: &Path) -> Result<String, WorkflowError> {
    std::fs::read_to_string(path).map_err(|source| WorkflowError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const CHAIN: &str = r#"
entry_point: A
nodes:
  - name: A
  - name: B
  - name: C
edges:
  - pair: [A, B]
    type: always
  - pair: [B, C]
    type: always
"#;

    #[test]
    fn test_load_bare_document() {
        let declaration = load_str(CHAIN, ".").expect("valid document");
        assert_eq!(declaration.entry_point, "A");
        assert_eq!(declaration.nodes.len(), 3);
        assert_eq!(declaration.edges[1].pair, ("B".to_string(), "C".to_string()));
        assert!(declaration.edges[0].kind.is_unconditional());
        assert_eq!(declaration.edges[0].kwargs, None);
    }

    #[test]
    fn test_load_wrapped_document() {
        let text = r#"
graph:
  entry_point: CodeGenerator
  nodes:
    - name: CodeGenerator
    - name: JsonParser
      type: codeblockparser
  edges:
    - pair: [CodeGenerator, JsonParser]
      type: conditional
      kwargs:
        when: has_code
"#;
        let declaration = load_str(text, ".").expect("valid document");
        let edge = &declaration.edges[0];
        assert_eq!(edge.kind, EdgeKind::Other("conditional".to_string()));
        assert!(!edge.kind.is_unconditional());
        let kwargs = edge.kwargs.as_ref().expect("kwargs present");
        assert_eq!(kwargs.get("when"), Some(&serde_json::json!("has_code")));

        let parser = declaration.find_node("JsonParser").expect("declared");
        assert_eq!(parser.registry_key(), "codeblockparser");
        let generator = declaration.find_node("CodeGenerator").expect("declared");
        assert_eq!(generator.registry_key(), "CodeGenerator");
    }

    #[test]
    fn test_edges_default_to_empty() {
        let declaration = load_str("entry_point: A\nnodes:\n  - name: A\n", ".")
            .expect("valid document");
        assert!(declaration.edges.is_empty());
    }

    #[test]
    fn test_unknown_edge_target_fails() {
        let text = CHAIN.replace("pair: [B, C]", "pair: [B, Ghost]");
        let result = load_str(&text, ".");
        assert!(matches!(
            result,
            Err(WorkflowError::ConfigValidation(ValidationError::UnknownEdgeTarget { index: 1, ref name }))
                if name == "Ghost"
        ));
    }

    #[test]
    fn test_unknown_edge_source_fails() {
        let declaration = GraphDeclaration::new("A")
            .with_node("A")
            .with_edge(EdgeDeclaration::always("Z", "A"));
        assert_eq!(
            declaration.validate(),
            Err(ValidationError::UnknownEdgeSource {
                index: 0,
                name: "Z".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_entry_point_fails() {
        let declaration = GraphDeclaration::new("Start").with_node("A");
        assert_eq!(
            declaration.validate(),
            Err(ValidationError::UnknownEntryPoint("Start".to_string()))
        );
    }

    #[test]
    fn test_duplicate_and_empty_names_fail() {
        let declaration = GraphDeclaration::new("A").with_node("A").with_node("A");
        assert_eq!(
            declaration.validate(),
            Err(ValidationError::DuplicateNode("A".to_string()))
        );

        let declaration = GraphDeclaration::new("A").with_node("A").with_node("");
        assert_eq!(declaration.validate(), Err(ValidationError::EmptyNodeName(1)));
    }

    #[test]
    fn test_names_are_not_normalized() {
        let declaration = GraphDeclaration::new("a").with_node("A");
        assert!(declaration.validate().is_err());
    }

    #[test]
    fn test_edge_kind_round_trip() {
        assert_eq!(EdgeKind::from("always"), EdgeKind::Always);
        assert_eq!(EdgeKind::from("Always"), EdgeKind::Other("Always".to_string()));
        assert_eq!(String::from(EdgeKind::Always), "always");
        assert_eq!(EdgeKind::from("conditional").to_string(), "conditional");
    }

    #[test]
    fn test_include_splices_documents() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::create_dir(dir.path().join("parts")).expect("parts dir");
        fs::write(
            dir.path().join("main.yaml"),
            "graph: !inc parts/graph.yaml\n",
        )
        .expect("write main");
        fs::write(
            dir.path().join("parts/graph.yaml"),
            "entry_point: A\nnodes: !inc nodes.yaml\nedges:\n  - pair: [A, B]\n    type: always\n    kwargs:\n      note: !inc note.txt\n",
        )
        .expect("write graph");
        fs::write(dir.path().join("parts/nodes.yaml"), "- name: A\n- name: B\n")
            .expect("write nodes");
        fs::write(dir.path().join("parts/note.txt"), "spliced text").expect("write note");

        let declaration = load(dir.path().join("main.yaml")).expect("valid document");
        assert_eq!(declaration.nodes, vec![NodeDeclaration::new("A"), NodeDeclaration::new("B")]);
        let kwargs = declaration.edges[0].kwargs.as_ref().expect("kwargs present");
        assert_eq!(kwargs.get("note"), Some(&serde_json::json!("spliced text")));
    }

    #[test]
    fn test_include_relative_to_base_dir() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("nodes.yml"), "- name: A\n").expect("write nodes");

        let declaration =
            load_str("entry_point: A\nnodes: !inc nodes.yml\n", dir.path()).expect("valid document");
        assert_eq!(declaration.nodes.len(), 1);
    }

    #[test]
    fn test_include_cycle_fails() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("a.yaml"), "graph: !inc b.yaml\n").expect("write a");
        fs::write(dir.path().join("b.yaml"), "nested: !inc a.yaml\n").expect("write b");

        let result = load(dir.path().join("a.yaml"));
        assert!(matches!(result, Err(WorkflowError::IncludeCycle { .. })));
    }

    #[test]
    fn test_include_requires_scalar_path() {
        let result = load_str("entry_point: A\nnodes: !inc [a, b]\n", ".");
        assert!(matches!(result, Err(WorkflowError::InvalidInclude { .. })));
    }

    #[test]
    fn test_missing_document_fails() {
        let dir = tempfile::tempdir().expect("temp dir");
        let result = load(dir.path().join("absent.yaml"));
        assert!(matches!(result, Err(WorkflowError::Io { .. })));
    }

    #[test]
    fn test_malformed_document_fails() {
        let result = load_str("entry_point: A\nnodes: 3\n", ".");
        assert!(matches!(result, Err(WorkflowError::Parse { .. })));
    }
}
