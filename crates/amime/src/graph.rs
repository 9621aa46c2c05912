//! Graph compiler.
//!
//! [`compile`] turns a [`GraphDeclaration`] plus one resolved step per node
//! into a [`CompiledGraph`]: the unconditional schedule the executor follows
//! and the full edge list used for introspection.

use crate::config::{EdgeKind, GraphDeclaration};
use crate::error::WorkflowError;
use crate::registry::ResolvedSteps;
use amime_core::{Step, StepName};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

/// One declared edge, as seen by introspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeInfo {
    /// Source node.
    pub source: StepName,
    /// Target node.
    pub target: StepName,
    /// Declared kind.
    pub kind: EdgeKind,
    /// The edge's `kwargs`.
    pub metadata: Option<Map<String, Value>>,
    /// `true` unless the edge is part of the unconditional schedule.
    pub conditional: bool,
}

/// Unconditional successors of every node.
///
/// Ordered by node name; successors keep declaration order. Two schedules
/// compare equal exactly when they have the same transitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    successors: BTreeMap<StepName, Vec<StepName>>,
}

impl Schedule {
    /// Returns the unconditional successors of `name`.
    pub fn successors(&self, name: &str) -> &[StepName] {
        self.successors
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Iterates over `(node, successors)` pairs in node-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&StepName, &[StepName])> {
        self.successors
            .iter()
            .map(|(name, targets)| (name, targets.as_slice()))
    }

    /// Returns the number of transitions.
    pub fn transition_count(&self) -> usize {
        self.successors.values().map(Vec::len).sum()
    }

    fn add_node(&mut self, name: StepName) {
        self.successors.entry(name).or_default();
    }

    /// Adds `source -> target`; returns `false` if it was already present.
    fn add_transition(&mut self, source: &StepName, target: &StepName) -> bool {
        let targets = self.successors.entry(source.clone()).or_default();
        if targets.contains(target) {
            return false;
        }
        targets.push(target.clone());
        true
    }
}

/// Serializable view of a compiled graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphSummary {
    /// Traversal start.
    pub entry_point: StepName,
    /// Nodes in declaration order.
    pub nodes: Vec<StepName>,
    /// Edges in declaration order.
    pub edges: Vec<EdgeInfo>,
}

/// An executable graph. Immutable once compiled.
pub struct CompiledGraph {
    entry_point: StepName,
    nodes: Vec<StepName>,
    steps: HashMap<StepName, Box<dyn Step>>,
    schedule: Schedule,
    edges: Vec<EdgeInfo>,
}

impl fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("entry_point", &self.entry_point)
            .field("nodes", &self.nodes)
            .field("schedule", &self.schedule)
            .field("edges", &self.edges.len())
            .finish()
    }
}

impl CompiledGraph {
    /// Returns the node traversal starts at.
    pub fn entry_point(&self) -> &StepName {
        &self.entry_point
    }

    /// Returns the nodes in declaration order.
    pub fn nodes(&self) -> &[StepName] {
        &self.nodes
    }

    /// Returns every declared edge, unconditional and conditional.
    pub fn edges(&self) -> &[EdgeInfo] {
        &self.edges
    }

    /// Returns the unconditional schedule.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Returns the step bound to `name`.
    pub fn step(&self, name: &str) -> Option<&dyn Step> {
        self.steps.get(name).map(Box::as_ref)
    }

    /// Returns `true` if `name` is a node of this graph.
    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Sources of every edge (of any kind) that targets `name`.
    pub fn predecessors(&self, name: &str) -> Vec<&StepName> {
        self.edges
            .iter()
            .filter(|edge| edge.target == name)
            .map(|edge| &edge.source)
            .collect()
    }

    /// Targets of every edge (of any kind) that leaves `name`.
    pub fn successors(&self, name: &str) -> Vec<&StepName> {
        self.edges
            .iter()
            .filter(|edge| edge.source == name)
            .map(|edge| &edge.target)
            .collect()
    }

    /// Returns `true` if any edge runs from `source` to `target`.
    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        self.edges
            .iter()
            .any(|edge| edge.source == source && edge.target == target)
    }

    /// Returns a serializable snapshot of nodes and edges.
    pub fn summary(&self) -> GraphSummary {
        GraphSummary {
            entry_point: self.entry_point.clone(),
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }
}

/// Compiles a declaration against its resolved steps.
///
/// Validates the declaration, binds each node to its step (failing with
/// [`WorkflowError::UnresolvedStep`] when one is missing), schedules every
/// `always` edge once, and records all edges for introspection. No step is
/// invoked.
pub fn compile(
    declaration: &GraphDeclaration,
    mut resolved: ResolvedSteps,
) -> Result<CompiledGraph, WorkflowError> {
    declaration.validate()?;

    let mut nodes = Vec::with_capacity(declaration.nodes.len());
    let mut steps = HashMap::with_capacity(declaration.nodes.len());
    let mut schedule = Schedule::default();

    for node in &declaration.nodes {
        let name = StepName::new(node.name.as_str());
        let step = resolved
            .remove(&name)
            .ok_or_else(|| WorkflowError::UnresolvedStep(name.clone()))?;
        schedule.add_node(name.clone());
        steps.insert(name.clone(), step);
        nodes.push(name);
    }

    for unused in resolved.keys() {
        debug!(step = %unused, "Dropping resolved step with no declared node");
    }

    let mut edges = Vec::with_capacity(declaration.edges.len());
    for edge in &declaration.edges {
        let source = StepName::new(edge.source());
        let target = StepName::new(edge.target());
        let unconditional = edge.kind.is_unconditional();

        if unconditional && !schedule.add_transition(&source, &target) {
            debug!(%source, %target, "Collapsing duplicate unconditional edge");
            continue;
        }

        edges.push(EdgeInfo {
            source,
            target,
            kind: edge.kind.clone(),
            metadata: edge.kwargs.clone(),
            conditional: !unconditional,
        });
    }

    let entry_point = StepName::new(declaration.entry_point.as_str());
    debug!(
        entry_point = %entry_point,
        nodes = nodes.len(),
        transitions = schedule.transition_count(),
        edges = edges.len(),
        "Compiled graph"
    );

    Ok(CompiledGraph {
        entry_point,
        nodes,
        steps,
        schedule,
        edges,
    })
}
