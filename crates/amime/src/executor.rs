//! Execution engine: walks a compiled graph over a shared state.

use crate::graph::CompiledGraph;
use crate::WorkflowError;
use amime_core::{State, StepName, StepOutput};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Default maximum number of step invocations per run.
pub const DEFAULT_STEP_LIMIT: usize = 25;

/// Settings for [`Executor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum number of step invocations in one run, across all branches.
    pub step_limit: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }
}

/// The state a branch ended with.
#[derive(Debug, Clone, PartialEq)]
pub struct Terminal {
    /// The last step the branch ran.
    pub step_name: StepName,
    /// The branch's final state.
    pub state: State,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    /// One entry per branch, in the order branches finished.
    pub terminals: Vec<Terminal>,
    /// Steps in the order they were invoked.
    pub steps_executed: Vec<StepName>,
}

impl Execution {
    /// Returns the final state of the last branch to finish.
    ///
    /// For a graph without fan-out this is the only final state.
    pub fn final_state(&self) -> Option<&State> {
        self.terminals.last().map(|terminal| &terminal.state)
    }

    /// Consumes the execution and returns the last branch's final state.
    pub fn into_final_state(self) -> Option<State> {
        self.terminals.into_iter().last().map(|terminal| terminal.state)
    }

    /// Returns `true` if the run split into more than one branch.
    pub fn is_fan_out(&self) -> bool {
        self.terminals.len() > 1
    }
}

enum Hop {
    Stop,
    Advance(StepName),
    FanOut(Vec<StepName>),
}

/// Runs a [`CompiledGraph`].
///
/// Steps are invoked one at a time. When a step has several unconditional
/// successors, each branch gets its own copy of the state and branches run
/// depth-first in declaration order. A failing step aborts the whole run;
/// the engine never retries.
#[derive(Debug)]
pub struct Executor<'g> {
    graph: &'g CompiledGraph,
    config: ExecutorConfig,
}

impl<'g> Executor<'g> {
    /// Creates an executor with the default configuration.
    pub fn new(graph: &'g CompiledGraph) -> Self {
        Self {
            graph,
            config: ExecutorConfig::default(),
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs the graph from its entry point.
    pub async fn run(&self, state: State) -> Result<Execution, WorkflowError> {
        let started = Instant::now();
        let mut pending = vec![(self.graph.entry_point().clone(), state)];
        let mut terminals = Vec::new();
        let mut steps_executed = Vec::new();

        while let Some((mut current, mut state)) = pending.pop() {
            loop {
                if steps_executed.len() >= self.config.step_limit {
                    warn!(step = %current, limit = self.config.step_limit, "Step limit reached");
                    return Err(WorkflowError::StepLimitExceeded {
                        limit: self.config.step_limit,
                        step_name: current,
                    });
                }

                let step = self
                    .graph
                    .step(current.as_str())
                    .ok_or_else(|| WorkflowError::UnresolvedStep(current.clone()))?;

                debug!(step = %current, "Invoking step");
                let snapshot = state.clone();
                let output = match step.invoke(&mut state).await {
                    Ok(output) => output,
                    Err(source) => {
                        warn!(step = %current, error = %source, "Step failed");
                        return Err(WorkflowError::StepExecution {
                            step_name: current,
                            source,
                            state: Box::new(snapshot),
                        });
                    }
                };
                info!("Step '{}' completed successfully", current);
                steps_executed.push(current.clone());

                match self.next_hop(&current, output)? {
                    Hop::Stop => {
                        debug!(step = %current, "Branch terminated");
                        terminals.push(Terminal {
                            step_name: current,
                            state,
                        });
                        break;
                    }
                    Hop::Advance(next) => current = next,
                    Hop::FanOut(mut branches) => {
                        debug!(step = %current, branches = branches.len(), "Fanning out");
                        let first = branches.remove(0);
                        for branch in branches.into_iter().rev() {
                            pending.push((branch, state.clone()));
                        }
                        current = first;
                    }
                }
            }
        }

        info!(
            steps = steps_executed.len(),
            branches = terminals.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run completed"
        );
        Ok(Execution {
            terminals,
            steps_executed,
        })
    }

    fn next_hop(&self, current: &StepName, output: StepOutput) -> Result<Hop, WorkflowError> {
        match output {
            StepOutput::End => Ok(Hop::Stop),
            StepOutput::Route(target) => {
                if self.graph.has_edge(current.as_str(), target.as_str()) {
                    Ok(Hop::Advance(target))
                } else {
                    Err(WorkflowError::InvalidRoute {
                        from: current.clone(),
                        to: target,
                    })
                }
            }
            StepOutput::Next => match self.graph.schedule().successors(current.as_str()) {
                [] => Ok(Hop::Stop),
                [next] => Ok(Hop::Advance(next.clone())),
                many => Ok(Hop::FanOut(many.to_vec())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EdgeDeclaration, GraphDeclaration};
    use crate::graph::compile;
    use crate::registry::ResolvedSteps;
    use amime_core::{Step, StepError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    type Trace = Arc<Mutex<Vec<String>>>;

    /// Records its name in the trace and sets `<name>` to the number of keys
    /// it saw.
    #[derive(Debug)]
    struct RecordingStep {
        name: StepName,
        trace: Trace,
    }

    #[async_trait]
    impl Step for RecordingStep {
        async fn invoke(&self, state: &mut State) -> Result<StepOutput, StepError> {
            if let Ok(mut trace) = self.trace.lock() {
                trace.push(self.name.to_string());
            }
            let seen = state.len();
            state.insert(self.name.as_str(), seen);
            Ok(StepOutput::next())
        }

        fn name(&self) -> &StepName {
            &self.name
        }
    }

    #[derive(Debug)]
    struct FailureStep {
        name: StepName,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Step for FailureStep {
        async fn invoke(&self, state: &mut State) -> Result<StepOutput, StepError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            state.insert("partial", true);
            Err(StepError::retryable("Intentional failure"))
        }

        fn name(&self) -> &StepName {
            &self.name
        }
    }

    #[derive(Debug)]
    struct OutputStep {
        name: StepName,
        output: StepOutput,
    }

    #[async_trait]
    impl Step for OutputStep {
        async fn invoke(&self, state: &mut State) -> Result<StepOutput, StepError> {
            state.insert(self.name.as_str(), true);
            Ok(self.output.clone())
        }

        fn name(&self) -> &StepName {
            &self.name
        }
    }

    fn recording(declaration: &GraphDeclaration, trace: &Trace) -> ResolvedSteps {
        declaration
            .nodes
            .iter()
            .map(|node| {
                let name = StepName::new(node.name.as_str());
                let step: Box<dyn Step> = Box::new(RecordingStep {
                    name: name.clone(),
                    trace: Arc::clone(trace),
                });
                (name, step)
            })
            .collect()
    }

    fn chain() -> GraphDeclaration {
        GraphDeclaration::new("A")
            .with_node("A")
            .with_node("B")
            .with_node("C")
            .with_edge(EdgeDeclaration::always("A", "B"))
            .with_edge(EdgeDeclaration::always("B", "C"))
    }

    fn names(steps: &[StepName]) -> Vec<&str> {
        steps.iter().map(StepName::as_str).collect()
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let trace = Trace::default();
        let declaration = chain();
        let graph = compile(&declaration, recording(&declaration, &trace)).expect("compiles");

        let mut state = State::new();
        state.insert("x", 1);
        let execution = Executor::new(&graph).run(state).await.expect("run succeeds");

        assert_eq!(names(&execution.steps_executed), vec!["A", "B", "C"]);
        assert_eq!(*trace.lock().expect("trace lock"), vec!["A", "B", "C"]);
        assert!(!execution.is_fan_out());

        let state = execution.final_state().expect("one terminal");
        assert_eq!(state.get("x"), Some(&json!(1)));
        assert_eq!(state.get("A"), Some(&json!(1)));
        assert_eq!(state.get("B"), Some(&json!(2)));
        assert_eq!(state.get("C"), Some(&json!(3)));
        assert_eq!(execution.terminals[0].step_name, "C");
    }

    #[tokio::test]
    async fn test_node_without_successors_terminates() {
        let trace = Trace::default();
        let declaration = GraphDeclaration::new("Solo").with_node("Solo");
        let graph = compile(&declaration, recording(&declaration, &trace)).expect("compiles");

        let execution = Executor::new(&graph)
            .run(State::new())
            .await
            .expect("run succeeds");
        assert_eq!(names(&execution.steps_executed), vec!["Solo"]);
        assert_eq!(
            execution.into_final_state().and_then(|s| s.get("Solo").cloned()),
            Some(json!(0))
        );
    }

    #[tokio::test]
    async fn test_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let trace = Trace::default();
        let declaration = chain();
        let mut resolved = recording(&declaration, &trace);
        resolved.insert(
            StepName::new("B"),
            Box::new(FailureStep {
                name: StepName::new("B"),
                calls: Arc::clone(&calls),
            }),
        );
        let graph = compile(&declaration, resolved).expect("compiles");

        let result = Executor::new(&graph).run(State::new()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*trace.lock().expect("trace lock"), vec!["A"]);
        match result {
            Err(WorkflowError::StepExecution {
                step_name,
                source,
                state,
            }) => {
                assert_eq!(step_name, "B");
                assert!(source.is_retryable());
                assert_eq!(source.to_string(), "Intentional failure");
                assert_eq!(state.get("A"), Some(&json!(0)));
                assert!(!state.contains_key("partial"));
            }
            other => panic!("Unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_route_follows_declared_conditional_edge() {
        let declaration = GraphDeclaration::new("Check")
            .with_node("Check")
            .with_node("Fix")
            .with_node("Ship")
            .with_edge(EdgeDeclaration::always("Check", "Ship"))
            .with_edge(EdgeDeclaration::new("Check", "Fix", "conditional"));
        let mut resolved = ResolvedSteps::new();
        for (name, output) in [
            ("Check", StepOutput::route("Fix")),
            ("Fix", StepOutput::next()),
            ("Ship", StepOutput::next()),
        ] {
            resolved.insert(
                StepName::new(name),
                Box::new(OutputStep {
                    name: StepName::new(name),
                    output,
                }),
            );
        }
        let graph = compile(&declaration, resolved).expect("compiles");

        let execution = Executor::new(&graph)
            .run(State::new())
            .await
            .expect("run succeeds");
        assert_eq!(names(&execution.steps_executed), vec!["Check", "Fix"]);
        let state = execution.final_state().expect("one terminal");
        assert!(!state.contains_key("Ship"));
    }

    #[tokio::test]
    async fn test_route_to_undeclared_successor_fails() {
        let declaration = GraphDeclaration::new("A").with_node("A").with_node("B");
        let mut resolved = ResolvedSteps::new();
        resolved.insert(
            StepName::new("A"),
            Box::new(OutputStep {
                name: StepName::new("A"),
                output: StepOutput::route("B"),
            }),
        );
        resolved.insert(
            StepName::new("B"),
            Box::new(OutputStep {
                name: StepName::new("B"),
                output: StepOutput::next(),
            }),
        );
        let graph = compile(&declaration, resolved).expect("compiles");

        let result = Executor::new(&graph).run(State::new()).await;
        assert!(matches!(
            result,
            Err(WorkflowError::InvalidRoute { ref from, ref to }) if from == "A" && to == "B"
        ));
    }

    #[tokio::test]
    async fn test_end_stops_before_successors() {
        let declaration = chain();
        let mut resolved = ResolvedSteps::new();
        for (name, output) in [
            ("A", StepOutput::done()),
            ("B", StepOutput::next()),
            ("C", StepOutput::next()),
        ] {
            resolved.insert(
                StepName::new(name),
                Box::new(OutputStep {
                    name: StepName::new(name),
                    output,
                }),
            );
        }
        let graph = compile(&declaration, resolved).expect("compiles");

        let execution = Executor::new(&graph)
            .run(State::new())
            .await
            .expect("run succeeds");
        assert_eq!(names(&execution.steps_executed), vec!["A"]);
    }

    #[tokio::test]
    async fn test_fan_out_gives_each_branch_its_own_state() {
        let trace = Trace::default();
        let declaration = GraphDeclaration::new("Root")
            .with_node("Root")
            .with_node("Left")
            .with_node("Right")
            .with_node("Leaf")
            .with_edge(EdgeDeclaration::always("Root", "Left"))
            .with_edge(EdgeDeclaration::always("Root", "Right"))
            .with_edge(EdgeDeclaration::always("Left", "Leaf"));
        let graph = compile(&declaration, recording(&declaration, &trace)).expect("compiles");

        let execution = Executor::new(&graph)
            .run(State::new())
            .await
            .expect("run succeeds");

        assert!(execution.is_fan_out());
        assert_eq!(
            names(&execution.steps_executed),
            vec!["Root", "Left", "Leaf", "Right"]
        );
        let left = &execution.terminals[0];
        let right = &execution.terminals[1];
        assert_eq!(left.step_name, "Leaf");
        assert_eq!(right.step_name, "Right");
        assert!(left.state.contains_key("Left"));
        assert!(!right.state.contains_key("Left"));
        assert_eq!(right.state.get("Right"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_cycle_hits_step_limit() {
        let trace = Trace::default();
        let declaration = GraphDeclaration::new("Ping")
            .with_node("Ping")
            .with_node("Pong")
            .with_edge(EdgeDeclaration::always("Ping", "Pong"))
            .with_edge(EdgeDeclaration::always("Pong", "Ping"));
        let graph = compile(&declaration, recording(&declaration, &trace)).expect("compiles");

        let result = Executor::new(&graph)
            .with_config(ExecutorConfig { step_limit: 5 })
            .run(State::new())
            .await;

        assert!(matches!(
            result,
            Err(WorkflowError::StepLimitExceeded { limit: 5, ref step_name }) if step_name == "Pong"
        ));
        assert_eq!(trace.lock().expect("trace lock").len(), 5);
    }
}
