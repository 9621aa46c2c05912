use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use amime::{
    Execution, ExecutorConfig, Network, RetryPolicy, State, StepRegistry, DEFAULT_STEP_LIMIT,
};
use amime_steps::chat::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use amime_steps::{
    register_builtin_steps, BuiltinConfig, ChatModelConfig, Platform, DEFAULT_TEMPLATE_DIR,
    INPUT_DATA_KEY,
};

const INPUT_NOT_FOUND_EXIT: u8 = 2;
const OUTPUT_FILE: &str = "output.json";

#[derive(Parser, Debug)]
#[command(name = "amime", version, about = "Run a YAML-declared step graph")]
struct Cli {
    /// Graph document to compile and run
    #[arg(short, long, env = "AMIME_GRAPH", default_value = "networks/codenet/CodeNet.yaml")]
    graph: PathBuf,

    /// JSON input record, placed in the initial state under `input_data`
    #[arg(short, long, default_value = "inputs/data.json")]
    input_file: PathBuf,

    /// Directory the final state is written to
    #[arg(short, long, default_value = "outputs")]
    output_dir: PathBuf,

    /// Prompt template directory for the code generator
    #[arg(long, env = "AMIME_TEMPLATE_DIR", default_value = DEFAULT_TEMPLATE_DIR)]
    template_dir: PathBuf,

    /// Maximum number of step invocations per run
    #[arg(long, env = "AMIME_STEP_LIMIT", default_value_t = DEFAULT_STEP_LIMIT)]
    step_limit: usize,

    /// Print the compiled nodes and edges as JSON and exit
    #[arg(long)]
    inspect: bool,

    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Args, Debug)]
struct LlmArgs {
    /// Inference platform: openai, vllm or ollama
    #[arg(long, env = "AMIME_LLM_PLATFORM", default_value = "openai")]
    platform: Platform,

    /// Model name
    #[arg(long, env = "AMIME_LLM_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Maximum completion tokens
    #[arg(long, env = "AMIME_LLM_MAX_TOKENS", default_value_t = DEFAULT_MAX_TOKENS)]
    max_tokens: u32,

    /// Sampling temperature
    #[arg(long, env = "AMIME_LLM_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Nucleus sampling mass
    #[arg(long, env = "AMIME_LLM_TOP_P", default_value_t = 1.0)]
    top_p: f32,

    /// Stop sequences, comma separated
    #[arg(long, env = "AMIME_LLM_STOP", value_delimiter = ',')]
    stop: Vec<String>,

    /// API base URL (defaults per platform)
    #[arg(long, env = "AMIME_LLM_BASE_URL")]
    base_url: Option<String>,

    /// API key (OpenAI falls back to OPENAI_API_KEY)
    #[arg(long, env = "AMIME_LLM_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Retries for transient LLM failures
    #[arg(long, env = "AMIME_LLM_MAX_RETRIES", default_value_t = 5)]
    max_retries: u32,

    /// Per-request timeout in seconds
    #[arg(long, env = "AMIME_LLM_TIMEOUT_SECS", default_value_t = 120)]
    timeout_secs: u64,
}

impl Cli {
    fn builtin_config(&self) -> BuiltinConfig {
        let llm = &self.llm;
        BuiltinConfig {
            template_dir: self.template_dir.clone(),
            model: ChatModelConfig {
                platform: llm.platform,
                model: llm.model.clone(),
                max_tokens: llm.max_tokens,
                temperature: llm.temperature,
                top_p: llm.top_p,
                stop: llm.stop.clone(),
                base_url: llm.base_url.clone(),
                api_key: llm.api_key.clone(),
                timeout: Duration::from_secs(llm.timeout_secs),
            },
            retry: RetryPolicy::exponential(llm.max_retries, Duration::from_secs(1)),
        }
    }

    fn network_name(&self) -> String {
        self.graph
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("network")
            .to_string()
    }
}

#[derive(Error, Debug)]
#[error("Input file not found: {}", .0.display())]
struct InputNotFound(PathBuf);

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("amime=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if e.downcast_ref::<InputNotFound>().is_some() {
                ExitCode::from(INPUT_NOT_FOUND_EXIT)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let input = if cli.inspect {
        None
    } else {
        Some(read_input(&cli.input_file)?)
    };

    let mut registry = StepRegistry::new();
    register_builtin_steps(&mut registry, cli.builtin_config())?;

    let mut network = Network::from_path(cli.network_name(), &cli.graph, Arc::new(registry))
        .with_executor_config(ExecutorConfig {
            step_limit: cli.step_limit,
        });
    network
        .compile()
        .with_context(|| format!("Failed to compile graph '{}'", cli.graph.display()))?;

    let Some(input) = input else {
        let summary = network.nodes_edges()?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    };

    let mut state = State::new();
    state.insert(INPUT_DATA_KEY, input);
    let execution = network.run(state).await?;

    let path = write_output(&cli.output_dir, &execution)?;
    info!(path = %path.display(), steps = execution.steps_executed.len(), "Output saved");
    println!("Output saved to {}", path.display());
    Ok(())
}

fn read_input(path: &Path) -> anyhow::Result<Value> {
    if !path.exists() {
        return Err(InputNotFound(path.to_path_buf()).into());
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file '{}'", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Input file '{}' is not valid JSON", path.display()))
}

/// The final state, or one state per branch when the run fanned out.
fn output_value(execution: &Execution) -> Value {
    if execution.is_fan_out() {
        Value::Array(
            execution
                .terminals
                .iter()
                .map(|terminal| Value::from(terminal.state.clone()))
                .collect(),
        )
    } else {
        execution
            .final_state()
            .cloned()
            .map(Value::from)
            .unwrap_or(Value::Null)
    }
}

fn write_output(dir: &Path, execution: &Execution) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory '{}'", dir.display()))?;

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    output_value(execution).serialize(&mut serializer)?;

    let path = dir.join(OUTPUT_FILE);
    fs::write(&path, buf).with_context(|| format!("Failed to write '{}'", path.display()))?;
    Ok(path)
}
