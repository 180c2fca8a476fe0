//! `agentflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: check identities, path syntax and variable references.
//! - `annotate`: assign node IDs and derive labels, writing the annotated flow.
//! - `resolve`: print the node a path expression addresses.
//! - `run`: dry-run a flow against the echo agent and print the run report.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agents::EchoAgent;
use engine::{
    assign_identities, derive_names, resolve_path, BoundVariables, ExecutorConfig, FlowDefinition,
    FlowExecutor, InputSource, PathExpr, RunError, RunStatus, StepKind, WorkflowNode,
};

#[derive(Parser)]
#[command(name = "agentflow", about = "Nested agent workflow engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a flow definition JSON file.
    Validate {
        /// Path to the flow JSON file.
        path: PathBuf,
    },
    /// Assign IDs and derive labels, then write the annotated flow.
    Annotate {
        path: PathBuf,
        /// Output file; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the node addressed by a path expression, e.g. `$.input[0]`.
    Resolve { path: PathBuf, expr: String },
    /// Run a flow against the echo agent and print the run report.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    path: PathBuf,

    /// Variable value as `name=value`; the value is parsed as JSON when possible.
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, Value)>,

    /// JSON object of variable values. `--var` entries take precedence.
    #[arg(long)]
    vars_file: Option<PathBuf>,

    /// JSON executor configuration file.
    #[arg(long, env = "AGENTFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "AGENTFLOW_MAX_RETRIES")]
    max_retries: Option<u32>,

    #[arg(long, env = "AGENTFLOW_RETRY_BASE_DELAY_MS")]
    retry_base_delay_ms: Option<u64>,

    #[arg(long, env = "AGENTFLOW_MAX_LOOP_CONCURRENCY")]
    max_loop_concurrency: Option<usize>,

    #[arg(long, env = "AGENTFLOW_STEP_TIMEOUT_MS")]
    step_timeout_ms: Option<u64>,

    /// Print node transitions to stderr as they happen.
    #[arg(long)]
    progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => validate(&path),
        Command::Annotate { path, output } => annotate(&path, output.as_deref()),
        Command::Resolve { path, expr } => resolve(&path, &expr),
        Command::Run(args) => run(args).await,
    }
}

fn load_flow(path: &Path) -> Result<FlowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid flow JSON in {}", path.display()))
}

fn annotated(flow: FlowDefinition) -> Result<FlowDefinition> {
    let root = derive_names(assign_identities(flow.root)?);
    Ok(FlowDefinition { root, ..flow })
}

fn validate(path: &Path) -> Result<()> {
    let flow = load_flow(path)?;
    let problems = lint(&flow);
    for problem in &problems {
        eprintln!("{problem}");
    }
    if !problems.is_empty() {
        bail!("flow '{}' has {} problem(s)", flow.name, problems.len());
    }

    let flow = annotated(flow)?;
    let mut nodes = 0;
    flow.root.walk(&mut |_, _| nodes += 1);
    println!("flow '{}' is valid: {} node(s)", flow.name, nodes);
    Ok(())
}

fn annotate(path: &Path, output: Option<&Path>) -> Result<()> {
    let flow = annotated(load_flow(path)?)?;
    let json = serde_json::to_string_pretty(&flow)?;
    match output {
        Some(out) => {
            std::fs::write(out, json).with_context(|| format!("cannot write {}", out.display()))?;
            info!("annotated flow written to {}", out.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn resolve(path: &Path, expr: &str) -> Result<()> {
    let flow = annotated(load_flow(path)?)?;
    let node = resolve_path(&flow.root, expr)?;
    println!("{}", serde_json::to_string_pretty(node)?);
    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    let flow = load_flow(&args.path)?;
    let config = executor_config(&args)?;
    let variables = bind_variables(&flow, &args)?;

    let mut executor = FlowExecutor::new(Arc::new(EchoAgent), config);
    if args.progress {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        executor = executor.with_progress(tx);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&event) {
                    eprintln!("{line}");
                }
            }
        });
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    info!("running flow '{}'", flow.name);
    let report = match executor.execute(flow.root, &variables, cancel).await {
        Ok(report) => report,
        Err(RunError::Cancelled { report }) => *report,
        Err(err) => return Err(err.into()),
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    for failure in report.failures() {
        eprintln!(
            "{} ({}): {}",
            failure.path,
            failure.label.unwrap_or("-"),
            failure.error
        );
    }

    if report.status != RunStatus::Succeeded {
        std::process::exit(1);
    }
    Ok(())
}

/// File configuration (if any) overridden by flags and `AGENTFLOW_*` variables.
fn executor_config(args: &RunArgs) -> Result<ExecutorConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read config {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("invalid config in {}", path.display()))?
        }
        None => ExecutorConfig::default(),
    };

    if let Some(n) = args.max_retries {
        config.max_retries = n;
    }
    if let Some(ms) = args.retry_base_delay_ms {
        config.retry_base_delay_ms = ms;
    }
    if let Some(n) = args.max_loop_concurrency {
        config.max_loop_concurrency = n;
    }
    if args.step_timeout_ms.is_some() {
        config.default_step_timeout_ms = args.step_timeout_ms;
    }
    Ok(config)
}

fn bind_variables(flow: &FlowDefinition, args: &RunArgs) -> Result<BoundVariables> {
    let mut supplied = serde_json::Map::new();
    if let Some(path) = &args.vars_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read variables {}", path.display()))?;
        match serde_json::from_str(&content)? {
            Value::Object(values) => supplied.extend(values),
            _ => bail!("{} must contain a JSON object", path.display()),
        }
    }
    supplied.extend(args.vars.iter().cloned());
    Ok(BoundVariables::new(&flow.variables, supplied))
}

fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_owned()));
    Ok((name.trim().to_owned(), value))
}

// ---------------------------------------------------------------------------
// Static checks
// ---------------------------------------------------------------------------

/// Path syntax errors and references to undeclared variables, in tree order.
fn lint(flow: &FlowDefinition) -> Vec<String> {
    let declared: HashSet<&str> = flow.variables.iter().map(|v| v.name.as_str()).collect();
    let mut problems = Vec::new();

    if let Err(err) = assign_identities(flow.root.clone()) {
        problems.push(err.to_string());
    }

    flow.root.walk(&mut |path, node| {
        for (input, source) in sources(node) {
            match source {
                InputSource::Path { path: expr } => {
                    if let Err(err) = PathExpr::parse(expr).and_then(|e| e.to_node_path()) {
                        problems.push(format!("{path}: input '{input}': {err}"));
                    }
                }
                InputSource::Variable { name } if !declared.contains(name.as_str()) => {
                    problems.push(format!("{path}: input '{input}': undeclared variable '{name}'"));
                }
                _ => {}
            }
        }
    });

    problems
}

fn sources(node: &WorkflowNode) -> Vec<(&str, &InputSource)> {
    match &node.step {
        StepKind::Agent { inputs, .. } => inputs.iter().map(|(name, source)| (name.as_str(), source)).collect(),
        StepKind::Branch { condition, .. } => vec![("condition", condition)],
        StepKind::Loop { source, .. } => vec![("source", source)],
        StepKind::Sequence { .. } => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flow(doc: Value) -> FlowDefinition {
        serde_json::from_value(doc).unwrap()
    }

    #[test]
    fn var_values_parse_as_json_or_fall_back_to_strings() {
        assert_eq!(parse_var("limit=5").unwrap(), ("limit".to_owned(), json!(5)));
        assert_eq!(parse_var("q=hello world").unwrap(), ("q".to_owned(), json!("hello world")));
        assert_eq!(parse_var("flag=true").unwrap(), ("flag".to_owned(), json!(true)));
        assert!(parse_var("novalue").is_err());
    }

    #[test]
    fn lint_reports_bad_paths_and_undeclared_variables() {
        let flow = flow(json!({
            "name": "demo",
            "variables": [{ "name": "q", "type": "string" }],
            "root": {
                "stepKind": "sequence",
                "children": [
                    { "stepKind": "agent", "agent": "a",
                      "inputs": { "query": { "type": "variable", "name": "q" } } },
                    { "stepKind": "agent", "agent": "b",
                      "inputs": {
                          "text": { "type": "path", "path": "$.input[0" },
                          "mode": { "type": "variable", "name": "tone" }
                      } }
                ]
            }
        }));

        let problems = lint(&flow);
        assert_eq!(problems.len(), 2);
        assert!(problems[0].starts_with("$.input[1]: input 'text'"));
        assert!(problems[1].contains("undeclared variable 'tone'"));
    }

    #[test]
    fn lint_accepts_a_clean_flow() {
        let flow = flow(json!({
            "name": "ok",
            "root": {
                "stepKind": "loop",
                "source": { "type": "literal", "value": [1, 2] },
                "body": { "stepKind": "agent", "agent": "each",
                          "inputs": { "item": { "type": "element" } } }
            }
        }));
        assert!(lint(&flow).is_empty());
    }
}
