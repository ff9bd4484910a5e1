use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stepgraph_core::config::AppConfig;
use stepgraph_core::event::{EventBus, RunEvent};
use stepgraph_core::graph::GraphDefinition;
use stepgraph_core::types::{RunState, RunStatus, WorkflowRun};
use stepgraph_engine::validation::{unbound_functions, validate_graph};
use stepgraph_engine::{sample, RunDispatcher, WorkflowEngine};

const DEFAULT_CONFIG: &str = "stepgraph.toml";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Parser)]
#[command(name = "stepgraph", version, about = "Run conditional workflow graphs")]
struct Cli {
    /// Path to config file (defaults to ./stepgraph.toml when present)
    #[arg(short, long, env = "STEPGRAPH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the built-in code review workflow
    Demo {
        /// Initial state as a JSON object
        #[arg(long)]
        state: Option<String>,
    },
    /// Run a graph file against the built-in sample functions
    Run {
        /// Graph definition (JSON)
        graph: PathBuf,
        /// Initial state as a JSON object
        #[arg(long)]
        state: Option<String>,
    },
    /// Check a graph file for structural problems
    Check {
        /// Graph definition (JSON)
        graph: PathBuf,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "stepgraph", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Demo { state } => {
            let host = build_engine(&config);
            sample::register_code_review(&host.engine)?;
            let run = execute(&host, sample::CODE_REVIEW_GRAPH_ID, parse_state(state)?).await?;
            report(&run)
        }
        Commands::Run { graph, state } => {
            let definition = read_graph(&graph)?;
            let graph_id = definition.id.clone();
            let host = build_engine(&config);
            sample::register_code_review_functions(&host.engine);
            host.engine.register_graph(definition)?;
            let run = execute(&host, &graph_id, parse_state(state)?).await?;
            report(&run)
        }
        Commands::Check { graph } => {
            let definition = read_graph(&graph)?;
            let issues = validate_graph(&definition);

            let host = build_engine(&config);
            sample::register_code_review_functions(&host.engine);
            for name in unbound_functions(&definition, &host.engine.function_names()) {
                warn!(function = %name, "Not a built-in function; `run` will fail at this node");
            }

            if issues.is_empty() {
                println!(
                    "{}: ok ({} nodes, {} edges)",
                    definition.id,
                    definition.nodes.len(),
                    definition.edges.len()
                );
                return Ok(());
            }
            for issue in &issues {
                println!("{}: {}", definition.id, issue);
            }
            bail!("{} issue(s) found in {}", issues.len(), graph.display());
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Completions { .. } => Ok(()),
    }
}

/// Engine plus the event bus it publishes to.
struct Host {
    engine: Arc<WorkflowEngine>,
    events: Arc<EventBus>,
}

fn build_engine(config: &AppConfig) -> Host {
    let events = Arc::new(EventBus::new(config.engine.event_capacity));
    let engine = WorkflowEngine::new(config.engine.clone()).with_event_bus(Arc::clone(&events));
    Host {
        engine: Arc::new(engine),
        events,
    }
}

/// Start a run in the background and poll it to completion, echoing progress.
async fn execute(host: &Host, graph_id: &str, state: RunState) -> anyhow::Result<WorkflowRun> {
    let mut rx = host.events.subscribe();
    let progress = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if let RunEvent::NodeEntered { step, node_id, .. } = &event {
                eprintln!("[step {}] {}", step, node_id);
            }
            if event.terminal_status().is_some() {
                break;
            }
        }
    });

    let dispatcher = RunDispatcher::new(Arc::clone(&host.engine));
    let (pending, driver) = dispatcher.start_run(graph_id, state)?;
    info!(run_id = %pending.run_id, graph_id, "Run started");

    let run = dispatcher
        .wait_for_terminal(&pending.run_id, driver, POLL_INTERVAL)
        .await?;
    if tokio::time::timeout(Duration::from_secs(1), progress).await.is_err() {
        warn!("Progress listener did not finish");
    }
    Ok(run)
}

fn report(run: &WorkflowRun) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(run)?);
    if run.status == RunStatus::Failed {
        bail!(
            "run {} failed: {}",
            run.run_id,
            run.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<AppConfig> {
    if let Some(path) = explicit {
        return AppConfig::load(path).with_context(|| format!("loading {}", path.display()));
    }
    let default = Path::new(DEFAULT_CONFIG);
    if default.exists() {
        return AppConfig::load(default).with_context(|| format!("loading {}", DEFAULT_CONFIG));
    }
    Ok(AppConfig::default())
}

fn read_graph(path: &Path) -> anyhow::Result<GraphDefinition> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading graph file {}", path.display()))?;
    GraphDefinition::from_json(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn parse_state(raw: Option<String>) -> anyhow::Result<RunState> {
    let Some(raw) = raw else {
        return Ok(RunState::new());
    };
    let value: serde_json::Value = serde_json::from_str(&raw).context("parsing --state")?;
    match RunState::from_value(value) {
        Some(state) => Ok(state),
        None => bail!("--state must be a JSON object"),
    }
}
