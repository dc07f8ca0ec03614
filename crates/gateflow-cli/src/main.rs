//! gateflow CLI: run, validate and explain pipelines.

mod logging;

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use gateflow_core::config::EngineConfig;
use gateflow_core::graph::Graph;
use gateflow_core::run::{RunResult, RunStatus};
use gateflow_exec::{AbortHandle, Engine, RunMetrics};
use gateflow_planner::{
    build_definition, explain, parse_yaml_pipeline, ExplainLevel, PipelineDefaults,
};
use gateflow_warehouse::{Fixture, ObjectStoreCredentials, StaticProvider, Warehouse};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "gateflow")]
#[command(about = "Batch ETL orchestration: staged loads gated by data-quality checks", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one run of a pipeline against an in-memory warehouse
    Run {
        /// Path to the pipeline YAML file
        #[arg(short, long)]
        pipeline: PathBuf,

        /// JSON fixture seeding the in-memory warehouse and object store
        #[arg(short, long)]
        fixtures: PathBuf,

        /// Schedule tick in ms since the Unix epoch (defaults to now)
        #[arg(long)]
        scheduled_at: Option<u64>,

        #[command(flatten)]
        overrides: Overrides,

        /// Print the run record and metrics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Parse and compile a pipeline without running it
    Validate {
        #[arg(short, long)]
        pipeline: PathBuf,
    },

    /// Show execution levels (and optionally statements) for a pipeline
    Explain {
        #[arg(short, long)]
        pipeline: PathBuf,

        /// Include the statements each node would issue
        #[arg(long)]
        statements: bool,
    },
}

/// Flags that take precedence over the environment and the pipeline file.
#[derive(clap::Args, Debug, Default)]
struct Overrides {
    /// Maximum concurrently running attempts
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Delay between attempts in ms
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Per-attempt timeout in ms
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Keep running independent branches after a permanent failure
    #[arg(long)]
    no_fail_fast: bool,
}

fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let outcome = match cli.command {
        Commands::Run {
            pipeline,
            fixtures,
            scheduled_at,
            overrides,
            json,
        } => run_pipeline(&pipeline, &fixtures, scheduled_at, &overrides, json),
        Commands::Validate { pipeline } => validate_pipeline(&pipeline),
        Commands::Explain {
            pipeline,
            statements,
        } => explain_pipeline(&pipeline, statements),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Environment, then the document's `defaults:`, then CLI flags.
fn effective_config(defaults: &PipelineDefaults, overrides: &Overrides) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    apply_pipeline_config(&mut config, defaults);
    apply_overrides(&mut config, overrides);
    config
}

fn apply_pipeline_config(cfg: &mut EngineConfig, defaults: &PipelineDefaults) {
    defaults.apply_to(cfg);
}

fn apply_overrides(cfg: &mut EngineConfig, o: &Overrides) {
    if let Some(n) = o.max_parallel {
        cfg.max_parallel_tasks = n;
    }
    if let Some(ms) = o.retry_delay_ms {
        cfg.default_retry_delay_ms = ms;
    }
    if let Some(ms) = o.timeout_ms {
        cfg.default_task_timeout_ms = Some(ms);
    }
    if o.no_fail_fast {
        cfg.fail_fast = false;
    }
}

fn load_graph(
    pipeline_path: &PathBuf,
    overrides: &Overrides,
) -> Result<(Graph, EngineConfig), Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(pipeline_path)?;
    let doc = parse_yaml_pipeline(&yaml_content)?;
    let config = effective_config(&doc.defaults, overrides);
    let graph = build_definition(&doc, &config)?.compile()?;
    Ok((graph, config))
}

/// Register `wh` under every warehouse connection id the graph uses, and
/// simulated keys under every object-store id.
fn simulated_provider(graph: &Graph, wh: Arc<dyn Warehouse>) -> StaticProvider {
    let keys = ObjectStoreCredentials::from_env()
        .unwrap_or_else(|| ObjectStoreCredentials::new("simulated", "simulated"));
    let mut provider = StaticProvider::new();
    let wh_conns: BTreeSet<&str> = graph.nodes().iter().map(|n| n.warehouse_conn.as_str()).collect();
    for conn in wh_conns {
        provider = provider.with_warehouse(conn, Arc::clone(&wh));
    }
    let os_conns: BTreeSet<&str> = graph
        .nodes()
        .iter()
        .filter_map(|n| n.object_store_conn.as_deref())
        .collect();
    for conn in os_conns {
        provider = provider.with_object_store(conn, keys.clone());
    }
    provider
}

fn run_pipeline(
    pipeline_path: &PathBuf,
    fixtures_path: &PathBuf,
    scheduled_at: Option<u64>,
    overrides: &Overrides,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (graph, config) = load_graph(pipeline_path, overrides)?;
    let fixture = Fixture::from_json(&fs::read_to_string(fixtures_path)?)?;
    let provider = simulated_provider(&graph, Arc::new(fixture.build()));

    let scheduled_at = scheduled_at.unwrap_or_else(now_millis);
    let engine = Engine::new(config, Arc::new(provider));
    let rt = tokio::runtime::Runtime::new()?;
    let abort = AbortHandle::new();
    let result = rt.block_on(async {
        let on_signal = abort.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, aborting run");
                on_signal.abort();
            }
        });
        engine.run_with_abort(&graph, scheduled_at, &abort).await
    })?;

    if result.status() == RunStatus::Succeeded {
        info!(run_id = %result.run.id, pipeline = %pipeline_path.display(), "run succeeded");
    } else {
        error!(
            run_id = %result.run.id,
            pipeline = %pipeline_path.display(),
            aborted = result.aborted,
            failures = result.failures().len(),
            "run failed"
        );
    }

    let metrics = RunMetrics::from_result(&result);
    if json {
        let doc = serde_json::json!({ "result": result, "metrics": metrics });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        print_report(&result, &metrics);
    }

    if result.status() != RunStatus::Succeeded {
        return Err(format!("run {} failed", result.run.id).into());
    }
    Ok(())
}

fn print_report(result: &RunResult, metrics: &RunMetrics) {
    let status = if result.status() == RunStatus::Succeeded {
        "✓ succeeded"
    } else if result.aborted {
        "✗ aborted"
    } else {
        "✗ failed"
    };
    println!("Run {} {status}", result.run.id);
    println!(
        "  Duration: {}ms, graph {}",
        result.manifest.duration_ms(),
        result.manifest.graph_hash.short()
    );
    println!(
        "  Attempts: {} ({} retries)",
        metrics.attempts, metrics.retries
    );
    println!();
    for inst in result.run.latest().into_values() {
        let took = inst
            .duration_ms()
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<32} #{:<2} {:<15} {took}",
            inst.node_id.as_str(),
            inst.attempt,
            inst.status.to_string()
        );
        if let Some(err) = &inst.last_error {
            println!("      {err}");
        }
    }
}

fn validate_pipeline(pipeline_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let (graph, _) = load_graph(pipeline_path, &Overrides::default())?;
    println!(
        "✓ Pipeline is valid ({} nodes, {} edges)",
        graph.len(),
        graph.edges().len()
    );
    Ok(())
}

fn explain_pipeline(
    pipeline_path: &PathBuf,
    statements: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(pipeline_path)?;
    let doc = parse_yaml_pipeline(&yaml_content)?;
    let config = effective_config(&doc.defaults, &Overrides::default());
    let graph = build_definition(&doc, &config)?.compile()?;

    println!("Pipeline: {}", doc.name);
    if let Some(desc) = &doc.description {
        println!("  {desc}");
    }
    println!("Schedule: {}", doc.schedule);
    println!("Graph: {}", graph.fingerprint()?.short());
    println!();
    let level = if statements {
        ExplainLevel::Statements
    } else {
        ExplainLevel::Levels
    };
    print!("{}", explain(&graph, level));
    Ok(())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
