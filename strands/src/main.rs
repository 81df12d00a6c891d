//! Strands binary: operator CLI and the controller loop.
//!
//! Exit codes: 0 success, 1 configuration error, 2 runtime error,
//! 3 upstream unavailable.

use anyhow::Context;
use clap::{Parser, Subcommand};
use strands::controller::{FrozenPipeline, IncidentController, Stores, SYSTEM_IDENTITY};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use strands_adapters::generator::{HttpTextGenerator, StaticGenerator, TextGenerator};
use strands_adapters::graph::{GraphStore, HttpGraphStore, MemoryGraphStore};
use strands_adapters::kube::{ClusterIntrospection, HttpClusterIntrospection, StaticCluster};
use strands_adapters::metrics_source::{MetricsSource, PrometheusSource, StaticMetricsSource};
use strands_adapters::vector::{HttpVectorStore, MemoryVectorStore, VectorStore};
use strands_core::audit::AuditLogger;
use strands_core::config::StrandsConfig;
use strands_core::types::IdGen;
use strands_governance::playbook::PlaybookStore;
use strands_core::model::playbook::PlaybookStatus;
use strands_replay::engine::{ReplayEngine, ReplayMode};
use strands_replay::ledger;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[clap(name = "strands", version, about = "Autonomous incident-response platform")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit JSON logs
    #[clap(long, env = "STRANDS_LOG_JSON")]
    log_json: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the controller loop
    Run {
        /// Validate wiring and exit before the first tick
        #[clap(long)]
        dry_run: bool,
    },
    /// Replay a recorded event ledger, or generate a synthetic one
    Replay {
        /// JSON-lines events file
        events_file: Option<PathBuf>,
        #[clap(long, value_parser = parse_mode, default_value = "validation")]
        mode: ReplayMode,
        /// Seed for deterministic ids
        #[clap(long, default_value_t = 0)]
        seed: u64,
        /// Generate N synthetic events instead of replaying
        #[clap(long)]
        generate: Option<usize>,
        /// Output path for --generate
        #[clap(long)]
        out: Option<PathBuf>,
    },
    /// Load and validate the configuration
    ValidateConfig,
    /// Inspect and curate playbooks
    Playbook {
        #[clap(subcommand)]
        action: PlaybookAction,
    },
    /// Probe the configured upstreams
    Health,
}

#[derive(Debug, Subcommand)]
enum PlaybookAction {
    /// List all playbooks
    List,
    /// Show one playbook as JSON
    Show { id: Uuid },
    /// Approve a pending playbook
    Approve {
        id: Uuid,
        #[clap(long)]
        reviewer: String,
    },
    /// Reject a pending playbook
    Reject {
        id: Uuid,
        #[clap(long)]
        reviewer: String,
        #[clap(long)]
        reason: String,
    },
}

fn parse_mode(s: &str) -> Result<ReplayMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "validation" => Ok(ReplayMode::Validation),
        "training" => Ok(ReplayMode::Training),
        "simulation" => Ok(ReplayMode::Simulation),
        "audit" => Ok(ReplayMode::Audit),
        _ => Err(format!("unknown replay mode '{s}'")),
    }
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = cli
        .log_level
        .parse::<tracing::Level>()
        .context("invalid log level")?;

    if cli.log_json {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .with(
                tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .with(
                tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
            )
            .init();
    }
    Ok(())
}

/// Build adapters from the configured endpoints. Empty endpoints fall back
/// to the in-memory implementations, which keeps dry runs and local replay
/// hermetic.
fn build_stores(config: &StrandsConfig) -> anyhow::Result<Stores> {
    let timeout = Duration::from_secs(config.adapters.timeout_s);

    let graph: Arc<dyn GraphStore> = if config.adapters.graph_url.is_empty() {
        Arc::new(MemoryGraphStore::new())
    } else {
        Arc::new(HttpGraphStore::new(&config.adapters.graph_url, timeout)?)
    };
    let vectors: Arc<dyn VectorStore> = if config.adapters.vector_url.is_empty() {
        Arc::new(MemoryVectorStore::new())
    } else {
        Arc::new(HttpVectorStore::new(&config.adapters.vector_url, timeout)?)
    };
    let metrics_source: Arc<dyn MetricsSource> = if config.adapters.metrics_url.is_empty() {
        Arc::new(StaticMetricsSource::new())
    } else {
        Arc::new(PrometheusSource::new(&config.adapters.metrics_url, timeout)?)
    };
    let generator: Arc<dyn TextGenerator> = if config.adapters.generator_url.is_empty() {
        Arc::new(StaticGenerator::new())
    } else {
        Arc::new(HttpTextGenerator::new(
            &config.adapters.generator_url,
            timeout,
        )?)
    };
    // Cluster introspection rides on the metrics endpoint's cluster proxy
    // when configured; otherwise the static view.
    let cluster_api: Arc<dyn ClusterIntrospection> = match std::env::var("CLUSTER_URL") {
        Ok(url) if !url.is_empty() => Arc::new(HttpClusterIntrospection::new(&url, timeout)?),
        _ => Arc::new(StaticCluster::new()),
    };

    Ok(Stores {
        graph,
        vectors,
        metrics_source,
        cluster_api,
        generator,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli) {
        eprintln!("failed to initialize logging: {e:#}");
        return ExitCode::from(1);
    }

    let config = match StrandsConfig::from_env().and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration invalid");
            return ExitCode::from(1);
        }
    };

    match run_command(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::from(2)
        }
    }
}

async fn run_command(command: Command, config: StrandsConfig) -> anyhow::Result<ExitCode> {
    match command {
        Command::Run { dry_run } => {
            let stores = build_stores(&config)?;
            let audit = Arc::new(AuditLogger::open(&config.audit_path)?);
            let controller =
                IncidentController::new(config, stores, audit, IdGen::random())?;
            if dry_run {
                info!("dry run: wiring validated, exiting");
                return Ok(ExitCode::SUCCESS);
            }
            controller.run().await?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Replay {
            events_file,
            mode,
            seed,
            generate,
            out,
        } => {
            if let Some(count) = generate {
                let out = out.context("--generate requires --out")?;
                let events = ledger::generate_dataset(count, seed);
                ledger::save_events(&out, &events)?;
                info!(count, path = %out.display(), "synthetic ledger written");
                return Ok(ExitCode::SUCCESS);
            }

            let events_file = events_file.context("an events file is required")?;
            let events = ledger::load_events(&events_file)?;
            let stores = build_stores(&config)?;
            let pipeline = FrozenPipeline::new(&config, &stores, seed);
            let report = ReplayEngine::new().replay(&events, mode, &pipeline).await?;

            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.passed {
                error!(
                    unsafe_bypasses = report.unsafe_bypass_count,
                    "replay validation FAILED"
                );
                return Ok(ExitCode::from(2));
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::ValidateConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            info!("configuration valid");
            Ok(ExitCode::SUCCESS)
        }

        Command::Playbook { action } => {
            let stores = build_stores(&config)?;
            let audit = Arc::new(AuditLogger::open(&config.audit_path)?);
            let store = PlaybookStore::new(stores.graph.clone(), audit);
            run_playbook_action(&store, action).await
        }

        Command::Health => {
            let stores = build_stores(&config)?;
            let mut failed = false;
            for (name, result) in [
                ("graph", stores.graph.health_check().await),
                ("vector", stores.vectors.health_check().await),
                ("metrics", stores.metrics_source.health_check().await),
                ("cluster", stores.cluster_api.health_check().await),
                ("generator", stores.generator.health_check().await),
            ] {
                match result {
                    Ok(()) => println!("{name}: ok"),
                    Err(e) => {
                        failed = true;
                        println!("{name}: DOWN ({e})");
                    }
                }
            }
            if failed {
                Ok(ExitCode::from(3))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

async fn run_playbook_action(
    store: &PlaybookStore,
    action: PlaybookAction,
) -> anyhow::Result<ExitCode> {
    match action {
        PlaybookAction::List => {
            let playbooks = store.list().await?;
            if playbooks.is_empty() {
                println!("no playbooks");
            }
            for p in playbooks {
                println!(
                    "{}  v{}  {:<14}  {:<13}  {}  (exec {}, success rate {:.0}%)",
                    p.playbook_id,
                    p.version,
                    p.status.to_string(),
                    p.pattern_type.to_string(),
                    p.title,
                    p.stats.total_executions,
                    p.stats.success_rate() * 100.0,
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        PlaybookAction::Show { id } => match store.get(id).await? {
            Some(playbook) => {
                println!("{}", serde_json::to_string_pretty(&playbook)?);
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("playbook {id} not found");
                Ok(ExitCode::from(2))
            }
        },
        PlaybookAction::Approve { id, reviewer } => {
            if reviewer == SYSTEM_IDENTITY {
                eprintln!("the system identity cannot review its own drafts");
                return Ok(ExitCode::from(2));
            }
            let playbook = store
                .transition(id, PlaybookStatus::Active, &reviewer, None)
                .await?;
            println!("approved {} (v{})", playbook.playbook_id, playbook.version);
            Ok(ExitCode::SUCCESS)
        }
        PlaybookAction::Reject { id, reviewer, reason } => {
            if reviewer == SYSTEM_IDENTITY {
                eprintln!("the system identity cannot review its own drafts");
                return Ok(ExitCode::from(2));
            }
            let playbook = store
                .transition(id, PlaybookStatus::Archived, &reviewer, Some(reason))
                .await?;
            println!("rejected {} -> {}", playbook.playbook_id, playbook.status);
            Ok(ExitCode::SUCCESS)
        }
    }
}
