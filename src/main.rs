use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use opsdesk::executions::{ExecutionFilter, ExecutionStatus, ExecutionStore};
use opsdesk::links::{LinkCatalog, LinkKind};
use opsdesk::reconcile::{ReconcileSchedule, Reconciler};
use opsdesk::runner::RundeckClient;

#[derive(Parser)]
#[command(
    name = "opsdesk",
    about = "Operations dashboard backend: Rundeck job submission and execution tracking",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + reconciliation loop)
    Serve {
        /// Bind address (overrides [server] bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run a single reconciliation pass and print the report
    Reconcile {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Preview the next reconciliation ticks
    Schedule {
        /// Number of ticks to show
        #[arg(long, default_value = "5")]
        count: usize,
    },

    /// Inspect stored execution records
    Executions {
        #[command(subcommand)]
        action: ExecutionsAction,
    },

    /// Manage dashboard links
    Links {
        #[command(subcommand)]
        action: LinksAction,
    },
}

#[derive(Subcommand)]
enum ExecutionsAction {
    /// List records, newest first
    List {
        /// Filter by status (running, succeeded, failed, aborted, unknown)
        #[arg(long)]
        status: Option<ExecutionStatus>,

        /// Filter by job id
        #[arg(long)]
        job_id: Option<String>,

        /// Maximum rows
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum LinksAction {
    /// List links of one kind
    List {
        /// rundeck or dynatrace
        #[arg(long)]
        kind: LinkKind,
    },

    /// Add a link
    Add {
        /// rundeck or dynatrace
        #[arg(long)]
        kind: LinkKind,

        /// Display name
        #[arg(long)]
        name: String,

        /// Target URL
        #[arg(long)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = opsdesk::resolve_config(cli.config.as_deref())?;
    opsdesk::init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting opsdesk daemon");
            opsdesk::serve(config).await?;
        }
        Commands::Reconcile { json } => {
            config.validate()?;
            let pool = opsdesk::storage::open_pool(&config.storage.db_path)?;
            let store = ExecutionStore::new(pool);
            let runner = Arc::new(RundeckClient::new(&config.runner)?);
            let reconciler = Reconciler::new(store, runner, &config.reconcile);

            let report = reconciler.reconcile_once().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Reconciliation pass {}", report.pass_id);
                println!("{:<12} : {}", "Candidates", report.candidates);
                println!("{:<12} : {}", "Updated", report.updated);
                println!("{:<12} : {}", "Unchanged", report.unchanged);
                println!("{:<12} : {}", "Skipped", report.skipped);
                println!("{:<12} : {}", "Failed", report.failed);
            }
        }
        Commands::Schedule { count } => {
            let schedule = ReconcileSchedule::parse(&config.reconcile.schedule)?;
            let upcoming = schedule.upcoming(chrono::Utc::now(), count);
            if upcoming.is_empty() {
                println!("Schedule '{}' has no upcoming ticks.", schedule.expr());
            } else {
                println!("Upcoming reconciliation ticks ({}):", schedule.expr());
                for tick in upcoming {
                    println!("  {}", tick.to_rfc3339());
                }
            }
        }
        Commands::Executions { action } => {
            let pool = opsdesk::storage::open_pool(&config.storage.db_path)?;
            let store = ExecutionStore::new(pool);

            match action {
                ExecutionsAction::List { status, job_id, limit } => {
                    let records = store.list(&ExecutionFilter { job_id, status, limit })?;
                    if records.is_empty() {
                        println!("No executions found.");
                    } else {
                        println!("{:<12} | {:<24} | {:<10} | Created", "Execution", "Job", "Status");
                        println!("{:-<12}-|-{:-<24}-|-{:-<10}-|-{:-<25}", "", "", "", "");
                        for r in records {
                            println!(
                                "{:<12} | {:<24} | {:<10} | {}",
                                r.execution_id,
                                r.job_name.as_deref().unwrap_or("-"),
                                r.status,
                                r.created_at.to_rfc3339()
                            );
                        }
                    }
                }
            }
        }
        Commands::Links { action } => {
            let pool = opsdesk::storage::open_pool(&config.storage.db_path)?;
            let catalog = LinkCatalog::new(pool);

            match action {
                LinksAction::List { kind } => {
                    let links = catalog.list(kind)?;
                    if links.is_empty() {
                        println!("No {} links found.", kind);
                    } else {
                        for link in links {
                            println!("{:<20} {}", link.name, link.link);
                        }
                    }
                }
                LinksAction::Add { kind, name, url } => {
                    let link = catalog.add(kind, &name, &url)?;
                    println!("Added {} link '{}'.", kind, link.name);
                }
            }
        }
    }

    Ok(())
}
