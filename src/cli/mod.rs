use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::models::{NewJob, RunnerConfig};
use crate::runner::Runner;
use crate::store::JsonJobStore;

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Webhook delivery queue runner", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Directory holding jobs.json, the queue log and lock files
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Path to a JSON config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process one batch of eligible jobs and exit
    Run {
        /// Number of concurrent workers
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Enqueue a new webhook job
    Add {
        /// HTTP method (GET, POST, PUT, DELETE, PATCH, HEAD)
        #[arg(long, default_value = "GET")]
        method: String,
        /// Target URL
        url: String,
        /// Request body
        #[arg(long)]
        body: Option<String>,
        /// Per-attempt timeout in seconds
        #[arg(long, default_value_t = 10)]
        timeout: u64,
        /// Attempt budget
        #[arg(long, default_value_t = 10)]
        retries: u32,
        /// Seconds to wait between failed attempts
        #[arg(long, default_value_t = 0)]
        delay: u32,
    },
    /// Show all jobs in the queue
    List {
        /// Print as JSON instead of the summary table
        #[arg(long)]
        json: bool,
    },
}

fn load_config(cli: &Cli) -> Result<RunnerConfig> {
    match &cli.config {
        Some(path) => Ok(RunnerConfig::load(path)?),
        None => Ok(RunnerConfig::default()),
    }
}

fn resolve_data_dir(cli: &Cli, config: &RunnerConfig) -> Result<PathBuf> {
    if let Some(dir) = &cli.data_dir {
        return Ok(dir.clone());
    }
    if let Some(dir) = &config.data_dir {
        return Ok(dir.clone());
    }
    let base = dirs::data_dir().context("Could not determine data directory")?;
    Ok(base.join("webhook-courier"))
}

pub async fn dispatch(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli)?;
    let data_dir = resolve_data_dir(&cli, &config)?;
    let store = Arc::new(JsonJobStore::new(data_dir).await?);

    match cli.command {
        Commands::Run { workers } => {
            if let Some(workers) = workers {
                config.worker_count = workers;
            }
            let runner = Runner::new(store, config);
            let outcomes = runner.run_batch().await?;
            let attempted = outcomes.iter().filter(|o| o.is_some()).count();
            let skipped = outcomes.len() - attempted;
            tracing::info!("Batch complete: {} attempted, {} skipped", attempted, skipped);
            Ok(())
        }
        Commands::Add {
            method,
            url,
            body,
            timeout,
            retries,
            delay,
        } => {
            let job = store
                .create_job(NewJob {
                    http_method: method,
                    url,
                    body,
                    timeout_secs: timeout,
                    remaining_retries: retries,
                    retry_delay_secs: delay,
                })
                .await?;
            println!("{}", job.id);
            Ok(())
        }
        Commands::List { json } => {
            let jobs = store.list_jobs().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else {
                for job in jobs {
                    let status = match job.result_code {
                        Some(code) => format!("{:?}", code),
                        None => "Pending".to_string(),
                    };
                    println!(
                        "{}  {:6}  {:18}  retries={}  {}",
                        job.id, job.http_method, status, job.remaining_retries, job.url
                    );
                }
            }
            Ok(())
        }
    }
}
