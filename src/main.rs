#![forbid(unsafe_code)]

//! `agent-relay`: inspect the background job archive.
//!
//! Reads the archive directory named in the TOML configuration and prints
//! archived jobs or the id counter a restarted job manager would resume from.

use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::config::GlobalConfig;
use agent_relay::models::job::{JobId, JobRecord};
use agent_relay::persistence::job_archive::JobArchive;
use agent_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "Agent relay job archive tool", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Print results as JSON.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Background job archive queries.
    #[command(subcommand)]
    Jobs(JobsCommand),
}

#[derive(Debug, Subcommand)]
enum JobsCommand {
    /// List jobs archived for a day.
    List {
        /// Day to list (YYYY-MM-DD); defaults to today (UTC).
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show one archived job.
    Show {
        /// Job id; `7` and `000007` are the same job.
        id: String,
    },

    /// Print the counter a restarted job manager resumes from.
    Counter,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let config = GlobalConfig::load_from_path(&args.config)?;
    let archive = JobArchive::open(config.jobs.archive_dir.clone())?;
    debug!(archive_dir = %archive.dir().display(), "archive opened");

    match args.command {
        Command::Jobs(JobsCommand::List { date }) => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let jobs = archive.list(date)?;
            info!(%date, count = jobs.len(), "archived jobs loaded");
            if args.json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else if jobs.is_empty() {
                println!("no jobs archived for {date}");
            } else {
                for job in &jobs {
                    println!("{}", summary_line(job));
                }
            }
        }
        Command::Jobs(JobsCommand::Show { id }) => {
            let id: JobId = id.parse()?;
            let job = archive
                .find(id)?
                .ok_or_else(|| AppError::NotFound(format!("job {id} is not archived")))?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&job)?);
            } else {
                print_details(&job);
            }
        }
        Command::Jobs(JobsCommand::Counter) => {
            let counter = archive.last_counter()?.unwrap_or(0);
            if args.json {
                println!("{}", serde_json::json!({ "last_counter": counter }));
            } else {
                println!(
                    "last counter {counter}; next job id {}",
                    JobId::from_counter(counter + 1)
                );
            }
        }
    }

    Ok(())
}

fn summary_line(job: &JobRecord) -> String {
    format!(
        "{}  {:<8}  {}  {}",
        job.id,
        job.status.to_string(),
        job.created_at.format("%H:%M:%S"),
        job.work
    )
}

fn print_details(job: &JobRecord) {
    println!("id:          {}", job.id);
    println!("status:      {}", job.status);
    println!("work:        {}", job.work);
    println!("owner:       {}", job.owner);
    println!("session:     {}", job.session_key);
    println!("created:     {}", job.created_at.to_rfc3339());
    if let Some(completed) = job.completed_at {
        println!("completed:   {}", completed.to_rfc3339());
    }
    println!("result:\n{}", job.result);
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
