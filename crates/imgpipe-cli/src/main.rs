// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imgpipe_cli::commands::{DaemonClient, UploadSpec, load_upload_manifest};
use imgpipe_cli::config::resolve_daemon_url;
use imgpipe_cli::format::{Formatter, OutputFormat};
use imgpipe_core::BatchSettings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Exit code for runtime errors.
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "imgpipe", version, about = "Client for the image pipeline daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Daemon base URL. Overrides `IMGPIPE_DAEMON_URL` and the config file.
    #[arg(long, global = true)]
    daemon_url: Option<String>,

    /// Path to an `imgpipe.toml` config file.
    #[arg(long, global = true, default_value = "imgpipe.toml")]
    config: PathBuf,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    format: OutputFormatArg,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum OutputFormatArg {
    Json,
    JsonPretty,
    Text,
    Table,
    Compact,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(v: OutputFormatArg) -> Self {
        match v {
            OutputFormatArg::Json => OutputFormat::Json,
            OutputFormatArg::JsonPretty => OutputFormat::JsonPretty,
            OutputFormatArg::Text => OutputFormat::Text,
            OutputFormatArg::Table => OutputFormat::Table,
            OutputFormatArg::Compact => OutputFormat::Compact,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check daemon liveness.
    Health,

    /// Create a user with a starting credit balance.
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long, default_value_t = 0)]
        credits: u64,
    },

    /// Fetch a user's current balance.
    GetUser {
        user_id: Uuid,
    },

    /// Submit a batch of images from a manifest file (a JSON array of image specs).
    Upload {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        manifest: PathBuf,
        #[arg(long)]
        declutter: bool,
        #[arg(long)]
        allow_staging: bool,
    },

    /// Cancel every not-yet-terminal job in a batch.
    CancelBatch {
        batch_id: Uuid,
    },

    /// Re-submit a single failed job, charging its cost again.
    RetryJob {
        job_id: Uuid,
    },

    /// Fetch a single job's status.
    Status {
        job_id: Uuid,
    },

    /// Fetch a batch's status, including every job in it.
    StatusBatch {
        batch_id: Uuid,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("imgpipe=debug")
    } else {
        EnvFilter::new("imgpipe=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let format: OutputFormat = cli.format.into();
    let formatter = Formatter::new(format);

    if let Err(e) = run(cli.command, cli.daemon_url, &cli.config, &formatter).await {
        eprintln!("{}", formatter.format_error(&format!("{e:#}")));
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

async fn run(command: Commands, daemon_url: Option<String>, config_path: &std::path::Path, formatter: &Formatter) -> Result<()> {
    let base_url = resolve_daemon_url(daemon_url, Some(config_path))?;
    let client = DaemonClient::new(base_url);

    match command {
        Commands::Health => {
            let body = client.health().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::CreateUser { email, credits } => {
            let user = client.create_user(email, credits).await?;
            println!("{}", formatter.format_user(&user));
        }
        Commands::GetUser { user_id } => {
            let user = client.get_user(user_id).await?;
            println!("{}", formatter.format_user(&user));
        }
        Commands::Upload { user_id, manifest, declutter, allow_staging } => {
            let images: Vec<UploadSpec> = load_upload_manifest(&manifest)?;
            let settings = BatchSettings { declutter, allow_staging, ..BatchSettings::default() };
            let batch = client.upload(user_id, settings, images).await?;
            println!("{}", formatter.format_batch(&batch));
        }
        Commands::CancelBatch { batch_id } => {
            let batch = client.cancel_batch(batch_id).await?;
            println!("{}", formatter.format_batch(&batch));
        }
        Commands::RetryJob { job_id } => {
            let job = client.retry_job(job_id).await.context("retry job")?;
            println!("{}", formatter.format_job(&job));
        }
        Commands::Status { job_id } => {
            let job = client.job_status(job_id).await?;
            println!("{}", formatter.format_job(&job));
        }
        Commands::StatusBatch { batch_id } => {
            let batch = client.batch_status(batch_id).await?;
            println!("{}", formatter.format_batch(&batch));
        }
    }

    Ok(())
}
