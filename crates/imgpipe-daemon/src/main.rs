#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use imgpipe_config::{PipelineConfig, apply_env_overrides};
use imgpipe_daemon::fs_store::FsImageStore;
use imgpipe_daemon::{AppState, build_app};
use imgpipe_judge::MockJudgeClient;
use imgpipe_model_mock::MockModelClient;
use imgpipe_runtime::PipelineRuntime;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "imgpipe-daemon", version, about = "Image pipeline status API and control plane")]
struct Args {
    /// Bind address.
    #[arg(long, default_value = "127.0.0.1:8088")]
    bind: String,

    /// Root directory for persisted users/batches/jobs and local image storage.
    #[arg(long, default_value = ".imgpipe/store")]
    store_root: PathBuf,

    /// Enable request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("imgpipe=debug,imgpipe_daemon=debug,imgpipe_runtime=debug")
    } else {
        EnvFilter::new("imgpipe=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = PipelineConfig::default();
    apply_env_overrides(&mut config);

    tokio::fs::create_dir_all(&args.store_root)
        .await
        .with_context(|| format!("create store root {}", args.store_root.display()))?;

    let images = Arc::new(FsImageStore::new(args.store_root.join("images")));
    let runtime = Arc::new(
        PipelineRuntime::builder(&args.store_root, Arc::new(MockModelClient::new()), Arc::new(MockJudgeClient::new()), images)
            .config(config)
            .build(),
    );
    runtime.hydrate().await.context("hydrate runtime from disk")?;

    let state = Arc::new(AppState::new(runtime));
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&args.bind).await.with_context(|| format!("bind {}", args.bind))?;
    info!(bind = %args.bind, store_root = %args.store_root.display(), "imgpipe-daemon listening");

    axum::serve(listener, app).await.context("serve")
}
