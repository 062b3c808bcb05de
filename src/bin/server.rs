use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use omnilocal::api::{self, AppState};
use omnilocal::orchestration::worker;
use omnilocal::{AppConfig, Orchestrator};

#[derive(Parser, Debug)]
#[command(name = "omnilocal-server", version, about = "OmniLocal HTTP server")]
struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Directory for generated speech
    #[arg(long)]
    audio_dir: Option<PathBuf>,

    /// Skip loading the text model at startup
    #[arg(long)]
    lazy: bool,

    /// Pending requests allowed before callers wait
    #[arg(long, default_value_t = 16)]
    queue: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "omnilocal=info,omnilocal_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = args.audio_dir {
        config.audio_dir = dir;
    }

    info!("Text model: {}", config.models.text);
    info!("Vision model: {}", config.models.vision);
    info!("Runtime: {}", config.runtime.url);

    let mut orchestrator = Orchestrator::from_config(&config)?;
    if !args.lazy {
        // Startup cannot continue without the text brain.
        orchestrator.initialize().await?;
    }

    let transcriber = orchestrator.transcriber();
    let artifacts = orchestrator.artifacts().clone();
    let (handle, join) = worker::spawn(orchestrator, args.queue);

    let state = Arc::new(AppState {
        worker: handle.clone(),
        transcriber,
        artifacts,
        public_url: config.public_url(),
        text_model: config.models.text.clone(),
        vision_model: config.models.vision.clone(),
    });

    api::start_server(&config.server.host, config.server.port, state).await?;

    info!("Releasing models...");
    if handle.shutdown().await.is_err() {
        warn!("Inference worker already stopped");
    }
    if let Err(e) = join.await {
        warn!("Inference worker exited abnormally: {}", e);
    }

    Ok(())
}
