use anyhow::{Context, Result};
use clap::Parser;
use liana::audio::{AudioSink, AudioSource};
use liana::{
    create_router, AppState, Command, Config, SessionConfig, SystemDevices, TerminalUi,
    VoiceSession, WebSocketConnector,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "liana")]
#[command(about = "Bilingual voice assistant on the Gemini Live API")]
struct Cli {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/liana")]
    config: String,

    /// Stream this WAV file instead of the microphone
    #[arg(long)]
    input_wav: Option<PathBuf>,

    /// Write assistant speech to this WAV file instead of the speaker; every
    /// session of the run is appended
    #[arg(long)]
    output_wav: Option<PathBuf>,

    /// Serve the HTTP control API
    #[arg(long)]
    http: bool,

    /// Override the HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// No terminal UI; run until Ctrl+C
    #[arg(long)]
    headless: bool,

    /// Start a session immediately
    #[arg(long)]
    autostart: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "liana=debug,info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = Config::load(&cli.config)?;
    if let Some(port) = cli.http_port {
        cfg.http.port = port;
    }

    info!("Liana v{}", env!("CARGO_PKG_VERSION"));
    info!("Model: {} (voice {})", cfg.live.model, cfg.live.voice);

    let session_config = SessionConfig::from_config(&cfg);
    if session_config.credential.is_none() {
        warn!(
            "{} is not set; sessions will fail to start",
            session_config.credential_var
        );
    }

    let input = match cli.input_wav {
        Some(path) => AudioSource::File(path),
        None => AudioSource::Microphone,
    };
    let output = match cli.output_wav {
        Some(path) => AudioSink::File(path),
        None => AudioSink::Speaker,
    };

    let connector = Arc::new(WebSocketConnector::new(cfg.live.endpoint.clone()));
    let devices = Arc::new(SystemDevices::new(input, output));
    let (session, handle) = VoiceSession::new(session_config, connector, devices);
    let controller = tokio::spawn(session.run());

    if cli.http {
        let addr = format!("{}:{}", cfg.http.bind, cfg.http.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind HTTP server to {}", addr))?;
        let router = create_router(AppState::new(handle.clone()));
        info!("HTTP API listening on {}", addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!("HTTP server error: {}", e);
            }
        });
    }

    if cli.autostart {
        handle.send(Command::Start).await?;
    }

    if cli.headless {
        info!("Running headless, press Ctrl+C to exit");
        tokio::signal::ctrl_c().await?;
    } else {
        TerminalUi::new(handle.clone(), cfg.assistant.name.clone())
            .run()
            .await?;
    }

    info!("Shutting down");
    if let Err(e) = handle.send(Command::Shutdown).await {
        warn!("{}", e);
    }
    controller.await?;

    Ok(())
}
