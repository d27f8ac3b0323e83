use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kadr::api::{create_router, AppState};
use kadr::catalog::OmdbClient;
use kadr::config::Config;
use kadr::embeddings::{EmbeddingProvider, ImageEmbedder};
use kadr::index::InMemoryIndex;
use kadr::models::ImageDocument;
use kadr::ocr;
use kadr::pipeline::RecognitionPipeline;

#[derive(Parser)]
#[command(name = "kadr")]
#[command(about = "Script-aware OCR with confidence fallback and image search")]
struct Args {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Recognise one image file and print the result as JSON
    Recognize {
        path: PathBuf,
        /// Print only the selected text
        #[arg(long)]
        text_only: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "kadr=info,tower_http=debug".into());
    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let config = Config::from_env();
    let pipeline = build_pipeline(&config);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, pipeline).await,
        Command::Recognize { path, text_only } => {
            recognize_file(&pipeline, path, text_only).await
        }
    }
}

fn build_pipeline(config: &Config) -> RecognitionPipeline {
    tracing::info!("Initializing OCR engine: {}...", config.ocr.model);
    let engine = ocr::build_engine(&config.ocr);
    if engine.installed_languages().is_empty() {
        tracing::warn!("No OCR language packs available - every recognition will find no text");
    }

    tracing::info!("Loading embedding model: {}...", config.embeddings.model);
    let embeddings = EmbeddingProvider::new(&config.embeddings);
    if !embeddings.is_available() {
        tracing::warn!("Embeddings unavailable - indexing and image search will be skipped");
    }
    let index = InMemoryIndex::new(embeddings.dimensions());

    RecognitionPipeline::new(config, engine, Arc::new(embeddings), Arc::new(index))
}

async fn recognize_file(
    pipeline: &RecognitionPipeline,
    path: PathBuf,
    text_only: bool,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let result = pipeline
        .recognize_document(ImageDocument::new(bytes), &cancel)
        .await
        .with_context(|| format!("Recognition failed for {}", path.display()))?;

    if text_only {
        println!("{}", result.text());
    } else {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    Ok(())
}

async fn serve(config: Config, pipeline: RecognitionPipeline) -> anyhow::Result<()> {
    let catalog = match &config.catalog {
        Some(catalog_config) => {
            tracing::info!("Initializing title catalog: {}...", catalog_config.base_url);
            Some(OmdbClient::new(catalog_config)?)
        }
        None => {
            tracing::info!("OMDB_API_KEY not set - title identification disabled");
            None
        }
    };

    let cancel_token = CancellationToken::new();
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config, pipeline, catalog, cancel_token.clone());
    let app = create_router(state);

    tracing::info!("Kadr starting on http://{}", addr);
    tracing::info!("  Health check: http://{}/api/v1/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token))
        .await?;

    Ok(())
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, cancelling in-flight recognitions...");
    cancel_token.cancel();
}
