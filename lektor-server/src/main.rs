//! # Lektor Server
//!
//! Long-running service that discovers newly published lecture recordings
//! on the tele-task portal, extracts their audio, transcribes them, and
//! stores WebVTT/TXT artifacts plus lecture metadata in PostgreSQL.
//!
//! The process hosts four cooperating pieces:
//! - a single worker draining the scheduler and driving the pipeline,
//! - two refreshers keeping the forward and in-between queues current,
//! - a minimal axum control plane (`/ping`, `/queues`, `/prioritize/{id}`).

/// Control-plane routes and state.
pub mod handlers;

/// Error types and handling.
pub mod errors;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use lektor_config::Config;
use lektor_core::{
    AudioExtractor, FfmpegExtractor, GapRefresher, LecturePipeline, LectureResolver,
    LectureStore, PostgresStore, Scheduler, SpeechRecognizer, TeletaskResolver,
    TranscriptionPipeline, UpperRefresher, WhisperxRecognizer, Worker,
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::handlers::AppState;

/// Command line arguments for the lektor server
#[derive(Parser, Debug)]
#[command(name = "lektor-server")]
#[command(about = "Lecture transcription crawler with a minimal control plane")]
struct Args {
    /// Control-plane port
    #[arg(short, long, env = "SERVER_PORT", default_value_t = 8000)]
    port: u16,

    /// Control-plane host
    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    host: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Arc::new(Config::from_env()?);

    let store: Arc<dyn LectureStore> = Arc::new(PostgresStore::connect(&config).await?);
    store.initialize_schema().await?;

    let resolver: Arc<dyn LectureResolver> =
        Arc::new(TeletaskResolver::new(Arc::clone(&config))?);
    let extractor: Arc<dyn AudioExtractor> =
        Arc::new(FfmpegExtractor::new(config.recording_dir.clone())?);
    let recognizer: Arc<dyn SpeechRecognizer> = Arc::new(WhisperxRecognizer::new(&config));
    let pipeline: Arc<dyn TranscriptionPipeline> = Arc::new(LecturePipeline::new(
        Arc::clone(&resolver),
        Arc::clone(&store),
        extractor,
        recognizer,
    ));

    let shutdown = CancellationToken::new();
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&resolver),
        Arc::clone(&store),
        config.inflight_eviction,
        shutdown.clone(),
    ));

    let upper = UpperRefresher::new(
        Arc::clone(&scheduler),
        Arc::clone(&resolver),
        Arc::clone(&store),
        config.refresh_period,
        config.probe_window,
    );
    let gap = GapRefresher::new(
        Arc::clone(&scheduler),
        Arc::clone(&store),
        config.refresh_period,
    );

    // Startup seeding: detect freshly published ids first, then rebuild the
    // backward and in-between queues from the store.
    match upper.refresh_once().await {
        Ok(added) => info!(added, "forward queue seeded"),
        Err(err) => warn!(error = %err, "initial upper detection failed, forward queue starts empty"),
    }
    scheduler.seed_from_store().await?;

    let worker = Worker::new(
        Arc::clone(&scheduler),
        pipeline,
        config.worker_idle,
    );

    let tasks = vec![
        ("worker", tokio::spawn(worker.run(shutdown.clone()))),
        ("upper refresher", tokio::spawn(upper.run(shutdown.clone()))),
        ("gap refresher", tokio::spawn(gap.run(shutdown.clone()))),
    ];

    let app = handlers::router(AppState {
        scheduler: Arc::clone(&scheduler),
    })
    .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "control plane listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("control plane stopped, cancelling background tasks");
    shutdown.cancel();
    for (name, handle) in tasks {
        match tokio::time::timeout(Duration::from_secs(30), handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(task = name, error = %err, "task failed during shutdown"),
            Err(_) => warn!(task = name, "task did not stop in time"),
        }
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for the shutdown signal");
        return std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
