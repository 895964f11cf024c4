use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use arbiter::config::ServiceConfig;
use arbiter::events::{ChannelEventSink, LogSink, NullStore};
use arbiter::orchestrator::Orchestrator;
use arbiter::queue::SubmissionQueue;
use arbiter::sandbox::IsolateExecutor;
use arbiter::service::{InMemoryTestCases, JudgeService, Registry};
use arbiter::worker::{LoadTracker, WorkerDeps, WorkerPool};
use arbiter::{languages, strategy};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("arbiter=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = ServiceConfig::from_env();

    // Load language and heuristic tables
    let languages_path =
        std::env::var("LANGUAGES_CONFIG").unwrap_or_else(|_| "./files/languages.toml".into());
    languages::init_languages(&languages_path)?;
    info!("Loaded language configurations from {}", languages_path);

    let heuristics_path =
        std::env::var("HEURISTICS_CONFIG").unwrap_or_else(|_| "./files/heuristics.toml".into());
    strategy::init_heuristics(&heuristics_path)?;
    info!("Loaded classification heuristics from {}", heuristics_path);

    info!("Starting judge service...");

    // Fail fast if the sandbox backend is unusable
    IsolateExecutor::ensure_available().await?;
    let executor = Arc::new(IsolateExecutor::new());
    info!("Confirmed isolate sandbox backend is available");

    // Update events flow through a bounded channel; the standalone binary
    // drains it into the log, a deployment hangs its notifier here
    let (event_tx, mut event_rx) =
        tokio::sync::mpsc::channel(config.event_channel_capacity);
    let events = Arc::new(ChannelEventSink::new(event_tx));
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            info!(
                "update: submission {} -> {}",
                event.submission_id, event.status
            );
        }
    });

    let sinks = Arc::new(LogSink);
    let orchestrator = Arc::new(Orchestrator::new(
        executor,
        sinks.clone(),
        sinks.clone(),
        config.orchestrator_config(),
    ));
    let _reaper = orchestrator.spawn_idle_reaper();

    let queue = Arc::new(SubmissionQueue::new());
    let registry = Arc::new(Registry::default());
    let tests = Arc::new(InMemoryTestCases::default());
    let store = Arc::new(NullStore);

    let _service = JudgeService::new(
        &config,
        queue.clone(),
        registry.clone(),
        tests.clone(),
        events.clone(),
        store.clone(),
    );

    let deps = Arc::new(WorkerDeps {
        config: config.clone(),
        queue,
        registry,
        tests,
        orchestrator: orchestrator.clone(),
        events,
        store,
        load: Arc::new(LoadTracker::default()),
    });
    let pool = WorkerPool::new(deps);
    pool.start();

    info!("Judge service ready; waiting for submissions");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    pool.shutdown().await;

    Ok(())
}
