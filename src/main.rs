use anyhow::Result;
use sessionkeeper::cli::{Args, Commands, ConfigDiscovery};
use sessionkeeper::{LifecycleCoordinator, PersistenceGateway, RecoveryService, SnapshotConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sessionkeeper=info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Inspect { path, config } => run_inspect(path, config).await,
        Commands::Demo {
            path,
            autosave_ms,
            config,
        } => run_demo(path, autosave_ms, config).await,
        Commands::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            Ok(())
        }
    }
}

fn resolve_config(path: Option<PathBuf>, config: Option<PathBuf>) -> Result<SnapshotConfig> {
    let mut resolved = ConfigDiscovery::load(config.as_ref())?;
    if let Some(path) = path {
        resolved.path = path;
    }
    Ok(resolved)
}

async fn run_inspect(path: Option<PathBuf>, config: Option<PathBuf>) -> Result<()> {
    let config = resolve_config(path, config)?;
    let recovery = RecoveryService::new(Arc::new(PersistenceGateway::file(config.path.clone())));

    match recovery.recover().await {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("No prior session at {}", config.path.display()),
    }
    Ok(())
}

async fn run_demo(
    path: Option<PathBuf>,
    autosave_ms: Option<u64>,
    config: Option<PathBuf>,
) -> Result<()> {
    let mut config = resolve_config(path, config)?;
    if let Some(autosave_ms) = autosave_ms {
        config = config.with_autosave_ms(autosave_ms);
    }

    let coordinator = Arc::new(LifecycleCoordinator::new(config).with_process_hooks());

    let resumed = coordinator
        .recovery_with(|record| match record {
            Some(record) => info!(
                "Resuming session saved on {} at {}",
                record.reason(),
                record.meta().at
            ),
            None => info!("Starting a fresh session"),
        })
        .await
        .and_then(|record| record.state_as::<u64>().ok())
        .unwrap_or(0);

    let counter = Arc::new(AtomicU64::new(resumed));
    let producer_counter = counter.clone();
    coordinator.register_sync(move |_reason| producer_counter.load(Ordering::SeqCst));

    coordinator.start()?;
    info!("Counting from {}; press Ctrl-C to stop", resumed);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
        info!("counter = {}", value);
    }
}
