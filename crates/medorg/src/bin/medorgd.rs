//! The ingestion daemon: queue store, watcher, and the three workers under
//! one supervisor with graceful signal-driven shutdown.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use medorg::catalog::CatalogClient;
use medorg::emby::EmbyClient;
use medorg::queue::{self, QueueStore};
use medorg::watcher::{self, StabilityChecker};
use medorg::worker::WorkerSet;
use medorg::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    info!("configuration loaded");

    let pool = queue::connect(&config.database)
        .await
        .context("failed to connect to the queue database")?;
    queue::run_migrations(&pool)
        .await
        .context("failed to apply schema migrations")?;
    let store = QueueStore::new(pool, config.retry.clone());

    // Pick up files that arrived while the daemon was down.
    match watcher::scan_existing(&config.watch_dir, &config.video_extensions, &config.error_dir) {
        Ok(existing) => {
            for path in existing {
                if let Err(e) = store.add(&path.to_string_lossy(), None, None, None).await {
                    warn!(path = %path.display(), error = %e, "failed to enqueue existing file");
                }
            }
        }
        Err(e) => warn!(error = %e, "startup scan failed"),
    }

    let catalog = CatalogClient::new(&config.catalog);
    let emby = if config.emby.is_configured() {
        Some(EmbyClient::new(&config.emby))
    } else {
        warn!("media server not configured; the updater will idle");
        None
    };

    let workers = WorkerSet::spawn(store.clone(), catalog, emby, &config);

    // The watch loop blocks on notify, so it gets its own thread; detected
    // paths cross into async land over this channel.
    let (path_tx, mut path_rx) = mpsc::unbounded_channel::<PathBuf>();
    let watch_shutdown = Arc::new(AtomicBool::new(false));
    let watch_handle = {
        let watch_dir = config.watch_dir.clone();
        let extensions = config.video_extensions.clone();
        let error_dir = config.error_dir.clone();
        let shutdown = Arc::clone(&watch_shutdown);
        std::thread::spawn(move || {
            watcher::watch_directory(&watch_dir, &extensions, &error_dir, path_tx, shutdown)
        })
    };

    // Every candidate file gets its own stability task so one slow writer
    // does not hold up detection of the others.
    let checker = StabilityChecker::new(&config.stability);
    let pump = {
        let store = store.clone();
        tokio::spawn(async move {
            while let Some(path) = path_rx.recv().await {
                let store = store.clone();
                let checker = checker.clone();
                tokio::spawn(async move {
                    if checker.wait_until_stable(&path).await {
                        if let Err(e) = store.add(&path.to_string_lossy(), None, None, None).await
                        {
                            warn!(path = %path.display(), error = %e, "failed to enqueue file");
                        }
                    }
                });
            }
        })
    };

    info!("medorgd running; watching for new files");
    wait_for_shutdown().await?;

    info!("shutting down...");
    watch_shutdown.store(true, Ordering::Relaxed);
    match watch_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "watcher exited with an error"),
        Err(_) => error!("watcher thread panicked"),
    }
    // The watch thread dropped its sender; the pump drains and exits.
    if let Err(e) = pump.await {
        error!(error = %e, "stability pump failed to join");
    }

    workers.shutdown().await;
    store.close().await;
    info!("shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for SIGINT")?;
                info!("received SIGINT");
            }
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
        info!("received ctrl-c");
    }
    Ok(())
}
