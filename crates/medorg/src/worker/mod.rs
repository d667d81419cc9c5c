//! Long-running queue consumers.
//!
//! Three workers cooperate exclusively through the queue store: the file
//! processor (pending -> moved), the media-server updater (moved ->
//! completed), and the retry scheduler (error -> pending). Each runs as its
//! own tokio task and finishes its current row before honoring shutdown.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::catalog::CatalogClient;
use crate::config::Config;
use crate::emby::EmbyClient;
use crate::error::QueueError;
use crate::queue::QueueStore;

pub mod emby_updater;
pub mod file_processor;
pub mod retry;

pub use emby_updater::EmbyUpdater;
pub use file_processor::FileProcessor;
pub use retry::RetryScheduler;

/// A polling queue consumer. `process_one` handles at most one row and
/// reports whether it found work.
pub(crate) trait Worker {
    fn name(&self) -> &'static str;
    fn poll_interval(&self) -> Duration;
    async fn process_one(&self) -> Result<bool, QueueError>;
}

/// Shared poll loop: claim-and-process until shutdown, sleeping between idle
/// cycles. A row in flight is always finished; the shutdown check happens
/// only between rows, so no claim is ever abandoned mid-status.
pub(crate) async fn run_worker<W: Worker>(worker: W, mut shutdown: broadcast::Receiver<()>) {
    info!(worker = worker.name(), "worker started");

    loop {
        match shutdown.try_recv() {
            Err(broadcast::error::TryRecvError::Empty) => {}
            _ => break,
        }

        let did_work = match worker.process_one().await {
            Ok(did_work) => did_work,
            Err(e) => {
                error!(worker = worker.name(), error = %e, "worker cycle failed");
                false
            }
        };

        if !did_work {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(worker.poll_interval()) => {}
            }
        }
    }

    info!(worker = worker.name(), "worker stopped");
}

/// Owns the worker tasks and the shutdown channel.
pub struct WorkerSet {
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerSet {
    /// Spawn all three workers. The updater idles when no media server is
    /// configured.
    pub fn spawn(
        store: QueueStore,
        catalog: CatalogClient,
        emby: Option<EmbyClient>,
        config: &Config,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut handles = Vec::with_capacity(3);

        let file_processor = FileProcessor::new(
            store.clone(),
            catalog,
            config.destination_dir.clone(),
            config.error_dir.clone(),
            Duration::from_secs(config.workers.file_processor_secs),
        );
        handles.push(tokio::spawn(run_worker(
            file_processor,
            shutdown_tx.subscribe(),
        )));

        let updater = EmbyUpdater::new(
            store.clone(),
            emby,
            Duration::from_secs(config.workers.emby_updater_secs),
        );
        handles.push(tokio::spawn(run_worker(updater, shutdown_tx.subscribe())));

        let scheduler =
            RetryScheduler::new(store, Duration::from_secs(config.workers.retry_secs));
        handles.push(tokio::spawn(run_worker(scheduler, shutdown_tx.subscribe())));

        info!("all workers started");
        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Signal shutdown and wait for every worker to finish its current row.
    pub async fn shutdown(self) {
        info!("stopping workers...");
        let _ = self.shutdown_tx.send(());
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task failed to join");
            }
        }
        info!("all workers stopped");
    }
}
