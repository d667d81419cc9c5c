//! Watch the inbox directory and debounce arriving files to a settled size.
//!
//! The notify side runs on a dedicated thread (PollWatcher, for Docker/NFS
//! mounts where inotify is unreliable); candidate paths cross into async
//! land over an unbounded channel, where each gets its own stability task.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config as NotifyConfig, PollWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer_opt, Config as DebouncerConfig, DebouncedEventKind};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::StabilityConfig;
use crate::error::WatchError;

const EVENT_DEBOUNCE: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const SHUTDOWN_CHECK: Duration = Duration::from_millis(100);

/// Waits for a file's size to stop changing before it is enqueued.
#[derive(Debug, Clone)]
pub struct StabilityChecker {
    interval: Duration,
    min_checks: u32,
}

impl StabilityChecker {
    pub fn new(config: &StabilityConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.check_interval_seconds),
            min_checks: config.min_stable_checks,
        }
    }

    /// Poll the file size until it is identical for `min_checks` consecutive
    /// checks. Returns `false` if the file disappears meanwhile.
    pub async fn wait_until_stable(&self, path: &Path) -> bool {
        let mut stable_count = 0u32;
        let mut last_size: Option<u64> = None;

        while stable_count < self.min_checks {
            let size = match tokio::fs::metadata(path).await {
                Ok(meta) => meta.len(),
                Err(_) => {
                    warn!(path = %path.display(), "file disappeared during stability check");
                    return false;
                }
            };

            if last_size == Some(size) {
                stable_count += 1;
            } else {
                stable_count = 0;
            }
            last_size = Some(size);

            if stable_count < self.min_checks {
                tokio::time::sleep(self.interval).await;
            }
        }

        info!(path = %path.display(), size = last_size, "file stable");
        true
    }
}

fn is_eligible(path: &Path, extensions: &[String], error_dir: &Path) -> bool {
    if path.starts_with(error_dir) {
        return false;
    }
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let dotted = format!(".{}", ext.to_lowercase());
    extensions.iter().any(|e| e == &dotted)
}

/// One-shot catch-up scan of the watch directory's top level, for files that
/// arrived while the daemon was down.
pub fn scan_existing(
    watch_dir: &Path,
    extensions: &[String],
    error_dir: &Path,
) -> Result<Vec<PathBuf>, WatchError> {
    if !watch_dir.exists() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(watch_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| WatchError::ScanFailed {
            path: watch_dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if path.is_file() && is_eligible(path, extensions, error_dir) {
            debug!(path = %path.display(), "found existing file");
            found.push(path.to_path_buf());
        }
    }

    info!(count = found.len(), dir = %watch_dir.display(), "startup scan complete");
    Ok(found)
}

/// Blocking watch loop; run it on its own thread. Eligible paths are sent to
/// `tx` as they appear. Returns when `shutdown` is set or the receiver goes
/// away.
pub fn watch_directory(
    watch_dir: &Path,
    extensions: &[String],
    error_dir: &Path,
    tx: mpsc::UnboundedSender<PathBuf>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), WatchError> {
    let poll_config = NotifyConfig::default().with_poll_interval(POLL_INTERVAL);
    let debouncer_config = DebouncerConfig::default()
        .with_timeout(EVENT_DEBOUNCE)
        .with_notify_config(poll_config);

    let (raw_tx, raw_rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer_opt::<_, PollWatcher>(debouncer_config, raw_tx)
        .map_err(|e| WatchError::Notify(e.to_string()))?;
    debouncer
        .watcher()
        .watch(watch_dir, RecursiveMode::NonRecursive)
        .map_err(|e| WatchError::Notify(e.to_string()))?;

    info!(dir = %watch_dir.display(), "watching directory");

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match raw_rx.recv_timeout(SHUTDOWN_CHECK) {
            Ok(Ok(events)) => {
                for event in events {
                    if !matches!(event.kind, DebouncedEventKind::Any) {
                        continue;
                    }
                    let path = event.path;
                    if !path.is_file() || !is_eligible(&path, extensions, error_dir) {
                        continue;
                    }
                    info!(path = %path.display(), "new file detected");
                    if tx.send(path).is_err() {
                        // Receiver side is gone; nothing left to notify.
                        return Ok(());
                    }
                }
            }
            Ok(Err(e)) => warn!(error = %e, "watch error"),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("watcher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn extensions() -> Vec<String> {
        vec![".mp4".to_string(), ".mkv".to_string()]
    }

    fn checker(interval_secs: u64, min_checks: u32) -> StabilityChecker {
        StabilityChecker::new(&StabilityConfig {
            check_interval_seconds: interval_secs,
            min_stable_checks: min_checks,
        })
    }

    #[test]
    fn test_eligible_extension_case_insensitive() {
        let error_dir = Path::new("/watch/errors");
        assert!(is_eligible(Path::new("/watch/a.MP4"), &extensions(), error_dir));
        assert!(is_eligible(Path::new("/watch/a.mkv"), &extensions(), error_dir));
        assert!(!is_eligible(Path::new("/watch/a.txt"), &extensions(), error_dir));
        assert!(!is_eligible(Path::new("/watch/noext"), &extensions(), error_dir));
    }

    #[test]
    fn test_eligible_skips_error_dir() {
        let error_dir = Path::new("/watch/errors");
        assert!(!is_eligible(
            Path::new("/watch/errors/a.mp4"),
            &extensions(),
            error_dir
        ));
    }

    #[tokio::test]
    async fn test_stability_settled_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.mp4");
        std::fs::write(&path, b"settled content").unwrap();

        assert!(checker(0, 2).wait_until_stable(&path).await);
    }

    #[tokio::test]
    async fn test_stability_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.mp4");

        assert!(!checker(0, 2).wait_until_stable(&path).await);
    }

    #[test]
    fn test_scan_existing_filters() {
        let dir = TempDir::new().unwrap();
        let error_dir = dir.path().join("errors");
        std::fs::create_dir(&error_dir).unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"x").unwrap();
        std::fs::write(error_dir.join("c.mp4"), b"x").unwrap();

        let found = scan_existing(dir.path(), &extensions(), &error_dir).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("a.mp4"));
    }

    #[test]
    fn test_scan_existing_missing_dir() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let found = scan_existing(&missing, &extensions(), Path::new("/e")).unwrap();
        assert!(found.is_empty());
    }
}
