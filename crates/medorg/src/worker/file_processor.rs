//! Worker: pending -> moved.
//!
//! Parses the filename, fetches catalog metadata, composes the library
//! filename, and moves the file into the actress folder. The two pre-move
//! failure classes quarantine the file into the error directory; everything
//! else leaves the file where it is.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use super::Worker;
use crate::catalog::CatalogClient;
use crate::error::QueueError;
use crate::extract::{detect_subtitle, extract_movie_code};
use crate::queue::{ItemStatus, QueueItem, QueueStore, UpdateFields};
use crate::renamer::{build_filename, move_file, title_case};

/// A failed pipeline step: the classifier message destined for
/// `error_message`, plus whether the source file should be quarantined.
struct StepFailure {
    message: String,
    quarantine: bool,
}

impl StepFailure {
    fn new(message: String) -> Self {
        Self {
            message,
            quarantine: false,
        }
    }

    fn with_quarantine(message: String) -> Self {
        Self {
            message,
            quarantine: true,
        }
    }
}

pub struct FileProcessor {
    store: QueueStore,
    catalog: CatalogClient,
    destination_dir: PathBuf,
    error_dir: PathBuf,
    poll_interval: Duration,
}

impl FileProcessor {
    pub fn new(
        store: QueueStore,
        catalog: CatalogClient,
        destination_dir: PathBuf,
        error_dir: PathBuf,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            destination_dir,
            error_dir,
            poll_interval,
        }
    }

    async fn handle_item(&self, item: &QueueItem) -> Result<UpdateFields, StepFailure> {
        let filename = item.filename().to_string();

        let parsed_code = extract_movie_code(&filename).ok_or_else(|| {
            StepFailure::with_quarantine(format!("No movie code found in filename: {filename}"))
        })?;
        let subtitle = detect_subtitle(&filename);
        info!(code = %parsed_code, subtitle = %subtitle, "extracted filename fields");

        let record = self.catalog.search(&parsed_code).await.ok_or_else(|| {
            StepFailure::with_quarantine(format!(
                "No metadata found for movie code: {parsed_code}"
            ))
        })?;

        // The catalog's spelling of the code is authoritative once found.
        let movie_code = record.movie_code.clone().unwrap_or(parsed_code);
        let actress = title_case(
            record
                .actress
                .first()
                .map(String::as_str)
                .unwrap_or("Unknown"),
        );
        let title = record.title.clone().unwrap_or_default();
        let extension = Path::new(&item.file_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();

        let new_filename = build_filename(&actress, &subtitle, &movie_code, &title, &extension);

        let source = PathBuf::from(&item.file_path);
        let destination_dir = self.destination_dir.clone();
        let move_actress = actress.clone();
        let new_path = tokio::task::spawn_blocking(move || {
            move_file(&source, &destination_dir, &move_actress, &new_filename)
        })
        .await
        .map_err(|e| StepFailure::new(format!("File move failure: {e}")))?
        .map_err(|e| StepFailure::new(format!("File move failure: {e}")))?;

        info!(from = %item.file_path, to = %new_path.display(), "file moved");

        Ok(UpdateFields {
            new_path: Some(new_path.to_string_lossy().into_owned()),
            metadata_json: Some(record.raw),
            movie_code: Some(movie_code),
            actress: Some(actress),
            subtitle: Some(subtitle),
            ..Default::default()
        })
    }

    /// Best-effort move of an unprocessable file into the error directory.
    async fn quarantine(&self, file_path: &str) {
        let error_dir = self.error_dir.clone();
        let file_path = file_path.to_string();
        let _ = tokio::task::spawn_blocking(move || quarantine_file(&error_dir, &file_path)).await;
    }
}

impl Worker for FileProcessor {
    fn name(&self) -> &'static str {
        "file-processor"
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn process_one(&self) -> Result<bool, QueueError> {
        let Some(item) = self.store.claim_pending().await? else {
            return Ok(false);
        };
        info!(id = item.id, file = item.filename(), "processing item");

        // A retry after a successful move resumes at the media-server stage.
        if item.new_path.is_some() {
            info!(id = item.id, "file already moved, skipping to moved");
            self.store
                .update_status(item.id, ItemStatus::Moved, UpdateFields::default())
                .await?;
            return Ok(true);
        }

        match self.handle_item(&item).await {
            Ok(fields) => {
                self.store
                    .update_status(item.id, ItemStatus::Moved, fields)
                    .await?;
            }
            Err(failure) => {
                warn!(id = item.id, error = %failure.message, "item failed");
                if failure.quarantine {
                    self.quarantine(&item.file_path).await;
                }
                self.store
                    .update_status(
                        item.id,
                        ItemStatus::Error,
                        UpdateFields {
                            error_message: Some(failure.message),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }
        Ok(true)
    }
}

fn quarantine_file(error_dir: &Path, file_path: &str) {
    let source = Path::new(file_path);
    let Some(name) = source.file_name() else {
        return;
    };
    if let Err(e) = std::fs::create_dir_all(error_dir) {
        warn!(dir = %error_dir.display(), error = %e, "could not create error directory");
        return;
    }
    let target = error_dir.join(name);

    let result = std::fs::rename(source, &target).or_else(|_| {
        std::fs::copy(source, &target).and_then(|_| std::fs::remove_file(source))
    });
    match result {
        Ok(_) => info!(to = %target.display(), "moved file to errors"),
        Err(e) => warn!(file_path, error = %e, "failed to quarantine file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_quarantine_moves_file() {
        let watch = TempDir::new().unwrap();
        let errors = watch.path().join("errors");
        let source = watch.path().join("random clip.mp4");
        std::fs::write(&source, b"x").unwrap();

        quarantine_file(&errors, source.to_str().unwrap());

        assert!(!source.exists());
        assert!(errors.join("random clip.mp4").exists());
    }

    #[test]
    fn test_quarantine_missing_source_is_silent() {
        let watch = TempDir::new().unwrap();
        let errors = watch.path().join("errors");
        quarantine_file(&errors, watch.path().join("gone.mp4").to_str().unwrap());
        assert!(!errors.join("gone.mp4").exists());
    }

    #[test]
    fn test_step_failure_classifiers() {
        let failure =
            StepFailure::with_quarantine("No movie code found in filename: a.mp4".to_string());
        assert!(failure.quarantine);
        assert!(failure.message.starts_with("No movie code"));

        let failure = StepFailure::new("File move failure: disk full".to_string());
        assert!(!failure.quarantine);
    }
}
