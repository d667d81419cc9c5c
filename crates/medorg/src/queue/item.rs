//! The queue row model.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::QueueError;

/// Row status; the status column is the state machine.
///
/// Flow: `pending -> processing -> moved -> emby_pending -> completed`,
/// with `error` reachable from either in-flight status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Moved,
    EmbyPending,
    Completed,
    Error,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 6] = [
        ItemStatus::Pending,
        ItemStatus::Processing,
        ItemStatus::Moved,
        ItemStatus::EmbyPending,
        ItemStatus::Completed,
        ItemStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Moved => "moved",
            ItemStatus::EmbyPending => "emby_pending",
            ItemStatus::Completed => "completed",
            ItemStatus::Error => "error",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| QueueError::InvalidStatus(s.to_string()))
    }
}

/// One queued file. The row is both the unit of work and the unit of state.
#[derive(Debug, Clone, FromRow)]
pub struct QueueItem {
    pub id: i64,
    pub file_path: String,
    pub movie_code: Option<String>,
    pub actress: Option<String>,
    pub subtitle: Option<String>,
    pub status: ItemStatus,
    pub error_message: Option<String>,
    pub new_path: Option<String>,
    pub emby_item_id: Option<String>,
    pub metadata_json: Option<serde_json::Value>,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    /// Basename of the original watched path.
    pub fn filename(&self) -> &str {
        Path::new(&self.file_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.file_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in ItemStatus::ALL {
            assert_eq!(status.as_str().parse::<ItemStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_status_parse_rejects_unknown() {
        assert!("done".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn test_status_display_matches_db_form() {
        assert_eq!(ItemStatus::EmbyPending.to_string(), "emby_pending");
    }
}
