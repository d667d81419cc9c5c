//! Media-server HTTP client.
//!
//! Covers the narrow surface the pipeline needs: targeted rescans, item
//! lookup by path (with the indexing-wait protocol), the modify-and-post
//! metadata write, and image management (see [`images`]).

pub mod images;

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::catalog::CatalogRecord;
use crate::config::EmbyConfig;
use crate::error::EmbyError;

const TOKEN_HEADER: &str = "X-Emby-Token";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

// The server needs a moment to persist a posted item before a read-back.
const VERIFY_PAUSE: Duration = Duration::from_secs(1);

pub struct EmbyClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    user_id: String,
    parent_folder_id: String,
    scan_retry_delays: Vec<u64>,
}

impl EmbyClient {
    pub fn new(config: &EmbyConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            user_id: config.user_id.clone(),
            parent_folder_id: config.parent_folder_id.clone(),
            scan_retry_delays: config.scan_retry_delays.clone(),
        }
    }

    pub fn parent_folder_id(&self) -> &str {
        &self.parent_folder_id
    }

    /// Trigger a recursive rescan of one folder. Fire-and-forget; any 2xx
    /// (or 204) counts as accepted.
    pub async fn refresh_folder(&self, folder_id: &str) -> Result<(), EmbyError> {
        let endpoint = format!("{}/Items/{}/Refresh", self.base_url, folder_id);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("Recursive", "true")])
            .header(TOKEN_HEADER, &self.api_key)
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbyError::Status {
                status: response.status(),
                endpoint,
            });
        }
        info!(folder_id, "rescan triggered");
        Ok(())
    }

    /// Full item record, via the user-scoped endpoint when a user id is
    /// configured (some servers require it for item access).
    pub async fn get_item_details(&self, item_id: &str) -> Result<Value, EmbyError> {
        let endpoint = if self.user_id.is_empty() {
            format!("{}/Items/{}", self.base_url, item_id)
        } else {
            format!("{}/Users/{}/Items/{}", self.base_url, self.user_id, item_id)
        };
        let response = self
            .http
            .get(&endpoint)
            .header(TOKEN_HEADER, &self.api_key)
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(EmbyError::ItemNotFound(item_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(EmbyError::Status {
                status: response.status(),
                endpoint,
            });
        }
        Ok(response.json().await?)
    }

    async fn list_items(&self) -> Result<Vec<Value>, EmbyError> {
        let endpoint = format!("{}/Items", self.base_url);
        let response = self
            .http
            .get(&endpoint)
            .query(&[("Recursive", "true"), ("Fields", "Path")])
            .header(TOKEN_HEADER, &self.api_key)
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbyError::Status {
                status: response.status(),
                endpoint,
            });
        }

        let mut body: Value = response.json().await?;
        match body.get_mut("Items").map(Value::take) {
            Some(Value::Array(items)) => Ok(items),
            _ => Ok(Vec::new()),
        }
    }

    /// Exact-match lookup on the item `Path`, filtered client-side.
    pub async fn find_item_by_path(&self, file_path: &str) -> Result<Option<Value>, EmbyError> {
        let items = self.list_items().await?;
        Ok(items
            .into_iter()
            .find(|item| item.get("Path").and_then(Value::as_str) == Some(file_path)))
    }

    /// Fallback lookup: the same listing, matching on the basename instead
    /// of the full path.
    pub async fn find_item_by_filename(&self, filename: &str) -> Result<Option<Value>, EmbyError> {
        let items = self.list_items().await?;
        Ok(items.into_iter().find(|item| {
            item.get("Path")
                .and_then(Value::as_str)
                .map(|p| Path::new(p).file_name().and_then(|n| n.to_str()) == Some(filename))
                .unwrap_or(false)
        }))
    }

    /// Indexing-wait protocol: poll find-by-path across the backoff
    /// schedule, then fall back to find-by-filename. Per-attempt transport
    /// errors are logged and treated as misses.
    pub async fn wait_for_item(&self, file_path: &str) -> Option<Value> {
        match self.find_item_by_path(file_path).await {
            Ok(Some(item)) => return Some(item),
            Ok(None) => {}
            Err(e) => warn!(file_path, error = %e, "item lookup failed"),
        }

        for (attempt, delay) in self.scan_retry_delays.iter().enumerate() {
            debug!(
                file_path,
                attempt = attempt + 1,
                total = self.scan_retry_delays.len(),
                delay,
                "item not indexed yet, waiting"
            );
            tokio::time::sleep(Duration::from_secs(*delay)).await;

            match self.find_item_by_path(file_path).await {
                Ok(Some(item)) => {
                    info!(file_path, attempt = attempt + 1, "item indexed");
                    return Some(item);
                }
                Ok(None) => {}
                Err(e) => warn!(file_path, error = %e, "item lookup failed"),
            }
        }

        let filename = Path::new(file_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(file_path);
        info!(filename, "path lookups exhausted, trying filename fallback");
        match self.find_item_by_filename(filename).await {
            Ok(found) => found,
            Err(e) => {
                warn!(filename, error = %e, "filename lookup failed");
                None
            }
        }
    }

    /// Modify-and-post write: GET the item, overlay catalog metadata, POST
    /// the whole record back, then read it back to confirm the write stuck.
    pub async fn update_item_metadata(
        &self,
        item_id: &str,
        record: &CatalogRecord,
    ) -> Result<(), EmbyError> {
        let mut item = self.get_item_details(item_id).await?;
        apply_catalog_metadata(&mut item, record);
        self.post_item(item_id, &item).await?;

        tokio::time::sleep(VERIFY_PAUSE).await;
        let persisted = self.get_item_details(item_id).await?;
        let mismatches = verify_metadata(&item, &persisted);
        if !mismatches.is_empty() {
            return Err(EmbyError::VerificationFailed {
                item_id: item_id.to_string(),
                mismatches: mismatches.join("; "),
            });
        }

        info!(item_id, "metadata updated and verified");
        Ok(())
    }

    async fn post_item(&self, item_id: &str, item: &Value) -> Result<(), EmbyError> {
        let endpoint = format!("{}/Items/{}", self.base_url, item_id);
        let response = self
            .http
            .post(&endpoint)
            .header(TOKEN_HEADER, &self.api_key)
            .timeout(WRITE_TIMEOUT)
            .json(item)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbyError::Status {
                status: response.status(),
                endpoint,
            });
        }
        Ok(())
    }
}

/// Overlay catalog metadata onto a server item record, in place.
///
/// `Name`/`SortName`/`ForcedSortName` come from the item's own on-disk
/// basename, never from a catalog title. `LockData` pins the write against
/// the server's own scrapers.
pub(crate) fn apply_catalog_metadata(item: &mut Value, record: &CatalogRecord) {
    if !item.is_object() {
        warn!("item record is not a JSON object, skipping metadata overlay");
        return;
    }

    if let Some(name) = item
        .get("Path")
        .and_then(Value::as_str)
        .map(basename_without_extension)
    {
        item["Name"] = json!(name);
        item["SortName"] = json!(name);
        item["ForcedSortName"] = json!(name);
    }

    item["OriginalTitle"] = json!(record.original_title.clone().unwrap_or_default());
    item["Overview"] = json!(record.overview.clone().unwrap_or_default());
    item["PreferredMetadataLanguage"] = json!("en");
    item["PreferredMetadataCountryCode"] = json!("JP");
    item["ProductionLocations"] = json!(["Japan"]);
    item["ProviderIds"] = json!({});

    if let Some(release_date) = record.release_date.as_deref().filter(|d| !d.is_empty()) {
        item["PremiereDate"] = json!(release_date);
        match parse_year(release_date) {
            Some(year) => item["ProductionYear"] = json!(year),
            None => warn!(release_date, "could not parse year from release date"),
        }
    }

    let people: Vec<Value> = record
        .actress
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(|name| json!({ "Name": name, "Type": "Actor" }))
        .collect();
    if !people.is_empty() {
        item["People"] = Value::Array(people);
    }

    if !record.genre.is_empty() {
        item["GenreItems"] = Value::Array(
            record
                .genre
                .iter()
                .map(|genre| json!({ "Name": genre }))
                .collect(),
        );
    }

    if let Some(label) = record.label.as_deref().filter(|l| !l.is_empty()) {
        item["Studios"] = json!([{ "Name": label }]);
    }

    item["LockData"] = json!(true);
}

/// Compare the fields the write cares about; a non-empty expectation that
/// did not persist is a mismatch.
pub(crate) fn verify_metadata(expected: &Value, persisted: &Value) -> Vec<String> {
    let mut mismatches = Vec::new();

    for field in ["Name", "OriginalTitle", "Overview"] {
        let want = expected.get(field).and_then(Value::as_str).unwrap_or("");
        let got = persisted.get(field).and_then(Value::as_str).unwrap_or("");
        if !want.is_empty() && want != got {
            mismatches.push(format!("{field}: expected {want:?}, got {got:?}"));
        }
    }

    if persisted.get("LockData").and_then(Value::as_bool) != Some(true) {
        mismatches.push("LockData: not set".to_string());
    }

    mismatches
}

fn basename_without_extension(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    let basename = normalized.rsplit('/').next().unwrap_or(&normalized);
    match basename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => basename.to_string(),
    }
}

fn parse_year(release_date: &str) -> Option<i32> {
    release_date.split('-').next()?.parse().ok()
}

/// The opaque item id, whichever JSON type the server used for it.
pub(crate) fn item_id(item: &Value) -> Option<String> {
    match item.get("Id") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> CatalogRecord {
        CatalogRecord::from_value(&json!({
            "movie_code": "SONE-760",
            "title": "The Same Commute Train As Always",
            "actress": ["Ruri Saijo", " Second Name "],
            "original_title": "いつもと同じ通勤電車",
            "overview": "Synopsis.",
            "release_date": "2026-01-15",
            "genre": ["Drama"],
            "label": "S1 NO.1 STYLE"
        }))
        .unwrap()
    }

    #[test]
    fn test_apply_sets_name_from_path() {
        let mut item = json!({
            "Id": "abc",
            "Path": "/destination/Ruri Saijo/Ruri Saijo - [English Sub] SONE-760 Train.mp4",
            "Name": "scraped name"
        });
        apply_catalog_metadata(&mut item, &record());

        let expected = "Ruri Saijo - [English Sub] SONE-760 Train";
        assert_eq!(item["Name"], json!(expected));
        assert_eq!(item["SortName"], json!(expected));
        assert_eq!(item["ForcedSortName"], json!(expected));
    }

    #[test]
    fn test_apply_maps_catalog_fields() {
        let mut item = json!({ "Path": "/d/a/f.mp4" });
        apply_catalog_metadata(&mut item, &record());

        assert_eq!(item["OriginalTitle"], json!("いつもと同じ通勤電車"));
        assert_eq!(item["Overview"], json!("Synopsis."));
        assert_eq!(item["PremiereDate"], json!("2026-01-15"));
        assert_eq!(item["ProductionYear"], json!(2026));
        assert_eq!(item["PreferredMetadataLanguage"], json!("en"));
        assert_eq!(item["PreferredMetadataCountryCode"], json!("JP"));
        assert_eq!(item["LockData"], json!(true));
        assert_eq!(
            item["People"],
            json!([
                { "Name": "Ruri Saijo", "Type": "Actor" },
                { "Name": "Second Name", "Type": "Actor" }
            ])
        );
        assert_eq!(item["GenreItems"], json!([{ "Name": "Drama" }]));
        assert_eq!(item["Studios"], json!([{ "Name": "S1 NO.1 STYLE" }]));
    }

    #[test]
    fn test_apply_without_release_date() {
        let mut item = json!({ "Path": "/d/a/f.mp4" });
        let record = CatalogRecord::from_value(&json!({ "title": "x" })).unwrap();
        apply_catalog_metadata(&mut item, &record);

        assert!(item.get("PremiereDate").is_none());
        assert!(item.get("ProductionYear").is_none());
        assert_eq!(item["LockData"], json!(true));
    }

    #[test]
    fn test_verify_detects_mismatch() {
        let expected = json!({ "Name": "right", "OriginalTitle": "", "Overview": "o", "LockData": true });
        let persisted = json!({ "Name": "wrong", "Overview": "o", "LockData": true });

        let mismatches = verify_metadata(&expected, &persisted);
        assert_eq!(mismatches.len(), 1);
        assert!(mismatches[0].starts_with("Name:"));
    }

    #[test]
    fn test_verify_requires_lock_data() {
        let expected = json!({ "Name": "n" });
        let persisted = json!({ "Name": "n", "LockData": false });
        assert_eq!(verify_metadata(&expected, &persisted), vec!["LockData: not set"]);
    }

    #[test]
    fn test_verify_clean() {
        let expected = json!({ "Name": "n", "Overview": "o" });
        let persisted = json!({ "Name": "n", "Overview": "o", "LockData": true });
        assert!(verify_metadata(&expected, &persisted).is_empty());
    }

    #[test]
    fn test_basename_without_extension() {
        assert_eq!(basename_without_extension("/a/b/c.mp4"), "c");
        assert_eq!(basename_without_extension("c:\\media\\f.mkv"), "f");
        assert_eq!(basename_without_extension("/a/noext"), "noext");
        assert_eq!(basename_without_extension("/a/.hidden"), ".hidden");
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("2026-01-15"), Some(2026));
        assert_eq!(parse_year("not-a-date"), None);
    }

    #[test]
    fn test_item_id_string_or_number() {
        assert_eq!(item_id(&json!({ "Id": "abc" })), Some("abc".to_string()));
        assert_eq!(item_id(&json!({ "Id": 42 })), Some("42".to_string()));
        assert_eq!(item_id(&json!({})), None);
    }
}
