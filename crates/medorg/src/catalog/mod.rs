//! Catalog search client.
//!
//! Queries an ordered list of named sources for movie metadata. Each source
//! is one POST to `{base}/<source>/search`; the first hit wins. A miss on
//! every source triggers one retry of the whole sequence before giving up.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::CatalogConfig;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<Value>,
}

/// A catalog record, parsed for the fields the pipeline consumes.
///
/// `raw` keeps the source response verbatim for queue persistence.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogRecord {
    #[serde(skip)]
    pub raw: Value,
    pub movie_code: Option<String>,
    pub title: Option<String>,
    #[serde(deserialize_with = "string_or_list")]
    pub actress: Vec<String>,
    pub original_title: Option<String>,
    pub overview: Option<String>,
    /// ISO `YYYY-MM-DD`.
    pub release_date: Option<String>,
    #[serde(deserialize_with = "string_or_list")]
    pub genre: Vec<String>,
    pub maker: Option<String>,
    pub label: Option<String>,
    pub series: Option<String>,
    pub image_cropped: Option<String>,
    pub raw_image_url: Option<String>,
}

impl CatalogRecord {
    pub fn from_value(value: &Value) -> Option<Self> {
        let mut record: CatalogRecord = serde_json::from_value(value.clone()).ok()?;
        record.raw = value.clone();
        Some(record)
    }

    /// Preferred image source: the cropped variant when present.
    pub fn image_url(&self) -> Option<&str> {
        self.image_cropped
            .as_deref()
            .filter(|u| !u.is_empty())
            .or(self.raw_image_url.as_deref().filter(|u| !u.is_empty()))
    }
}

/// Some sources emit `genre` (and occasionally `actress`) as a single
/// comma-separated string instead of a list.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Raw::One(s)) => s
            .split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        Some(Raw::Many(items)) => items,
    })
}

pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    search_order: Vec<String>,
}

impl CatalogClient {
    pub fn new(config: &CatalogConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            search_order: config.search_order.clone(),
        }
    }

    /// Search all configured sources for `movie_code`.
    ///
    /// Runs the source sequence up to twice; returns the first successful
    /// record, or `None` when every source missed both times. Per-source
    /// failures (transport errors, non-2xx, unexpected shapes) are logged
    /// and treated as misses.
    pub async fn search(&self, movie_code: &str) -> Option<CatalogRecord> {
        for attempt in 1..=2 {
            for source in &self.search_order {
                if let Some(record) = self.search_source(source, movie_code).await {
                    return Some(record);
                }
            }
            if attempt == 1 {
                info!(movie_code, "all catalog sources missed, retrying sequence");
            }
        }
        None
    }

    async fn search_source(&self, source: &str, movie_code: &str) -> Option<CatalogRecord> {
        let url = format!("{}/{}/search", self.base_url, source);

        let mut request = self
            .http
            .post(&url)
            .timeout(SEARCH_TIMEOUT)
            .json(&serde_json::json!({ "moviecode": movie_code }));
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(movie_code, source, error = %e, "catalog request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(
                movie_code,
                source,
                status = %response.status(),
                "catalog source returned non-success status"
            );
            return None;
        }

        let body: SearchResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(movie_code, source, error = %e, "catalog response was not valid JSON");
                return None;
            }
        };

        match body {
            SearchResponse {
                success: true,
                data: Some(data),
            } if !data.is_null() && data.as_object().map_or(true, |o| !o.is_empty()) => {
                match CatalogRecord::from_value(&data) {
                    Some(record) => {
                        info!(movie_code, source, "found catalog metadata");
                        Some(record)
                    }
                    None => {
                        warn!(movie_code, source, "catalog data had an unexpected shape");
                        None
                    }
                }
            }
            _ => {
                debug!(movie_code, source, "no catalog result");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_from_full_value() {
        let value = json!({
            "movie_code": "SONE-760",
            "title": "The Same Commute Train As Always",
            "actress": ["Ruri Saijo"],
            "original_title": "いつもと同じ通勤電車",
            "overview": "A long synopsis.",
            "release_date": "2026-01-15",
            "genre": ["Drama", "Train"],
            "label": "S1 NO.1 STYLE",
            "image_cropped": "https://img.example/crop.jpg?horizontal=1"
        });

        let record = CatalogRecord::from_value(&value).unwrap();
        assert_eq!(record.movie_code.as_deref(), Some("SONE-760"));
        assert_eq!(record.actress, vec!["Ruri Saijo"]);
        assert_eq!(record.genre, vec!["Drama", "Train"]);
        assert_eq!(record.label.as_deref(), Some("S1 NO.1 STYLE"));
        assert_eq!(record.raw, value);
    }

    #[test]
    fn test_record_tolerates_missing_fields() {
        let record = CatalogRecord::from_value(&json!({ "title": "Bare" })).unwrap();
        assert_eq!(record.title.as_deref(), Some("Bare"));
        assert!(record.actress.is_empty());
        assert!(record.genre.is_empty());
        assert!(record.image_url().is_none());
    }

    #[test]
    fn test_genre_accepts_comma_separated_string() {
        let record =
            CatalogRecord::from_value(&json!({ "genre": "Drama, Train , " })).unwrap();
        assert_eq!(record.genre, vec!["Drama", "Train"]);
    }

    #[test]
    fn test_image_url_prefers_cropped() {
        let record = CatalogRecord::from_value(&json!({
            "image_cropped": "https://img/c.jpg",
            "raw_image_url": "https://img/r.jpg"
        }))
        .unwrap();
        assert_eq!(record.image_url(), Some("https://img/c.jpg"));
    }

    #[test]
    fn test_image_url_falls_back_to_raw() {
        let record = CatalogRecord::from_value(&json!({
            "image_cropped": "",
            "raw_image_url": "https://img/r.jpg"
        }))
        .unwrap();
        assert_eq!(record.image_url(), Some("https://img/r.jpg"));
    }

    #[test]
    fn test_search_response_miss_shapes() {
        let miss: SearchResponse =
            serde_json::from_value(json!({ "success": false, "data": null })).unwrap();
        assert!(!miss.success);

        let empty: SearchResponse =
            serde_json::from_value(json!({ "success": true, "data": {} })).unwrap();
        assert!(empty.data.unwrap().as_object().unwrap().is_empty());
    }
}
