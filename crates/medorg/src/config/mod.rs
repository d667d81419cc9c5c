//! Environment-backed configuration.
//!
//! Every setting has a default; a `.env` file is honored when present
//! (loaded by the binaries before `Config::from_env` runs).

use std::env;
use std::path::PathBuf;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub watch_dir: PathBuf,
    pub destination_dir: PathBuf,
    pub error_dir: PathBuf,
    /// Lower-cased extensions with leading dot, e.g. `.mp4`.
    pub video_extensions: Vec<String>,
    pub catalog: CatalogConfig,
    pub emby: EmbyConfig,
    pub stability: StabilityConfig,
    pub retry: RetryConfig,
    pub workers: WorkerIntervals,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub base_url: String,
    pub token: String,
    pub search_order: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EmbyConfig {
    pub base_url: String,
    pub api_key: String,
    pub user_id: String,
    pub parent_folder_id: String,
    /// Seconds between indexing-wait attempts.
    pub scan_retry_delays: Vec<u64>,
}

impl EmbyConfig {
    /// The updater idles when the media server is not configured.
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.api_key.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct StabilityConfig {
    pub check_interval_seconds: u64,
    pub min_stable_checks: u32,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: i32,
    pub backoff_minutes: Vec<i64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_minutes: vec![1, 5, 15],
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerIntervals {
    pub file_processor_secs: u64,
    pub emby_updater_secs: u64,
    pub retry_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

impl DatabaseConfig {
    /// `DATABASE_URL` wins; otherwise the URL is assembled from the
    /// decomposed fields.
    pub fn connect_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let credentials = if self.password.is_empty() {
            self.user.clone()
        } else {
            format!("{}:{}", self.user, self.password)
        };
        format!(
            "postgres://{}@{}:{}/{}",
            credentials, self.host, self.port, self.dbname
        )
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            watch_dir: PathBuf::from(env_or("WATCH_DIR", "/watch")),
            destination_dir: PathBuf::from(env_or("DESTINATION_DIR", "/destination")),
            error_dir: PathBuf::from(env_or("ERROR_DIR", "/watch/errors")),
            video_extensions: parse_extensions(&env_or(
                "VIDEO_EXTENSIONS",
                ".mp4,.mkv,.avi,.wmv",
            )),
            catalog: CatalogConfig {
                base_url: env_or("API_BASE_URL", ""),
                token: env_or("API_TOKEN", ""),
                search_order: parse_list(&env_or("API_SEARCH_ORDER", "missav,javguru")),
            },
            emby: EmbyConfig {
                base_url: env_or("EMBY_BASE_URL", ""),
                api_key: env_or("EMBY_API_KEY", ""),
                user_id: env_or("EMBY_USER_ID", ""),
                parent_folder_id: env_or("EMBY_PARENT_FOLDER_ID", "4"),
                scan_retry_delays: parse_numbers("EMBY_SCAN_RETRY_DELAYS", "2,4,8,16,32,64")?,
            },
            stability: StabilityConfig {
                check_interval_seconds: parse_num("STABILITY_CHECK_INTERVAL", 5)?,
                min_stable_checks: parse_num("STABILITY_MIN_CHECKS", 2)?,
            },
            retry: RetryConfig {
                max_retries: parse_num("MAX_RETRIES", 3)?,
                backoff_minutes: parse_numbers("RETRY_BACKOFF_MINUTES", "1,5,15")?,
            },
            workers: WorkerIntervals {
                file_processor_secs: parse_num("WORKER_FILE_PROCESSOR_INTERVAL", 2)?,
                emby_updater_secs: parse_num("WORKER_EMBY_UPDATER_INTERVAL", 5)?,
                retry_secs: parse_num("WORKER_RETRY_INTERVAL", 30)?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
                host: env_or("DB_HOST", "localhost"),
                port: parse_num("DB_PORT", 5432)?,
                dbname: env_or("DB_NAME", "medorg"),
                user: env_or("DB_USER", "medorg"),
                password: env_or("DB_PASSWORD", ""),
            },
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Normalizes extensions to lower-case with a leading dot.
fn parse_extensions(raw: &str) -> Vec<String> {
    parse_list(raw)
        .into_iter()
        .map(|ext| {
            let ext = ext.to_lowercase();
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{ext}")
            }
        })
        .collect()
}

fn parse_num<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.is_empty() => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw,
            reason: "expected a number".to_string(),
        }),
        _ => Ok(default),
    }
}

fn parse_numbers<T: std::str::FromStr>(
    name: &'static str,
    default: &str,
) -> Result<Vec<T>, ConfigError> {
    let raw = env_or(name, default);
    let mut out = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        out.push(part.parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: "expected a comma-separated list of numbers".to_string(),
        })?);
    }
    if out.is_empty() {
        return Err(ConfigError::Invalid {
            name,
            value: raw,
            reason: "list must not be empty".to_string(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extensions_normalized() {
        assert_eq!(
            parse_extensions("mp4, .MKV ,avi"),
            vec![".mp4", ".mkv", ".avi"]
        );
    }

    #[test]
    fn test_parse_list_skips_empty() {
        assert_eq!(parse_list("missav,,javguru,"), vec!["missav", "javguru"]);
    }

    #[test]
    fn test_connect_url_from_parts() {
        let db = DatabaseConfig {
            url: None,
            host: "db".to_string(),
            port: 5432,
            dbname: "medorg".to_string(),
            user: "ingest".to_string(),
            password: "secret".to_string(),
        };
        assert_eq!(db.connect_url(), "postgres://ingest:secret@db:5432/medorg");
    }

    #[test]
    fn test_connect_url_without_password() {
        let db = DatabaseConfig {
            url: None,
            host: "localhost".to_string(),
            port: 5433,
            dbname: "q".to_string(),
            user: "u".to_string(),
            password: String::new(),
        };
        assert_eq!(db.connect_url(), "postgres://u@localhost:5433/q");
    }

    #[test]
    fn test_connect_url_prefers_full_url() {
        let db = DatabaseConfig {
            url: Some("postgres://a:b@c/d".to_string()),
            host: "ignored".to_string(),
            port: 1,
            dbname: "x".to_string(),
            user: "y".to_string(),
            password: "z".to_string(),
        };
        assert_eq!(db.connect_url(), "postgres://a:b@c/d");
    }

    #[test]
    fn test_retry_defaults() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.backoff_minutes, vec![1, 5, 15]);
    }
}
