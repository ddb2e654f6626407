use std::env;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_LISTS: [&str; 3] = ["/data/list1.json", "/data/list2.json", "/data/list3.json"];
pub const DEFAULT_DIALOGUE_DB: &str = "db.sqlite";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is not a valid URL: {value}")]
    BadUrl { name: &'static str, value: String },
    #[error("CORNER_LISTS names no lists")]
    NoLists,
    #[error("{name} is not a number: {value}")]
    BadNumber { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Candidate list URLs in source scan order.
    pub list_urls: Vec<String>,
    pub assets_base_url: Url,
    /// Session store file; `None` keeps the session in memory.
    pub store_path: Option<PathBuf>,
    pub dialogue_db: String,
    pub fetch_timeout: Duration,
}

impl Config {
    /// Reads the environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let base_raw = var("CORNER_LISTS_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base = parse_url("CORNER_LISTS_BASE_URL", &base_raw)?;

        let lists: Vec<String> = match var("CORNER_LISTS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_LISTS.iter().map(|s| s.to_string()).collect(),
        };
        if lists.is_empty() {
            return Err(ConfigError::NoLists);
        }
        let list_urls = lists
            .iter()
            .map(|path| {
                base.join(path)
                    .map(String::from)
                    .map_err(|_| ConfigError::BadUrl {
                        name: "CORNER_LISTS",
                        value: path.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let assets_base_url = match var("CORNER_ASSETS_BASE_URL") {
            Some(raw) => parse_url("CORNER_ASSETS_BASE_URL", &raw)?,
            None => base,
        };

        let fetch_timeout = match var("FETCH_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::BadNumber {
                name: "FETCH_TIMEOUT_SECS",
                value: raw.clone(),
            })?,
            None => DEFAULT_FETCH_TIMEOUT_SECS,
        };

        Ok(Self {
            list_urls,
            assets_base_url,
            store_path: var("SESSION_STORE_PATH").map(PathBuf::from),
            dialogue_db: var("DIALOGUE_DB").unwrap_or_else(|| DEFAULT_DIALOGUE_DB.to_string()),
            fetch_timeout: Duration::from_secs(fetch_timeout),
        })
    }

    /// Absolute URL for an image reference, relative ones resolved against the asset base.
    pub fn asset_url(&self, reference: &str) -> Option<Url> {
        self.assets_base_url.join(reference).ok()
    }
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|_| ConfigError::BadUrl {
        name,
        value: value.to_string(),
    })
}
