use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::quiz::Corner;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("{url} returned an unreadable body: {message}")]
    Body { url: String, message: String },
}

/// Somewhere candidate lists can be fetched from, addressed by location.
#[async_trait]
pub trait ListSource: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<Vec<Corner>, FetchError>;
}

/// Turns a decoded JSON body into corners.
///
/// Anything but an array counts as empty; array items without a string
/// `key` are skipped rather than failing the whole list.
pub fn corners_from_json(location: &str, body: Value) -> Vec<Corner> {
    let items = match body {
        Value::Array(items) => items,
        _ => {
            warn!("[fetch] {} is not a JSON array", location);
            return Vec::new();
        }
    };

    let total = items.len();
    let corners: Vec<Corner> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();

    if corners.len() != total {
        debug!(
            "[fetch] skipped {} malformed records in {}",
            total - corners.len(),
            location
        );
    }
    corners
}

pub struct HttpListSource {
    client: Client,
}

impl HttpListSource {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ListSource for HttpListSource {
    async fn fetch(&self, location: &str) -> Result<Vec<Corner>, FetchError> {
        let resp = self
            .client
            .get(location)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: location.to_string(),
                source,
            })?;

        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: location.to_string(),
                status: resp.status().as_u16(),
            });
        }

        let body: Value = resp.json().await.map_err(|e| FetchError::Body {
            url: location.to_string(),
            message: e.to_string(),
        })?;

        let list = corners_from_json(location, body);
        debug!("[fetch] {} items: {}", location, list.len());
        Ok(list)
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// In-memory source that records every fetch and fails for unknown or
    /// explicitly broken locations.
    #[derive(Default)]
    pub struct StubSource {
        lists: HashMap<String, Vec<Corner>>,
        broken: HashMap<String, u16>,
        calls: Mutex<Vec<String>>,
    }

    impl StubSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_list(mut self, location: &str, list: Vec<Corner>) -> Self {
            self.lists.insert(location.to_string(), list);
            self
        }

        pub fn with_status(mut self, location: &str, status: u16) -> Self {
            self.broken.insert(location.to_string(), status);
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn fetch_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ListSource for StubSource {
        async fn fetch(&self, location: &str) -> Result<Vec<Corner>, FetchError> {
            self.calls.lock().unwrap().push(location.to_string());
            if let Some(status) = self.broken.get(location) {
                return Err(FetchError::Status {
                    url: location.to_string(),
                    status: *status,
                });
            }
            self.lists
                .get(location)
                .cloned()
                .ok_or_else(|| FetchError::Status {
                    url: location.to_string(),
                    status: 404,
                })
        }
    }

    pub fn corner(key: &str, name: &str, slogan: &str) -> Corner {
        Corner {
            key: key.to_string(),
            corner: name.to_string(),
            slogan: slogan.to_string(),
            image: format!("/assets/{}.jpg", key),
            color: "#102030".to_string(),
        }
    }
}
