use std::sync::Arc;

use log::debug;

use crate::quiz::cache::ListCache;
use crate::quiz::Corner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub item: Corner,
    pub source_index: usize,
    pub source_list: String,
}

/// First record in `list` carrying `key`.
pub fn find_key<'a>(list: &'a [Corner], key: &str) -> Option<&'a Corner> {
    list.iter().find(|c| c.key == key)
}

/// Looks a key up across every candidate list in fixed source order.
pub struct ResolutionEngine {
    cache: Arc<ListCache>,
}

impl ResolutionEngine {
    pub fn new(cache: Arc<ListCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<ListCache> {
        &self.cache
    }

    /// Returns the first match scanning sources `0..N`.
    ///
    /// With a fully loaded cache this is a pure in-memory scan. Otherwise
    /// lists are fetched one at a time and the scan stops at the first hit,
    /// so later sources are never fetched once an earlier one matches.
    pub async fn resolve(&self, key: &str) -> Option<Resolution> {
        if self.cache.is_loaded() {
            let lists = self.cache.snapshot().await;
            return lists
                .iter()
                .enumerate()
                .find_map(|(index, list)| self.hit(index, list, key));
        }

        for index in 0..self.cache.source_count() {
            let Some(list) = self.cache.get(index).await else {
                continue;
            };
            if let Some(found) = self.hit(index, &list, key) {
                return Some(found);
            }
        }

        debug!("[resolve] no list has key {}", key);
        None
    }

    fn hit(&self, index: usize, list: &[Corner], key: &str) -> Option<Resolution> {
        let item = find_key(list, key)?.clone();
        let source_list = self.cache.location(index)?.to_string();
        debug!("[resolve] {} found in {}", key, source_list);
        Some(Resolution {
            item,
            source_index: index,
            source_list,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::source::testing::{corner, StubSource};
    use crate::quiz::store::MemoryStore;

    const L1: &str = "/data/list1.json";
    const L2: &str = "/data/list2.json";
    const L3: &str = "/data/list3.json";

    fn engine(source: Arc<StubSource>) -> ResolutionEngine {
        let locations = vec![L1.to_string(), L2.to_string(), L3.to_string()];
        let cache = ListCache::new(locations, source, Arc::new(MemoryStore::new()));
        ResolutionEngine::new(Arc::new(cache))
    }

    fn duplicated() -> StubSource {
        StubSource::new()
            .with_list(L1, vec![corner("5-5-5", "Other", "x")])
            .with_list(
                L2,
                vec![
                    corner("1-2-3", "Harbor View", "Calm catch"),
                    corner("1-2-3", "Harbor Shadow", "Second in list"),
                ],
            )
            .with_list(L3, vec![corner("1-2-3", "Late Harbor", "Later source")])
    }

    #[tokio::test]
    async fn earliest_source_wins_when_loaded() {
        let engine = engine(Arc::new(duplicated()));
        engine.cache().ensure_loaded().await;

        let found = engine.resolve("1-2-3").await.unwrap();
        assert_eq!(found.item.corner, "Harbor View");
        assert_eq!(found.source_index, 1);
        assert_eq!(found.source_list, L2);
    }

    #[tokio::test]
    async fn earliest_source_wins_when_scanning_lazily() {
        let source = Arc::new(duplicated());
        let engine = engine(source.clone());

        // warm a later list first; scan order must not care
        engine.cache().get(2).await;
        let found = engine.resolve("1-2-3").await.unwrap();

        assert_eq!(found.item.corner, "Harbor View");
        assert_eq!(source.calls(), vec![L3, L1, L2]);
    }

    #[tokio::test]
    async fn lazy_scan_stops_at_first_hit() {
        let source = Arc::new(
            StubSource::new()
                .with_list(L1, vec![corner("1-1-1", "Dock", "Salt air")])
                .with_list(L2, vec![])
                .with_list(L3, vec![]),
        );
        let engine = engine(source.clone());

        let found = engine.resolve("1-1-1").await.unwrap();
        assert_eq!(found.source_index, 0);
        assert_eq!(source.calls(), vec![L1]);
        assert!(!engine.cache().is_loaded());
    }

    #[tokio::test]
    async fn lazy_scan_survives_failing_sources() {
        let source = Arc::new(
            StubSource::new()
                .with_status(L1, 500)
                .with_list(L3, vec![corner("2-1-3", "Terrace", "Sun")]),
        );
        let engine = engine(source);

        let found = engine.resolve("2-1-3").await.unwrap();
        assert_eq!(found.source_list, L3);
    }

    #[tokio::test]
    async fn unknown_key_is_none() {
        let source = Arc::new(duplicated());
        let engine = engine(source.clone());

        assert!(engine.resolve("3-3-3").await.is_none());
        assert_eq!(source.fetch_count(), 3);
        // every list arrived one by one, which completes the cache
        assert!(engine.cache().is_loaded());

        assert!(engine.resolve("3-3-3").await.is_none());
        assert_eq!(source.fetch_count(), 3);
    }
}
