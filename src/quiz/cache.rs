// Session-wide cache of candidate lists, backed by the session store.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, warn};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::quiz::source::ListSource;
use crate::quiz::store::SessionStore;
use crate::quiz::Corner;

/// Store key of the persisted list snapshot.
pub const SNAPSHOT_KEY: &str = "listsCache_v2";

pub type CornerList = Arc<Vec<Corner>>;

pub struct ListCache {
    locations: Vec<String>,
    source: Arc<dyn ListSource>,
    store: Arc<dyn SessionStore>,
    slots: RwLock<Vec<Option<CornerList>>>,
    ready: watch::Sender<bool>,
    // serialises full loads so two callers never fan out twice
    load_lock: Mutex<()>,
}

impl ListCache {
    pub fn new(
        locations: Vec<String>,
        source: Arc<dyn ListSource>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let slots = vec![None; locations.len()];
        let (ready, _) = watch::channel(false);
        Self {
            locations,
            source,
            store,
            slots: RwLock::new(slots),
            ready,
            load_lock: Mutex::new(()),
        }
    }

    pub fn location(&self, index: usize) -> Option<&str> {
        self.locations.get(index).map(String::as_str)
    }

    pub fn source_count(&self) -> usize {
        self.locations.len()
    }

    /// True once every list is held in memory.
    pub fn is_loaded(&self) -> bool {
        *self.ready.borrow()
    }

    /// Observes the "fully loaded" flag.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    pub async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        // the sender lives as long as `self`, so this only ends once ready
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Waits for the full load for at most `limit`; returns whether it finished.
    pub async fn wait_ready_for(&self, limit: Duration) -> bool {
        timeout(limit, self.wait_ready()).await.is_ok()
    }

    /// Starts the eager load in the background.
    pub fn spawn_prefetch(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            cache.ensure_loaded().await;
        })
    }

    /// Loads every list at most once per session and returns them in source order.
    ///
    /// A persisted snapshot with exactly one entry per source wins; otherwise
    /// all sources are fetched concurrently. A failed source reads as an empty
    /// list, and the snapshot is only persisted when every fetch succeeded so
    /// a later session fetches the failed source again.
    pub async fn ensure_loaded(&self) -> Vec<CornerList> {
        let _guard = self.load_lock.lock().await;

        if self.is_loaded() {
            return self.snapshot().await;
        }

        if let Some(lists) = self.read_snapshot() {
            info!("[prefetch] loaded lists from session store");
            self.fill(lists).await;
            return self.snapshot().await;
        }

        let fetches = self
            .locations
            .iter()
            .map(|location| self.source.fetch(location));
        let results = join_all(fetches).await;

        let mut failed = 0;
        let lists: Vec<Vec<Corner>> = results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|err| {
                    warn!("[prefetch] {}, using an empty list", err);
                    failed += 1;
                    Vec::new()
                })
            })
            .collect();

        if failed == 0 {
            self.write_snapshot(&lists);
        } else {
            warn!("[prefetch] {} lists failed, snapshot kept in memory only", failed);
        }
        self.fill(lists).await;
        info!("[prefetch] lists fetched and cached");
        self.snapshot().await
    }

    /// Returns the list at `index`, fetching just that list on a miss.
    ///
    /// A failed fetch yields an empty list and leaves the slot empty so a
    /// later call can retry. `None` means the index names no source.
    pub async fn get(&self, index: usize) -> Option<CornerList> {
        let location = self.locations.get(index)?;

        if let Some(list) = self.slots.read().await[index].clone() {
            return Some(list);
        }

        let list = match self.source.fetch(location).await {
            Ok(list) => Arc::new(list),
            Err(err) => {
                warn!("[cache] {}, treating source {} as empty", err, index);
                return Some(Arc::new(Vec::new()));
            }
        };

        let complete = {
            let mut slots = self.slots.write().await;
            slots[index] = Some(Arc::clone(&list));
            slots.iter().all(Option::is_some)
        };
        debug!("[cache] cached {} ({} items)", location, list.len());

        if complete && !self.is_loaded() {
            let lists: Vec<Vec<Corner>> = self
                .snapshot()
                .await
                .iter()
                .map(|l| l.as_ref().clone())
                .collect();
            self.write_snapshot(&lists);
            self.ready.send_replace(true);
        }

        Some(list)
    }

    /// Current contents in source order; missing slots read as empty.
    pub async fn snapshot(&self) -> Vec<CornerList> {
        self.slots
            .read()
            .await
            .iter()
            .map(|slot| slot.clone().unwrap_or_default())
            .collect()
    }

    async fn fill(&self, lists: Vec<Vec<Corner>>) {
        {
            let mut slots = self.slots.write().await;
            for (slot, list) in slots.iter_mut().zip(lists) {
                *slot = Some(Arc::new(list));
            }
        }
        self.ready.send_replace(true);
    }

    fn read_snapshot(&self) -> Option<Vec<Vec<Corner>>> {
        let raw = match self.store.get(SNAPSHOT_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!("[prefetch] {}", err);
                return None;
            }
        };

        match serde_json::from_str::<Vec<Vec<Corner>>>(&raw) {
            Ok(lists) if lists.len() == self.locations.len() => Some(lists),
            Ok(lists) => {
                debug!(
                    "[prefetch] ignoring snapshot with {} lists, expected {}",
                    lists.len(),
                    self.locations.len()
                );
                None
            }
            Err(err) => {
                warn!("[prefetch] ignoring unreadable snapshot: {}", err);
                None
            }
        }
    }

    fn write_snapshot(&self, lists: &[Vec<Corner>]) {
        let raw = match serde_json::to_string(lists) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("[prefetch] could not encode snapshot: {}", err);
                return;
            }
        };
        if let Err(err) = self.store.set(SNAPSHOT_KEY, &raw) {
            warn!("[prefetch] snapshot not persisted: {}", err);
        }
    }
}
