use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::quiz::resolve::{Resolution, ResolutionEngine};
use crate::quiz::store::SessionStore;
use crate::quiz::{Corner, Questionnaire};

/// Store key of the most recent result.
pub const RESULT_KEY: &str = "quizResult";

/// The record handed from the quiz to whatever renders the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPayload {
    pub answers: Vec<Option<u32>>,
    pub source_list: Option<String>,
    pub key: String,
    pub result: Corner,
    pub display_text: String,
}

impl ResultPayload {
    /// Builds the payload, falling back to the default corner without a match.
    ///
    /// `primary` is reported as the source when nothing matched.
    pub fn build(
        questionnaire: &Questionnaire,
        answers: Vec<Option<u32>>,
        key: String,
        found: Option<Resolution>,
        primary: Option<String>,
    ) -> Self {
        let matched = found.is_some();
        let (result, source_list) = match found {
            Some(found) => (found.item, Some(found.source_list)),
            None => (Corner::fallback(), primary),
        };
        let display_text = questionnaire.display_text(&result, matched, &answers);
        Self {
            answers,
            source_list,
            key,
            result,
            display_text,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.result.is_fallback()
    }

    /// Gives a fallback result one more lookup, e.g. after lists finished loading.
    ///
    /// The display text is rebuilt from the stored answers, not patched.
    pub async fn second_chance(
        mut self,
        questionnaire: &Questionnaire,
        engine: &ResolutionEngine,
    ) -> Self {
        if !self.is_fallback() {
            return self;
        }
        match engine.resolve(&self.key).await {
            Some(found) => {
                info!("[result] found key {} at render time in {}", self.key, found.source_list);
                self.display_text = questionnaire.display_text(&found.item, true, &self.answers);
                self.result = found.item;
                self.source_list = Some(found.source_list);
            }
            None => info!("[result] no match found in any list for key {}", self.key),
        }
        self
    }

    /// File name of the list the result came from, for the "found in" badge.
    pub fn source_file(&self) -> Option<&str> {
        let list = self.source_list.as_deref()?;
        list.rsplit('/').next().filter(|name| !name.is_empty())
    }
}

/// One payload slot in a session store.
#[derive(Clone)]
pub struct PayloadSlot {
    store: Arc<dyn SessionStore>,
    key: String,
}

impl PayloadSlot {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self::with_key(store, RESULT_KEY)
    }

    /// A slot under its own key, e.g. one per chat.
    pub fn with_key(store: Arc<dyn SessionStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Overwrites the slot; a storage failure is logged and ignored.
    pub fn save(&self, payload: &ResultPayload) {
        let raw = match serde_json::to_string(payload) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("[quiz] could not encode result: {}", err);
                return;
            }
        };
        if let Err(err) = self.store.set(&self.key, &raw) {
            warn!("[quiz] result not persisted: {}", err);
        }
    }

    /// `None` covers "never saved", unreadable storage and malformed JSON alike.
    pub fn load(&self) -> Option<ResultPayload> {
        let raw = match self.store.get(&self.key) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!("[result] store read failed: {}", err);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(payload) => Some(payload),
            Err(err) => {
                warn!("[result] parse error: {}", err);
                None
            }
        }
    }

    pub fn clear(&self) {
        if let Err(err) = self.store.remove(&self.key) {
            warn!("[result] could not clear result: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::cache::ListCache;
    use crate::quiz::source::testing::{corner, StubSource};
    use crate::quiz::store::testing::BrokenStore;
    use crate::quiz::store::MemoryStore;
    use crate::quiz::QUESTIONNAIRE;

    const L1: &str = "/data/list1.json";
    const L2: &str = "/data/list2.json";

    fn fallback_payload() -> ResultPayload {
        ResultPayload::build(
            &QUESTIONNAIRE,
            vec![Some(1), Some(2), Some(3), Some(3)],
            "1-2-3".to_string(),
            None,
            Some(L2.to_string()),
        )
    }

    #[test]
    fn fallback_keeps_plain_slogan_and_primary_source() {
        let payload = fallback_payload();
        assert!(payload.is_fallback());
        assert_eq!(payload.display_text, Corner::fallback().slogan);
        assert_eq!(payload.source_file(), Some("list2.json"));
    }

    #[test]
    fn slot_round_trips_and_clears() {
        let slot = PayloadSlot::new(Arc::new(MemoryStore::new()));
        assert_eq!(slot.load(), None);

        let payload = fallback_payload();
        slot.save(&payload);
        assert_eq!(slot.load(), Some(payload));

        slot.clear();
        assert_eq!(slot.load(), None);
    }

    #[test]
    fn malformed_payload_reads_as_absent() {
        let store = Arc::new(MemoryStore::new());
        store.set(RESULT_KEY, "{not json").unwrap();
        assert_eq!(PayloadSlot::new(store.clone()).load(), None);

        store.set(RESULT_KEY, r#"{"key":"1-1-1"}"#).unwrap();
        assert_eq!(PayloadSlot::new(store).load(), None);
    }

    #[test]
    fn broken_store_never_panics() {
        let slot = PayloadSlot::with_key(Arc::new(BrokenStore), "42:quizResult");
        slot.save(&fallback_payload());
        assert_eq!(slot.load(), None);
        slot.clear();
    }

    #[test]
    fn stored_shape_uses_camel_case() {
        let raw = serde_json::to_value(fallback_payload()).unwrap();
        assert!(raw.get("sourceList").is_some());
        assert!(raw.get("displayText").is_some());
        assert_eq!(raw["answers"], serde_json::json!([1, 2, 3, 3]));
    }

    #[tokio::test]
    async fn second_chance_recomputes_display_text() {
        let source = StubSource::new()
            .with_list(L1, vec![])
            .with_list(L2, vec![corner("1-2-3", "Harbor View", "Calm catch")]);
        let cache = ListCache::new(
            vec![L1.to_string(), L2.to_string()],
            Arc::new(source),
            Arc::new(MemoryStore::new()),
        );
        let engine = ResolutionEngine::new(Arc::new(cache));

        let mut stale = fallback_payload();
        stale.display_text = "stale".to_string();
        let fresh = stale.second_chance(&QUESTIONNAIRE, &engine).await;

        assert_eq!(fresh.result.corner, "Harbor View");
        assert_eq!(fresh.display_text, "Calm catch — сохрани для выходных");
        assert_eq!(fresh.source_list.as_deref(), Some(L2));
    }

    #[tokio::test]
    async fn second_chance_leaves_real_matches_alone() {
        let cache = ListCache::new(
            vec![L1.to_string()],
            Arc::new(StubSource::new()),
            Arc::new(MemoryStore::new()),
        );
        let engine = ResolutionEngine::new(Arc::new(cache));
        let found = Resolution {
            item: corner("1-2-3", "Harbor View", "Calm catch"),
            source_index: 0,
            source_list: L1.to_string(),
        };
        let payload = ResultPayload::build(
            &QUESTIONNAIRE,
            vec![Some(1), Some(2), Some(3), Some(2)],
            "1-2-3".to_string(),
            Some(found),
            None,
        );

        let same = payload.clone().second_chance(&QUESTIONNAIRE, &engine).await;
        assert_eq!(same, payload);
        assert_eq!(same.display_text, "Calm catch — идеально на вечер");
    }
}
