//! Per-session, per-pipeline result holders.
//!
//! Each `(session id, pipeline)` pair owns one slot with the last topic, the
//! last result, and any working material the pipeline needs between requests
//! (scraped page text, the name of the indexed document). Slots live in a
//! concurrent map so separate sessions never wait on each other.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::HelperError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    WebScraper,
    DocumentQa,
    Research,
    Essay,
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 4] = [
        PipelineKind::WebScraper,
        PipelineKind::DocumentQa,
        PipelineKind::Research,
        PipelineKind::Essay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::WebScraper => "web_scraper",
            PipelineKind::DocumentQa => "document_qa",
            PipelineKind::Research => "research",
            PipelineKind::Essay => "essay",
        }
    }

    /// Panel label shown in the selector.
    pub fn title(&self) -> &'static str {
        match self {
            PipelineKind::WebScraper => "Web Dom Scraper",
            PipelineKind::DocumentQa => "File Data Analysis",
            PipelineKind::Research => "Web research",
            PipelineKind::Essay => "Essay Writing",
        }
    }

    pub fn email_subject(&self) -> &'static str {
        match self {
            PipelineKind::WebScraper => "Extraction",
            PipelineKind::DocumentQa => "Document answer",
            PipelineKind::Research => "Research",
            PipelineKind::Essay => "Essay",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineKind {
    type Err = HelperError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "web_scraper" | "scraper" => Ok(PipelineKind::WebScraper),
            "document_qa" | "documents" | "rag" => Ok(PipelineKind::DocumentQa),
            "research" => Ok(PipelineKind::Research),
            "essay" => Ok(PipelineKind::Essay),
            other => Err(HelperError::InvalidConfiguration(format!(
                "unknown pipeline `{other}`"
            ))),
        }
    }
}

/// Material a pipeline keeps between requests until the slot is cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkingMaterial {
    ScrapedPage { url: String, text: String },
    IndexedDocument { name: String, chunks: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenterState {
    pub last_topic: String,
    pub last_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material: Option<WorkingMaterial>,
}

type SlotKey = (String, PipelineKind);

#[derive(Clone, Default)]
pub struct SessionStore {
    slots: Arc<DashMap<SlotKey, PresenterState>>,
    last_seen: Arc<DashMap<String, DateTime<Utc>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presenter(&self, session_id: &str, pipeline: PipelineKind) -> Presenter {
        self.last_seen.insert(session_id.to_string(), Utc::now());
        Presenter {
            slots: self.slots.clone(),
            key: (session_id.to_string(), pipeline),
        }
    }

    /// Snapshot of every non-empty slot of a session.
    pub fn snapshot(&self, session_id: &str) -> Vec<(PipelineKind, PresenterState)> {
        PipelineKind::ALL
            .iter()
            .filter_map(|pipeline| {
                self.slots
                    .get(&(session_id.to_string(), *pipeline))
                    .map(|slot| (*pipeline, slot.value().clone()))
            })
            .collect()
    }

    /// Forget a session entirely. Returns the number of slots removed.
    pub fn drop_session(&self, session_id: &str) -> usize {
        self.last_seen.remove(session_id);
        let before = self.slots.len();
        self.slots.retain(|(owner, _), _| owner != session_id);
        before.saturating_sub(self.slots.len())
    }

    /// Sessions whose last presenter access is at or before `cutoff`.
    pub fn idle_since(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.last_seen
            .iter()
            .filter(|entry| *entry.value() <= cutoff)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn session_count(&self) -> usize {
        let mut owners: Vec<String> = self
            .slots
            .iter()
            .map(|entry| entry.key().0.clone())
            .collect();
        owners.sort();
        owners.dedup();
        owners.len()
    }
}

/// Handle on one `(session, pipeline)` slot.
#[derive(Clone)]
pub struct Presenter {
    slots: Arc<DashMap<SlotKey, PresenterState>>,
    key: SlotKey,
}

impl Presenter {
    pub fn session_id(&self) -> &str {
        &self.key.0
    }

    pub fn pipeline(&self) -> PipelineKind {
        self.key.1
    }

    pub fn set(&self, topic: impl Into<String>, result: impl Into<String>) {
        let mut slot = self.slots.entry(self.key.clone()).or_default();
        slot.last_topic = topic.into();
        slot.last_result = Some(result.into());
    }

    /// `(last_topic, last_result)`; `("", None)` for a fresh or cleared slot.
    pub fn get(&self) -> (String, Option<String>) {
        self.slots
            .get(&self.key)
            .map(|slot| (slot.last_topic.clone(), slot.last_result.clone()))
            .unwrap_or_default()
    }

    pub fn state(&self) -> PresenterState {
        self.slots
            .get(&self.key)
            .map(|slot| slot.value().clone())
            .unwrap_or_default()
    }

    pub fn result(&self) -> Option<String> {
        self.get().1
    }

    pub fn set_material(&self, material: WorkingMaterial) {
        self.slots.entry(self.key.clone()).or_default().material = Some(material);
    }

    pub fn material(&self) -> Option<WorkingMaterial> {
        self.slots
            .get(&self.key)
            .and_then(|slot| slot.material.clone())
    }

    /// Reset the slot to its initial state, dropping working material too.
    pub fn clear(&self) {
        self.slots.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slot_is_empty() {
        let store = SessionStore::new();
        let presenter = store.presenter("s1", PipelineKind::Research);
        assert_eq!(presenter.get(), (String::new(), None));
    }

    #[test]
    fn set_then_get_returns_latest_values() {
        let store = SessionStore::new();
        let presenter = store.presenter("s1", PipelineKind::Essay);
        presenter.set("climate", "first draft");
        presenter.set("oceans", "second draft");
        assert_eq!(
            presenter.get(),
            ("oceans".to_string(), Some("second draft".to_string()))
        );
    }

    #[test]
    fn clear_resets_regardless_of_prior_state() {
        let store = SessionStore::new();
        let presenter = store.presenter("s1", PipelineKind::WebScraper);
        presenter.clear();
        assert_eq!(presenter.get(), (String::new(), None));

        presenter.set("prices", "42");
        presenter.set_material(WorkingMaterial::ScrapedPage {
            url: "https://shop.example".into(),
            text: "Price 42".into(),
        });
        presenter.clear();
        assert_eq!(presenter.get(), (String::new(), None));
        assert!(presenter.material().is_none());
    }

    #[test]
    fn slots_are_isolated_by_session_and_pipeline() {
        let store = SessionStore::new();
        store.presenter("a", PipelineKind::Research).set("t", "r");

        assert!(store.presenter("b", PipelineKind::Research).result().is_none());
        assert!(store.presenter("a", PipelineKind::Essay).result().is_none());
        assert_eq!(store.snapshot("a").len(), 1);
    }

    #[test]
    fn drop_session_removes_only_that_session() {
        let store = SessionStore::new();
        store.presenter("a", PipelineKind::Research).set("t", "r");
        store.presenter("a", PipelineKind::Essay).set("t", "e");
        store.presenter("b", PipelineKind::Essay).set("t", "e");

        assert_eq!(store.drop_session("a"), 2);
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn idle_since_lists_sessions_not_seen_after_the_cutoff() {
        let store = SessionStore::new();
        store.presenter("a", PipelineKind::Research);
        let cutoff = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.presenter("b", PipelineKind::Essay);

        assert_eq!(store.idle_since(cutoff), vec!["a".to_string()]);

        store.drop_session("a");
        assert!(store.idle_since(Utc::now()).iter().all(|id| id != "a"));
    }

    #[test]
    fn pipeline_names_parse() {
        assert_eq!(
            "web-scraper".parse::<PipelineKind>().unwrap(),
            PipelineKind::WebScraper
        );
        assert_eq!("RAG".parse::<PipelineKind>().unwrap(), PipelineKind::DocumentQa);
        assert!("poetry".parse::<PipelineKind>().is_err());
    }
}
