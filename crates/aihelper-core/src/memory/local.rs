use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{IngestDocument, RetrievedDocument, Retriever};
use crate::HelperError;
use crate::llm::DynEmbedder;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    id: String,
    text: String,
    source: Option<String>,
    vector: Vec<f32>,
}

/// Brute-force cosine store. Each namespace is optionally mirrored to
/// `<persist_dir>/<namespace>.json` and reloaded on first access.
pub struct LocalRetriever {
    embedder: DynEmbedder,
    persist_dir: Option<PathBuf>,
    namespaces: DashMap<String, Vec<StoredChunk>>,
}

impl LocalRetriever {
    pub fn new(embedder: DynEmbedder) -> Self {
        Self {
            embedder,
            persist_dir: None,
            namespaces: DashMap::new(),
        }
    }

    pub fn with_persist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist_dir = Some(dir.into());
        self
    }

    pub fn chunk_count(&self, namespace: &str) -> usize {
        self.namespaces
            .get(namespace)
            .map(|chunks| chunks.len())
            .unwrap_or_default()
    }

    fn namespace_path(&self, namespace: &str) -> Option<PathBuf> {
        self.persist_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", sanitize(namespace))))
    }

    async fn embed_docs(&self, docs: Vec<IngestDocument>) -> Result<Vec<StoredChunk>, HelperError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = docs.iter().map(|doc| doc.text.clone()).collect();
        let vectors = self.embedder.embed(texts).await?;
        if vectors.len() != docs.len() {
            return Err(HelperError::Model(format!(
                "expected {} embeddings, received {}",
                docs.len(),
                vectors.len()
            )));
        }

        Ok(docs
            .into_iter()
            .zip(vectors)
            .map(|(doc, vector)| StoredChunk {
                id: doc.id,
                text: doc.text,
                source: doc.source,
                vector,
            })
            .collect())
    }

    fn load(&self, namespace: &str) -> Result<(), HelperError> {
        if self.namespaces.contains_key(namespace) {
            return Ok(());
        }
        let Some(path) = self.namespace_path(namespace) else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let raw = fs::read(&path).map_err(|err| HelperError::config_io(path.clone(), err))?;
        match serde_json::from_slice::<Vec<StoredChunk>>(&raw) {
            Ok(chunks) => {
                debug!(namespace, count = chunks.len(), "restored vector namespace");
                self.namespaces.insert(namespace.to_string(), chunks);
            }
            Err(err) => warn!(path = %path.display(), error = %err, "ignoring unreadable vector file"),
        }
        Ok(())
    }

    fn persist(&self, namespace: &str) -> Result<(), HelperError> {
        let Some(path) = self.namespace_path(namespace) else {
            return Ok(());
        };
        match self.namespaces.get(namespace) {
            Some(chunks) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .map_err(|err| HelperError::config_io(parent.to_path_buf(), err))?;
                }
                let payload = serde_json::to_vec(chunks.value())
                    .map_err(|err| HelperError::Other(err.into()))?;
                fs::write(&path, payload).map_err(|err| HelperError::config_io(path.clone(), err))
            }
            None => remove_if_exists(&path),
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<(), HelperError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(HelperError::config_io(path.to_path_buf(), err)),
    }
}

fn sanitize(namespace: &str) -> String {
    namespace
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl Retriever for LocalRetriever {
    async fn retrieve(
        &self,
        namespace: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedDocument>, HelperError> {
        self.load(namespace)?;
        let Some(chunks) = self.namespaces.get(namespace).map(|entry| entry.clone()) else {
            return Ok(Vec::new());
        };
        if chunks.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed(vec![query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| HelperError::Model("embedding response was empty".into()))?;

        let mut scored: Vec<RetrievedDocument> = chunks
            .into_iter()
            .map(|chunk| RetrievedDocument {
                score: cosine_similarity(&query_vector, &chunk.vector),
                text: chunk.text,
                source: chunk.source,
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn ingest(&self, namespace: &str, docs: Vec<IngestDocument>) -> Result<(), HelperError> {
        if docs.is_empty() {
            return Ok(());
        }
        self.load(namespace)?;

        let chunks = self.embed_docs(docs).await?;
        let count = chunks.len();
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .extend(chunks);
        self.persist(namespace)?;

        debug!(namespace, count, "ingested chunks");
        Ok(())
    }

    /// Embeds the new chunks before touching the namespace, so a failed
    /// embedding call keeps the previous contents.
    async fn replace(&self, namespace: &str, docs: Vec<IngestDocument>) -> Result<(), HelperError> {
        let chunks = self.embed_docs(docs).await?;
        let count = chunks.len();
        if chunks.is_empty() {
            self.namespaces.remove(namespace);
        } else {
            self.namespaces.insert(namespace.to_string(), chunks);
        }
        self.persist(namespace)?;

        debug!(namespace, count, "replaced chunks");
        Ok(())
    }

    async fn clear(&self, namespace: &str) -> Result<(), HelperError> {
        self.namespaces.remove(namespace);
        self.persist(namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Embedder, HashEmbedder};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn retriever() -> LocalRetriever {
        LocalRetriever::new(Arc::new(HashEmbedder::new(256)))
    }

    fn docs(texts: &[&str]) -> Vec<IngestDocument> {
        IngestDocument::from_chunks("notes.txt", texts.iter().map(|t| t.to_string()).collect())
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let score = cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        assert!((score - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn retrieve_ranks_the_matching_chunk_first() {
        let store = retriever();
        store
            .ingest(
                "s1",
                docs(&[
                    "the quarterly revenue grew by twelve percent",
                    "penguins live in the southern hemisphere",
                ]),
            )
            .await
            .unwrap();

        let hits = store.retrieve("s1", "where do penguins live", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.contains("penguins"));
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let store = retriever();
        store.ingest("a", docs(&["alpha text"])).await.unwrap();
        assert!(store.retrieve("b", "alpha", 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_drops_previous_chunks() {
        let store = retriever();
        store.ingest("s", docs(&["old one", "old two"])).await.unwrap();
        store.replace("s", docs(&["new"])).await.unwrap();
        assert_eq!(store.chunk_count("s"), 1);
    }

    struct FailsAfter {
        inner: HashEmbedder,
        remaining: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FailsAfter {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, HelperError> {
            if self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
            {
                return Err(HelperError::Model("embedding quota exceeded".into()));
            }
            self.inner.embed(texts).await
        }
    }

    #[tokio::test]
    async fn failed_replace_keeps_previous_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalRetriever::new(Arc::new(FailsAfter {
            inner: HashEmbedder::new(64),
            remaining: AtomicUsize::new(1),
        }))
        .with_persist_dir(dir.path());
        store.replace("s", docs(&["first document"])).await.unwrap();

        let err = store.replace("s", docs(&["second", "document"])).await.unwrap_err();
        assert!(matches!(err, HelperError::Model(_)));
        assert_eq!(store.chunk_count("s"), 1);
        assert!(dir.path().join("s.json").exists());
    }

    #[tokio::test]
    async fn namespaces_survive_a_restart_through_the_persist_dir() {
        let dir = tempfile::tempdir().unwrap();
        let first = retriever().with_persist_dir(dir.path());
        first.ingest("user/1", docs(&["solar panels"])).await.unwrap();
        assert!(dir.path().join("user_1.json").exists());

        let second = retriever().with_persist_dir(dir.path());
        let hits = second.retrieve("user/1", "solar", 4).await.unwrap();
        assert_eq!(hits.len(), 1);

        second.clear("user/1").await.unwrap();
        assert!(!dir.path().join("user_1.json").exists());
    }
}
