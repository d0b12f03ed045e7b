//! Vector stores holding document chunks per namespace.

mod local;
#[cfg(feature = "qdrant-retriever")]
pub mod qdrant;

pub use local::LocalRetriever;
#[cfg(feature = "qdrant-retriever")]
pub use qdrant::{QdrantConfig, QdrantRetriever};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::HelperError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub text: String,
    pub score: f32,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestDocument {
    pub id: String,
    pub text: String,
    pub source: Option<String>,
}

impl IngestDocument {
    /// Chunks of one source document, numbered in order.
    pub fn from_chunks(source: &str, chunks: Vec<String>) -> Vec<Self> {
        chunks
            .into_iter()
            .enumerate()
            .map(|(idx, text)| Self {
                id: format!("{source}#{idx}"),
                text,
                source: Some(source.to_string()),
            })
            .collect()
    }
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// The `limit` chunks of `namespace` most similar to `query`, best first.
    async fn retrieve(
        &self,
        namespace: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedDocument>, HelperError>;

    async fn ingest(&self, namespace: &str, docs: Vec<IngestDocument>) -> Result<(), HelperError>;

    /// Drop every chunk of `namespace`.
    async fn clear(&self, namespace: &str) -> Result<(), HelperError>;

    /// Replace the contents of `namespace` with `docs`. Stores that embed
    /// locally override this to keep the old contents when embedding fails.
    async fn replace(&self, namespace: &str, docs: Vec<IngestDocument>) -> Result<(), HelperError> {
        self.clear(namespace).await?;
        self.ingest(namespace, docs).await
    }
}

pub type DynRetriever = Arc<dyn Retriever>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_are_numbered_per_source() {
        let docs = IngestDocument::from_chunks("report.pdf", vec!["a".into(), "b".into()]);
        assert_eq!(docs[1].id, "report.pdf#1");
        assert_eq!(docs[0].source.as_deref(), Some("report.pdf"));
    }
}
