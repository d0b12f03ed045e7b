use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use fastembed::TextEmbedding;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, Value as PayloadValue, VectorParamsBuilder,
};
use tokio::sync::Semaphore;
use tracing::{debug, info};
use uuid::Uuid;

use super::{IngestDocument, RetrievedDocument, Retriever};
use crate::HelperError;

const KEY_NAMESPACE: &str = "namespace";
const KEY_TEXT: &str = "text";
const KEY_SOURCE: &str = "source";

#[derive(Clone, Debug)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
    pub concurrency_limit: usize,
}

/// Qdrant-backed store with local fastembed dense vectors.
pub struct QdrantRetriever {
    client: Qdrant,
    collection: String,
    semaphore: Arc<Semaphore>,
    dense_model: Arc<Mutex<TextEmbedding>>,
}

impl QdrantRetriever {
    pub async fn new(config: QdrantConfig) -> Result<Self, HelperError> {
        let (dense_model, dimension) = tokio::task::spawn_blocking(|| -> anyhow::Result<_> {
            let mut model = TextEmbedding::try_new(Default::default())
                .map_err(|err| anyhow!("failed to initialise FastEmbed model: {err}"))?;

            let warmup = model
                .embed(vec!["aihelper warmup"], Some(1))
                .map_err(|err| anyhow!("failed to warm up FastEmbed model: {err}"))?;
            let dimension = warmup
                .first()
                .map(|vector| vector.len())
                .filter(|len| *len > 0)
                .ok_or_else(|| anyhow!("FastEmbed warmup returned no embedding rows"))?;

            Ok((model, dimension))
        })
        .await
        .map_err(|err| anyhow!("embedding initialisation panicked: {err}"))??;

        let client = Qdrant::from_url(&config.url)
            .build()
            .map_err(|err| anyhow!("failed to create Qdrant client: {err}"))?;

        ensure_collection(&client, &config.collection, dimension).await?;

        Ok(Self {
            client,
            collection: config.collection,
            semaphore: Arc::new(Semaphore::new(config.concurrency_limit.max(1))),
            dense_model: Arc::new(Mutex::new(dense_model)),
        })
    }

    async fn embed(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
        let dense_model = self.dense_model.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Vec<f32>>> {
            let mut model = dense_model
                .lock()
                .map_err(|_| anyhow!("embedding model poisoned"))?;
            model
                .embed(texts, Some(32))
                .map_err(|err| anyhow!("failed to embed text: {err}"))
        })
        .await
        .context("embedding task panicked")?
    }

    async fn points(
        &self,
        namespace: &str,
        docs: Vec<IngestDocument>,
    ) -> anyhow::Result<Vec<PointStruct>> {
        let texts: Vec<String> = docs.iter().map(|doc| doc.text.clone()).collect();
        let embeddings = self.embed(texts).await?;

        let mut points = Vec::with_capacity(docs.len());
        for (doc, vector) in docs.iter().zip(embeddings) {
            let payload = build_payload(namespace, &doc.text, doc.source.as_ref())?;
            points.push(PointStruct::new(Uuid::new_v4().to_string(), vector, payload));
        }
        Ok(points)
    }

    fn namespace_filter(namespace: &str) -> Filter {
        Filter::must([Condition::matches(KEY_NAMESPACE, namespace.to_string())])
    }
}

async fn ensure_collection(
    client: &Qdrant,
    collection: &str,
    dimension: usize,
) -> anyhow::Result<()> {
    if client.collection_exists(collection).await? {
        return Ok(());
    }

    client
        .create_collection(
            CreateCollectionBuilder::new(collection)
                .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine)),
        )
        .await
        .map_err(|err| anyhow!("failed to create qdrant collection '{collection}': {err}"))?;
    info!(collection, dimension, "created qdrant collection");
    Ok(())
}

fn read_payload(mut payload: HashMap<String, PayloadValue>) -> (String, Option<String>) {
    let text = payload
        .remove(KEY_TEXT)
        .and_then(|value| value.as_str().cloned())
        .unwrap_or_default();
    let source = payload
        .remove(KEY_SOURCE)
        .and_then(|value| value.as_str().cloned());
    (text, source)
}

fn build_payload(
    namespace: &str,
    text: &str,
    source: Option<&String>,
) -> anyhow::Result<qdrant_client::Payload> {
    serde_json::json!({
        KEY_NAMESPACE: namespace,
        KEY_TEXT: text,
        KEY_SOURCE: source,
    })
    .try_into()
    .map_err(|err| anyhow!("failed to convert payload: {err}"))
}

#[async_trait]
impl Retriever for QdrantRetriever {
    async fn retrieve(
        &self,
        namespace: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedDocument>, HelperError> {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .context("semaphore closed unexpectedly")?;

        let query_embedding = self
            .embed(vec![query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedding model returned empty result"))?;

        let search = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, query_embedding, limit as u64)
                    .filter(Self::namespace_filter(namespace))
                    .with_payload(true),
            )
            .await
            .map_err(|err| anyhow!("qdrant search failed: {err}"))?;

        Ok(search
            .result
            .into_iter()
            .map(|point| {
                let (text, source) = read_payload(point.payload);
                RetrievedDocument {
                    text,
                    score: point.score,
                    source,
                }
            })
            .collect())
    }

    async fn ingest(&self, namespace: &str, docs: Vec<IngestDocument>) -> Result<(), HelperError> {
        if docs.is_empty() {
            return Ok(());
        }

        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .context("semaphore closed unexpectedly")?;

        let count = docs.len();
        let points = self.points(namespace, docs).await?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(|err| anyhow!("failed to upsert documents into qdrant: {err}"))?;

        debug!(namespace, count, "ingested documents into qdrant");
        Ok(())
    }

    /// Embeds before deleting, so an embedding failure keeps the old points.
    async fn replace(&self, namespace: &str, docs: Vec<IngestDocument>) -> Result<(), HelperError> {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .context("semaphore closed unexpectedly")?;

        let count = docs.len();
        let points = if docs.is_empty() {
            Vec::new()
        } else {
            self.points(namespace, docs).await?
        };

        self.clear(namespace).await?;
        if !points.is_empty() {
            self.client
                .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
                .await
                .map_err(|err| anyhow!("failed to upsert documents into qdrant: {err}"))?;
        }

        debug!(namespace, count, "replaced qdrant namespace");
        Ok(())
    }

    async fn clear(&self, namespace: &str) -> Result<(), HelperError> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(Self::namespace_filter(namespace))
                    .wait(true),
            )
            .await
            .map_err(|err| anyhow!("failed to clear qdrant namespace '{namespace}': {err}"))?;
        debug!(namespace, "cleared qdrant namespace");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips_text_and_source() {
        let source = "report.pdf".to_string();
        let payload = build_payload("s1", "chunk text", Some(&source)).unwrap();
        let raw: HashMap<String, PayloadValue> = payload.into();
        let (text, parsed_source) = read_payload(raw);
        assert_eq!(text, "chunk text");
        assert_eq!(parsed_source.as_deref(), Some("report.pdf"));
    }
}
