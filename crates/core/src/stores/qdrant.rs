use crate::error::StoreError;
use crate::models::Chunk;
use crate::store::{MetadataFilter, StoreHit, StoredChunk};
use crate::traits::VectorStore;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tracing::debug;
use url::Url;
use uuid::Uuid;

pub struct QdrantStore {
    endpoint: String,
    client: Client,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// `collections/{collection}/{rest..}` with every segment percent-encoded,
    /// so an owner id can never address another collection.
    fn url(&self, collection: &str, rest: &[&str]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.endpoint)?;
        url.path_segments_mut()
            .map_err(|_| StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: format!("endpoint cannot take a path: {}", self.endpoint),
            })?
            .pop_if_empty()
            .push("collections")
            .push(collection)
            .extend(rest);
        Ok(url)
    }

    fn waiting(mut url: Url) -> Url {
        url.query_pairs_mut().append_pair("wait", "true");
        url
    }

    fn filter_body(filter: &MetadataFilter) -> Value {
        json!({
            "must": [{
                "key": filter.field(),
                "match": { "value": filter.value() },
            }]
        })
    }
}

fn backend_error(response: &Response) -> StoreError {
    StoreError::BackendResponse {
        backend: "qdrant".to_string(),
        details: response.status().to_string(),
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn create_collection(&self, collection: &str, dimensions: usize) -> Result<(), StoreError> {
        let response = self
            .client
            .put(self.url(collection, &[])?)
            .json(&json!({
                "vectors": { "size": dimensions, "distance": "Cosine" },
            }))
            .send()
            .await?;

        // 409 means another writer created it first.
        if !response.status().is_success() && response.status() != StatusCode::CONFLICT {
            return Err(backend_error(&response));
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, items: &[StoredChunk]) -> Result<(), StoreError> {
        if items.is_empty() {
            return Ok(());
        }

        let points = items
            .iter()
            .map(|item| {
                Ok(json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": item.embedding,
                    "payload": serde_json::to_value(&item.chunk)?,
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let response = self
            .client
            .put(Self::waiting(self.url(collection, &["points"])?))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::MissingCollection(collection.to_string())),
            status if status.is_success() => Ok(()),
            _ => Err(backend_error(&response)),
        }
    }

    async fn query(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<StoreHit>, StoreError> {
        let response = self
            .client
            .post(self.url(collection, &["points", "search"])?)
            .json(&json!({
                "vector": query_vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::MissingCollection(collection.to_string()));
        }
        if !response.status().is_success() {
            return Err(backend_error(&response));
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::with_capacity(hits.len());
        for hit in hits {
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            let payload = hit.pointer("/payload").cloned().unwrap_or(Value::Null);
            let chunk: Chunk = serde_json::from_value(payload)?;

            result.push(StoreHit {
                chunk,
                distance: 1.0 - score,
            });
        }

        debug!(collection, hits = result.len(), "qdrant search");
        Ok(result)
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.url(collection, &[])?)
            .send()
            .await?;

        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(&response));
        }
        Ok(())
    }

    async fn delete_where(&self, collection: &str, filter: &MetadataFilter) -> Result<usize, StoreError> {
        let filter_body = Self::filter_body(filter);

        let response = self
            .client
            .post(self.url(collection, &["points", "count"])?)
            .json(&json!({ "filter": filter_body, "exact": true }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !response.status().is_success() {
            return Err(backend_error(&response));
        }

        let parsed: Value = response.json().await?;
        let count = parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;

        if count == 0 {
            return Ok(0);
        }

        let response = self
            .client
            .post(Self::waiting(self.url(collection, &["points", "delete"])?))
            .json(&json!({ "filter": filter_body }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(&response));
        }
        Ok(count)
    }
}
