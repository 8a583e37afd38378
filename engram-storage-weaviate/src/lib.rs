//! # Engram Storage - Weaviate
//!
//! Weaviate v4 REST adapter implementing the platform's [`VectorStore`]
//! trait: typed collections, insert/update/delete of vector objects, and
//! near-vector search with metadata filters via GraphQL.
//!
//! The relational row is canonical; objects here are subordinate and can
//! be rebuilt from it. The adapter asserts that all collections exist at
//! startup and never deletes a collection, only objects.
//!
//! ## Example
//!
//! ```no_run
//! use engram_storage_weaviate::WeaviateStore;
//!
//! # async fn example() -> engram_core::Result<()> {
//! let store = WeaviateStore::new("localhost", 8080)?;
//! store.assert_collections().await?;
//! # Ok(())
//! # }
//! ```

mod graphql;

use async_trait::async_trait;
use engram_core::embeddings::validate_dimension;
use engram_core::error::{Error, Result};
use engram_core::storage::{Collection, SearchFilter, SearchHit, VectorObject, VectorStore};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// HTTP timeout for all vector store calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Weaviate-backed vector store.
pub struct WeaviateStore {
    client: reqwest::Client,
    base_url: String,
}

impl WeaviateStore {
    /// Build a store against a Weaviate instance.
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::VectorStore(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url: format!("http://{host}:{port}/v1") })
    }

    /// Readiness probe.
    pub async fn is_ready(&self) -> bool {
        self.client
            .get(format!("{}/.well-known/ready", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    /// Verify every platform collection exists. Collections are created by
    /// migration tooling, never here; a missing one is a deployment error.
    pub async fn assert_collections(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/schema", self.base_url))
            .send()
            .await
            .map_err(|e| Error::VectorStore(format!("schema fetch failed: {e}")))?;
        let schema: Value = response
            .json()
            .await
            .map_err(|e| Error::VectorStore(format!("schema parse failed: {e}")))?;

        let present: Vec<&str> = schema["classes"]
            .as_array()
            .map(|classes| {
                classes
                    .iter()
                    .filter_map(|c| c["class"].as_str())
                    .collect()
            })
            .unwrap_or_default();

        let missing: Vec<&str> = Collection::all()
            .iter()
            .map(|c| c.name())
            .filter(|name| !present.contains(name))
            .collect();

        if !missing.is_empty() {
            return Err(Error::VectorStore(format!(
                "missing collections: {} — run the schema migration",
                missing.join(", ")
            )));
        }
        info!("all vector collections present");
        Ok(())
    }

    fn object_url(&self, collection: Collection, id: Uuid) -> String {
        format!("{}/objects/{}/{id}", self.base_url, collection.name())
    }
}

#[async_trait]
impl VectorStore for WeaviateStore {
    async fn insert(
        &self,
        collection: Collection,
        vector: Vec<f32>,
        properties: Value,
    ) -> Result<Uuid> {
        validate_dimension(&vector).map_err(|e| Error::VectorStore(e.to_string()))?;

        let body = json!({
            "class": collection.name(),
            "properties": properties,
            "vector": vector,
        });
        let response = self
            .client
            .post(format!("{}/objects", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::VectorStore(format!("insert request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::VectorStore(format!("insert rejected ({status}): {body}")));
        }

        let created: Value = response
            .json()
            .await
            .map_err(|e| Error::VectorStore(format!("insert response parse failed: {e}")))?;
        let id = created["id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| Error::VectorStore("insert response carried no object id".into()))?;

        debug!(collection = collection.name(), %id, "vector object inserted");
        Ok(id)
    }

    async fn update(
        &self,
        collection: Collection,
        id: Uuid,
        vector: Option<Vec<f32>>,
        properties: Option<Value>,
    ) -> Result<()> {
        if let Some(v) = &vector {
            validate_dimension(v).map_err(|e| Error::VectorStore(e.to_string()))?;
        }

        let mut body = json!({ "class": collection.name(), "id": id.to_string() });
        if let Some(properties) = properties {
            body["properties"] = properties;
        }
        if let Some(vector) = vector {
            body["vector"] = json!(vector);
        }

        let response = self
            .client
            .patch(self.object_url(collection, id))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::VectorStore(format!("update request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(id));
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::VectorStore(format!("update rejected ({status})")));
        }
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> Result<bool> {
        let response = self
            .client
            .delete(self.object_url(collection, id))
            .send()
            .await
            .map_err(|e| Error::VectorStore(format!("delete request failed: {e}")))?;

        match response.status() {
            reqwest::StatusCode::NO_CONTENT | reqwest::StatusCode::OK => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            status => Err(Error::VectorStore(format!("delete rejected ({status})"))),
        }
    }

    async fn near_vector(
        &self,
        collection: Collection,
        query: &[f32],
        limit: usize,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        let query_body = graphql::near_vector_query(collection, query, limit, filter.as_ref());
        let response = self
            .client
            .post(format!("{}/graphql", self.base_url))
            .json(&json!({ "query": query_body }))
            .send()
            .await
            .map_err(|e| Error::VectorStore(format!("search request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::VectorStore(format!("search rejected ({status})")));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| Error::VectorStore(format!("search response parse failed: {e}")))?;

        if let Some(errors) = parsed["errors"].as_array() {
            if !errors.is_empty() {
                warn!(collection = collection.name(), ?errors, "graphql search errors");
                return Err(Error::VectorStore("graphql search returned errors".into()));
            }
        }

        Ok(graphql::parse_hits(&parsed, collection))
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        let query = graphql::count_query(collection);
        let response = self
            .client
            .post(format!("{}/graphql", self.base_url))
            .json(&json!({ "query": query }))
            .send()
            .await
            .map_err(|e| Error::VectorStore(format!("count request failed: {e}")))?;
        let parsed: Value = response
            .json()
            .await
            .map_err(|e| Error::VectorStore(format!("count response parse failed: {e}")))?;

        Ok(parsed["data"]["Aggregate"][collection.name()][0]["meta"]["count"]
            .as_u64()
            .unwrap_or(0))
    }

    async fn fetch_by_id(&self, collection: Collection, id: Uuid) -> Result<Option<VectorObject>> {
        let response = self
            .client
            .get(format!("{}?include=vector", self.object_url(collection, id)))
            .send()
            .await
            .map_err(|e| Error::VectorStore(format!("fetch request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::VectorStore(format!("fetch rejected ({status})")));
        }

        let object: Value = response
            .json()
            .await
            .map_err(|e| Error::VectorStore(format!("fetch response parse failed: {e}")))?;

        let vector = object["vector"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect())
            .unwrap_or_default();

        Ok(Some(VectorObject {
            id,
            vector,
            properties: object["properties"].clone(),
        }))
    }

    async fn list(
        &self,
        collection: Collection,
        limit: usize,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<VectorObject>> {
        let response = self
            .client
            .get(format!(
                "{}/objects?class={}&limit={limit}&include=vector",
                self.base_url,
                collection.name()
            ))
            .send()
            .await
            .map_err(|e| Error::VectorStore(format!("list request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::VectorStore(format!("list rejected ({status})")));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| Error::VectorStore(format!("list response parse failed: {e}")))?;

        // The objects endpoint has no where-clause; filters apply here.
        let objects = parsed["objects"]
            .as_array()
            .map(|objects| {
                objects
                    .iter()
                    .filter(|o| {
                        filter.as_ref().map_or(true, |f| f.matches(&o["properties"]))
                    })
                    .filter_map(|o| {
                        let id = o["id"].as_str().and_then(|s| Uuid::parse_str(s).ok())?;
                        let vector = o["vector"]
                            .as_array()
                            .map(|a| {
                                a.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect()
                            })
                            .unwrap_or_default();
                        Some(VectorObject { id, vector, properties: o["properties"].clone() })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(objects)
    }
}
