//! Document store access for AgentSync.
//!
//! This crate provides:
//! - [`DocumentStore`]: the operations the pipeline needs from the store
//! - [`OpenSearchClient`]: HTTP implementation against an OpenSearch/Elasticsearch API
//! - request/response shapes in [`request`]
//! - `MemoryStore` (feature `testing`): in-memory store with failure injection

pub mod opensearch;
pub mod request;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

use agentsync_shared::Result;
use async_trait::async_trait;
use serde_json::Value;

pub use opensearch::OpenSearchClient;
pub use request::{
    AggregationBucket, ConflictsPolicy, IndexStatus, Script, TaskStatus, TermsAggregation,
    UpdateByQuery, WriteOutcome,
};

#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryStore;

/// Operations consumed from the external document store.
///
/// Implementations carry no business logic: every method maps to one store
/// request. Connection failures and non-2xx answers surface as transport
/// errors (`AgentSyncError::is_transport`).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Run a terms aggregation with a one-document sample per bucket.
    async fn aggregate_by_field(&self, request: &TermsAggregation)
    -> Result<Vec<AggregationBucket>>;

    /// Create `index` with `schema` unless it already exists. Never deletes.
    async fn ensure_index(&self, index: &str, schema: &Value) -> Result<IndexStatus>;

    /// Create or fully replace the document at `id`.
    async fn upsert_document(&self, index: &str, id: &str, body: &Value)
    -> Result<WriteOutcome>;

    /// Fetch a document's source, `None` when absent.
    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>>;

    /// Merge `partial` into the existing document at `id`.
    async fn update_document(&self, index: &str, id: &str, partial: &Value) -> Result<()>;

    /// Submit an update-by-query. Returns the store's task id without waiting.
    async fn bulk_update_by_query(&self, request: &UpdateByQuery) -> Result<String>;

    /// Read the current state of a store task once.
    async fn task_status(&self, task_id: &str) -> Result<TaskStatus>;
}
