//! In-memory [`DocumentStore`] for tests.
//!
//! Aggregation results are seeded per index (the store's grouping is not
//! re-implemented); the threshold, bucket cap and sample projection of a
//! request are still applied so callers see store-like behavior. Writes are
//! kept per index and can be inspected afterwards. Each operation can be made
//! to fail with a transport error.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use agentsync_shared::{AgentSyncError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::DocumentStore;
use crate::request::{
    AggregationBucket, IndexStatus, TaskStatus, TermsAggregation, UpdateByQuery, WriteOutcome,
};

#[derive(Default)]
struct MemoryState {
    buckets: HashMap<String, Vec<AggregationBucket>>,
    schemas: HashMap<String, Value>,
    documents: HashMap<String, BTreeMap<String, Value>>,
    ensure_index_calls: usize,
    aggregation_requests: Vec<TermsAggregation>,
    bulk_requests: Vec<UpdateByQuery>,
    tasks: HashMap<String, TaskStatus>,
    fail_aggregation: bool,
    fail_ensure_index: bool,
    fail_bulk_update: bool,
    fail_writes_for: HashSet<String>,
}

/// In-memory document store with failure injection.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

fn injected(operation: &str) -> AgentSyncError {
    AgentSyncError::Transport(format!("{operation}: injected failure"))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Seeding
    // -----------------------------------------------------------------------

    /// Seed the buckets an aggregation over `index` returns.
    pub fn with_buckets(self, index: &str, buckets: Vec<AggregationBucket>) -> Self {
        self.set_buckets(index, buckets);
        self
    }

    /// Replace the seeded buckets for `index`.
    pub fn set_buckets(&self, index: &str, buckets: Vec<AggregationBucket>) {
        self.state().buckets.insert(index.to_string(), buckets);
    }

    /// Create an index with `schema`, as an out-of-band admin would.
    pub fn with_index(self, index: &str, schema: Value) -> Self {
        self.state().schemas.insert(index.to_string(), schema);
        self
    }

    /// Store a document out-of-band (e.g. a manually curated record).
    pub fn with_document(self, index: &str, id: &str, body: Value) -> Self {
        {
            let mut state = self.state();
            state
                .schemas
                .entry(index.to_string())
                .or_insert(Value::Null);
            state
                .documents
                .entry(index.to_string())
                .or_default()
                .insert(id.to_string(), body);
        }
        self
    }

    pub fn fail_aggregation(self) -> Self {
        self.state().fail_aggregation = true;
        self
    }

    pub fn fail_ensure_index(self) -> Self {
        self.state().fail_ensure_index = true;
        self
    }

    pub fn fail_bulk_update(self) -> Self {
        self.state().fail_bulk_update = true;
        self
    }

    /// Make every read and write of document `id` fail.
    pub fn fail_writes_for(self, id: &str) -> Self {
        self.state().fail_writes_for.insert(id.to_string());
        self
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn document(&self, index: &str, id: &str) -> Option<Value> {
        self.state().documents.get(index)?.get(id).cloned()
    }

    pub fn document_count(&self, index: &str) -> usize {
        self.state().documents.get(index).map_or(0, BTreeMap::len)
    }

    /// Schema the index was created with, `None` if absent or created implicitly.
    pub fn index_schema(&self, index: &str) -> Option<Value> {
        self.state()
            .schemas
            .get(index)
            .filter(|s| !s.is_null())
            .cloned()
    }

    pub fn ensure_index_calls(&self) -> usize {
        self.state().ensure_index_calls
    }

    pub fn aggregation_requests(&self) -> Vec<TermsAggregation> {
        self.state().aggregation_requests.clone()
    }

    pub fn bulk_requests(&self) -> Vec<UpdateByQuery> {
        self.state().bulk_requests.clone()
    }
}

fn project(sample: &Map<String, Value>, fields: &[String]) -> Map<String, Value> {
    sample
        .iter()
        .filter(|(k, _)| fields.iter().any(|f| f == *k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn aggregate_by_field(
        &self,
        request: &TermsAggregation,
    ) -> Result<Vec<AggregationBucket>> {
        let mut state = self.state();
        state.aggregation_requests.push(request.clone());
        if state.fail_aggregation {
            return Err(injected("aggregation"));
        }

        let seeded = state.buckets.get(&request.index).cloned().unwrap_or_default();
        Ok(seeded
            .into_iter()
            .filter(|b| b.doc_count >= request.min_doc_count)
            .take(request.size as usize)
            .map(|b| AggregationBucket {
                sample: b
                    .sample
                    .as_ref()
                    .map(|s| project(s, &request.sample_fields)),
                ..b
            })
            .collect())
    }

    async fn ensure_index(&self, index: &str, schema: &Value) -> Result<IndexStatus> {
        let mut state = self.state();
        state.ensure_index_calls += 1;
        if state.fail_ensure_index {
            return Err(injected("index create"));
        }
        if state.schemas.contains_key(index) {
            return Ok(IndexStatus::Existing);
        }
        state.schemas.insert(index.to_string(), schema.clone());
        Ok(IndexStatus::Created)
    }

    async fn upsert_document(
        &self,
        index: &str,
        id: &str,
        body: &Value,
    ) -> Result<WriteOutcome> {
        let mut state = self.state();
        if state.fail_writes_for.contains(id) {
            return Err(injected("document upsert"));
        }
        // Writing to a missing index creates it implicitly, without a mapping.
        state
            .schemas
            .entry(index.to_string())
            .or_insert(Value::Null);
        let previous = state
            .documents
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), body.clone());
        Ok(match previous {
            Some(_) => WriteOutcome::Updated,
            None => WriteOutcome::Created,
        })
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let state = self.state();
        if state.fail_writes_for.contains(id) {
            return Err(injected("document get"));
        }
        Ok(state.documents.get(index).and_then(|d| d.get(id)).cloned())
    }

    async fn update_document(&self, index: &str, id: &str, partial: &Value) -> Result<()> {
        let mut state = self.state();
        if state.fail_writes_for.contains(id) {
            return Err(injected("document update"));
        }
        let existing = state
            .documents
            .get_mut(index)
            .and_then(|d| d.get_mut(id))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| AgentSyncError::Status {
                status: 404,
                body: format!("document_missing_exception: [{id}]"),
            })?;
        if let Some(fields) = partial.as_object() {
            for (k, v) in fields {
                existing.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }

    async fn bulk_update_by_query(&self, request: &UpdateByQuery) -> Result<String> {
        let mut state = self.state();
        state.bulk_requests.push(request.clone());
        if state.fail_bulk_update {
            return Err(injected("update-by-query"));
        }
        let task_id = format!("memory:{}", state.bulk_requests.len());
        state.tasks.insert(
            task_id.clone(),
            TaskStatus {
                task_id: task_id.clone(),
                completed: true,
                ..TaskStatus::default()
            },
        );
        Ok(task_id)
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus> {
        self.state()
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| AgentSyncError::Status {
                status: 404,
                body: format!("resource_not_found_exception: task [{task_id}]"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bucket(key: &str, doc_count: u64, sample: Value) -> AggregationBucket {
        AggregationBucket {
            key: key.into(),
            doc_count,
            sample: sample.as_object().cloned(),
        }
    }

    #[tokio::test]
    async fn aggregation_applies_threshold_and_projection() {
        let store = MemoryStore::new().with_buckets(
            "listings",
            vec![
                bucket("a", 9, json!({"user_name": "A", "title": "ignored"})),
                bucket("b", 2, json!({"user_name": "B"})),
            ],
        );
        let request = TermsAggregation {
            index: "listings".into(),
            field: "phone".into(),
            min_doc_count: 5,
            size: 100,
            sample_fields: vec!["user_name".into()],
        };

        let buckets = store.aggregate_by_field(&request).await.unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].key, "a");
        let sample = buckets[0].sample.as_ref().unwrap();
        assert_eq!(sample.len(), 1);
        assert_eq!(store.aggregation_requests().len(), 1);
    }

    #[tokio::test]
    async fn ensure_index_is_additive() {
        let store = MemoryStore::new().with_document("agents", "x", json!({"origin": "manual"}));
        let status = store.ensure_index("agents", &json!({})).await.unwrap();
        assert_eq!(status, IndexStatus::Existing);
        assert_eq!(store.document_count("agents"), 1);
        assert_eq!(store.ensure_index_calls(), 1);
    }

    #[tokio::test]
    async fn upsert_reports_created_then_updated() {
        let store = MemoryStore::new();
        let doc = json!({"n": 1});
        assert_eq!(
            store.upsert_document("agents", "x", &doc).await.unwrap(),
            WriteOutcome::Created
        );
        assert_eq!(
            store.upsert_document("agents", "x", &doc).await.unwrap(),
            WriteOutcome::Updated
        );
        assert_eq!(store.document_count("agents"), 1);
    }

    #[tokio::test]
    async fn partial_update_merges_fields() {
        let store =
            MemoryStore::new().with_document("agents", "x", json!({"origin": "manual", "n": 1}));
        store
            .update_document("agents", "x", &json!({"n": 2}))
            .await
            .unwrap();
        assert_eq!(store.document("agents", "x").unwrap(), json!({"origin": "manual", "n": 2}));

        let err = store
            .update_document("agents", "missing", &json!({"n": 2}))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn injected_failures_are_transport_errors() {
        let store = MemoryStore::new().fail_bulk_update().fail_writes_for("x");
        assert!(
            store
                .upsert_document("agents", "x", &json!({}))
                .await
                .unwrap_err()
                .is_transport()
        );
        assert!(store.upsert_document("agents", "y", &json!({})).await.is_ok());
        assert_eq!(store.document_count("agents"), 1);
    }
}
