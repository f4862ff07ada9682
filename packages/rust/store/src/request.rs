//! Request bodies and response parsing for the store's REST API.
//!
//! Kept free of I/O so the wire shapes can be tested without a server.

use agentsync_shared::{AgentSyncError, Result};
use serde::Serialize;
use serde_json::{Map, Value, json};

/// Name of the terms aggregation in search requests.
pub const TERMS_AGG_NAME: &str = "phones";

/// Name of the nested sample sub-aggregation.
pub const TOP_HIT_AGG_NAME: &str = "top_hit";

// ---------------------------------------------------------------------------
// Terms aggregation
// ---------------------------------------------------------------------------

/// A terms aggregation with a minimum bucket size and one sampled document.
#[derive(Debug, Clone, PartialEq)]
pub struct TermsAggregation {
    /// Index to aggregate over.
    pub index: String,
    /// Keyword field to group by.
    pub field: String,
    /// Buckets smaller than this are dropped by the store.
    pub min_doc_count: u64,
    /// Maximum number of buckets returned.
    pub size: u32,
    /// Source fields projected into the sample.
    pub sample_fields: Vec<String>,
}

impl TermsAggregation {
    /// The `_search` request body.
    pub fn to_body(&self) -> Value {
        json!({
            "size": 0,
            "aggs": {
                TERMS_AGG_NAME: {
                    "terms": {
                        "field": self.field,
                        "size": self.size,
                        "min_doc_count": self.min_doc_count,
                    },
                    "aggs": {
                        TOP_HIT_AGG_NAME: {
                            "top_hits": {
                                "size": 1,
                                "_source": self.sample_fields,
                            }
                        }
                    }
                }
            }
        })
    }
}

/// One group of documents sharing a field value.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationBucket {
    /// The grouped value, rendered as a string.
    pub key: String,
    /// Number of documents in the group.
    pub doc_count: u64,
    /// `_source` of the sampled document, if the store returned one.
    pub sample: Option<Map<String, Value>>,
}

impl AggregationBucket {
    /// String value of a sample field, if present and a string.
    pub fn sample_str(&self, field: &str) -> Option<&str> {
        self.sample.as_ref()?.get(field)?.as_str()
    }
}

/// Parse `aggregations.<name>.buckets[]` out of a search response.
pub fn parse_aggregation_response(body: &Value) -> Result<Vec<AggregationBucket>> {
    let buckets = body
        .pointer(&format!("/aggregations/{TERMS_AGG_NAME}/buckets"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            AgentSyncError::parse(format!(
                "search response has no aggregations.{TERMS_AGG_NAME}.buckets"
            ))
        })?;

    buckets.iter().map(parse_bucket).collect()
}

fn parse_bucket(bucket: &Value) -> Result<AggregationBucket> {
    let key = match bucket.get("key_as_string").or_else(|| bucket.get("key")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        other => {
            return Err(AgentSyncError::parse(format!(
                "aggregation bucket has unusable key: {other:?}"
            )));
        }
    };

    let doc_count = bucket
        .get("doc_count")
        .and_then(Value::as_u64)
        .ok_or_else(|| AgentSyncError::parse(format!("bucket '{key}' has no doc_count")))?;

    let sample = bucket
        .pointer(&format!("/{TOP_HIT_AGG_NAME}/hits/hits/0/_source"))
        .and_then(Value::as_object)
        .cloned();

    Ok(AggregationBucket {
        key,
        doc_count,
        sample,
    })
}

// ---------------------------------------------------------------------------
// Index bootstrap and document writes
// ---------------------------------------------------------------------------

/// Result of [`crate::DocumentStore::ensure_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    /// The index was already there and was left untouched.
    Existing,
    /// The index was absent and has been created.
    Created,
}

/// Result of a whole-document write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
}

/// Parse the `result` field of a document write response.
pub fn parse_write_response(body: &Value) -> Result<WriteOutcome> {
    match body.get("result").and_then(Value::as_str) {
        Some("created") => Ok(WriteOutcome::Created),
        Some("updated") | Some("noop") => Ok(WriteOutcome::Updated),
        other => Err(AgentSyncError::parse(format!(
            "unexpected document write result: {other:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Update by query
// ---------------------------------------------------------------------------

/// What the store does when a matched document changed concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictsPolicy {
    /// Abort the whole operation on the first conflict.
    Abort,
    /// Skip conflicting documents and keep going.
    Proceed,
}

impl ConflictsPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Proceed => "proceed",
        }
    }
}

/// An inline mutation script.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Script {
    pub source: String,
    pub lang: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl Script {
    /// A painless script with parameters.
    pub fn painless(source: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            source: source.into(),
            lang: "painless".into(),
            params,
        }
    }
}

/// A server-side mutation applied to every document matching `query`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateByQuery {
    pub index: String,
    pub query: Value,
    pub script: Script,
    pub conflicts: ConflictsPolicy,
    /// `false` submits the request as a background task.
    pub wait_for_completion: bool,
}

impl UpdateByQuery {
    /// The `_update_by_query` request body.
    pub fn to_body(&self) -> Value {
        json!({
            "query": self.query,
            "script": self.script,
        })
    }

    /// URL query parameters.
    pub fn query_params(&self) -> [(&'static str, &'static str); 2] {
        [
            ("conflicts", self.conflicts.as_str()),
            (
                "wait_for_completion",
                if self.wait_for_completion { "true" } else { "false" },
            ),
        ]
    }
}

/// Extract the task id from an async update-by-query response.
pub fn parse_task_submission(body: &Value) -> Result<String> {
    body.get("task")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AgentSyncError::parse("update-by-query response has no task id"))
}

// ---------------------------------------------------------------------------
// Task status
// ---------------------------------------------------------------------------

/// Snapshot of a background store task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub completed: bool,
    /// Documents matched by the query.
    pub total: u64,
    /// Documents updated so far.
    pub updated: u64,
    /// Documents skipped because they changed concurrently.
    pub version_conflicts: u64,
    /// Per-document failures reported in the final response.
    pub failures: usize,
}

/// Parse a `GET /_tasks/{id}` response.
pub fn parse_task_response(task_id: &str, body: &Value) -> Result<TaskStatus> {
    let completed = body
        .get("completed")
        .and_then(Value::as_bool)
        .ok_or_else(|| AgentSyncError::parse(format!("task {task_id}: missing 'completed'")))?;

    let status = body.pointer("/task/status");
    let counter = |name: &str| {
        status
            .and_then(|s| s.get(name))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };

    let failures = body
        .pointer("/response/failures")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);

    Ok(TaskStatus {
        task_id: task_id.to_string(),
        completed,
        total: counter("total"),
        updated: counter("updated"),
        version_conflicts: counter("version_conflicts"),
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_body_shape() {
        let agg = TermsAggregation {
            index: "listings".into(),
            field: "decrypted_phone.keyword".into(),
            min_doc_count: 5,
            size: 10_000,
            sample_fields: vec!["user_name".into(), "ad_source".into()],
        };
        let body = agg.to_body();
        assert_eq!(body["size"], 0);
        let terms = &body["aggs"]["phones"]["terms"];
        assert_eq!(terms["field"], "decrypted_phone.keyword");
        assert_eq!(terms["min_doc_count"], 5);
        assert_eq!(terms["size"], 10_000);
        let top = &body["aggs"]["phones"]["aggs"]["top_hit"]["top_hits"];
        assert_eq!(top["size"], 1);
        assert_eq!(top["_source"], json!(["user_name", "ad_source"]));
    }

    #[test]
    fn parse_aggregation_fixture() {
        let fixture = std::fs::read_to_string("../../../fixtures/opensearch/phones_aggregation.json")
            .expect("read aggregation fixture");
        let body: Value = serde_json::from_str(&fixture).expect("fixture json");
        let buckets = parse_aggregation_response(&body).expect("parse");

        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].key, "0712345678");
        assert_eq!(buckets[0].doc_count, 7);
        assert_eq!(buckets[0].sample_str("user_name"), Some("Ana Imobiliare"));
        assert_eq!(buckets[1].key, "N/A");
        assert_eq!(buckets[2].sample_str("user_name"), None);
    }

    #[test]
    fn numeric_keys_become_strings() {
        let body = json!({
            "aggregations": {"phones": {"buckets": [
                {"key": 40712345678u64, "doc_count": 6}
            ]}}
        });
        let buckets = parse_aggregation_response(&body).unwrap();
        assert_eq!(buckets[0].key, "40712345678");
        assert!(buckets[0].sample.is_none());
    }

    #[test]
    fn missing_aggregation_is_parse_error() {
        let body = json!({"hits": {"total": {"value": 0}}});
        let err = parse_aggregation_response(&body).unwrap_err();
        assert!(err.to_string().contains("aggregations.phones.buckets"));
        assert!(!err.is_transport());
    }

    #[test]
    fn write_results() {
        assert_eq!(
            parse_write_response(&json!({"result": "created"})).unwrap(),
            WriteOutcome::Created
        );
        assert_eq!(
            parse_write_response(&json!({"result": "updated"})).unwrap(),
            WriteOutcome::Updated
        );
        assert!(parse_write_response(&json!({})).is_err());
    }

    #[test]
    fn update_by_query_params() {
        let request = UpdateByQuery {
            index: "listings".into(),
            query: json!({"match_all": {}}),
            script: Script::painless("ctx._source.x = 1", Map::new()),
            conflicts: ConflictsPolicy::Proceed,
            wait_for_completion: false,
        };
        assert_eq!(
            request.query_params(),
            [("conflicts", "proceed"), ("wait_for_completion", "false")]
        );
        let body = request.to_body();
        assert_eq!(body["script"]["lang"], "painless");
        assert!(body["script"].get("params").is_none());
    }

    #[test]
    fn task_submission_and_status() {
        assert_eq!(
            parse_task_submission(&json!({"task": "node-1:4211"})).unwrap(),
            "node-1:4211"
        );
        assert!(parse_task_submission(&json!({"took": 3})).is_err());

        let body = json!({
            "completed": true,
            "task": {"status": {"total": 40, "updated": 38, "version_conflicts": 2}},
            "response": {"failures": []}
        });
        let status = parse_task_response("node-1:4211", &body).unwrap();
        assert!(status.completed);
        assert_eq!(status.total, 40);
        assert_eq!(status.updated, 38);
        assert_eq!(status.version_conflicts, 2);
        assert_eq!(status.failures, 0);
    }
}
