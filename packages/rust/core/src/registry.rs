//! The agent registry: one document per detected agency, keyed by contact id.
//!
//! Records written here carry `origin = auto`. Records curated by hand carry
//! `origin = manual`; under [`ReconcilePolicy::PreserveManual`] a run only
//! refreshes their count and timestamp.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use agentsync_shared::{
    AgencyCandidate, AgentRecord, AgentSyncError, Origin, ReconcilePolicy, ReconcileResult,
    RegistryConfig, Result,
};
use agentsync_store::{DocumentStore, IndexStatus, WriteOutcome};

/// Mapping the registry index is created with.
pub fn registry_schema() -> Value {
    json!({
        "mappings": {
            "properties": {
                "phone": { "type": "keyword" },
                "type": { "type": "keyword" },
                "agency_name": { "type": "text" },
                "listing_count": { "type": "integer" },
                "last_updated": { "type": "date" },
                "origin": { "type": "keyword" },
                "source": { "type": "keyword" }
            }
        }
    })
}

/// Outcome of writing a single candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Written {
    Full(WriteOutcome),
    ManualRefreshed,
}

pub struct AgentRegistry {
    store: Arc<dyn DocumentStore>,
    config: RegistryConfig,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn DocumentStore>, config: RegistryConfig) -> Self {
        Self { store, config }
    }

    /// Create the registry index if it does not exist. Never drops data.
    #[instrument(skip_all, fields(index = %self.config.index))]
    pub async fn init(&self) -> Result<IndexStatus> {
        let status = self
            .store
            .ensure_index(&self.config.index, &registry_schema())
            .await?;
        info!(?status, "registry index ready");
        Ok(status)
    }

    /// Write one auto record per candidate.
    ///
    /// Failures are per candidate: they are logged and counted, and the
    /// remaining candidates are still written.
    #[instrument(skip_all, fields(index = %self.config.index, policy = ?self.config.policy, candidates = candidates.len()))]
    pub async fn reconcile(&self, candidates: &[AgencyCandidate]) -> ReconcileResult {
        let now = Utc::now();
        let mut result = ReconcileResult::default();

        for candidate in candidates {
            if candidate.contact_id.trim().is_empty() {
                debug!("skipping candidate without contact id");
                result.skipped += 1;
                continue;
            }

            match self.write_candidate(candidate, now).await {
                Ok(written) => {
                    result.upserted += 1;
                    match written {
                        Written::Full(WriteOutcome::Created) => result.created += 1,
                        Written::Full(WriteOutcome::Updated) => {}
                        Written::ManualRefreshed => result.preserved_manual += 1,
                    }
                }
                Err(e) => {
                    warn!(contact_id = %candidate.contact_id, error = %e, "failed to write agent record");
                    result.failed += 1;
                }
            }
        }

        info!(
            upserted = result.upserted,
            created = result.created,
            preserved_manual = result.preserved_manual,
            skipped = result.skipped,
            failed = result.failed,
            "reconciliation complete"
        );
        result
    }

    async fn write_candidate(
        &self,
        candidate: &AgencyCandidate,
        now: DateTime<Utc>,
    ) -> Result<Written> {
        let index = self.config.index.as_str();
        let id = candidate.contact_id.as_str();

        let manual = match self.config.policy {
            ReconcilePolicy::PreserveManual => self
                .store
                .get_document(index, id)
                .await?
                .is_some_and(|doc| origin_of(&doc) == Origin::Manual),
            ReconcilePolicy::Overwrite => false,
        };

        if manual {
            let refresh = json!({
                "listing_count": candidate.listing_count,
                "last_updated": now,
            });
            self.store.update_document(index, id, &refresh).await?;
            debug!(contact_id = id, "refreshed manual record");
            return Ok(Written::ManualRefreshed);
        }

        let record = AgentRecord::from_candidate(candidate, now);
        let body = serde_json::to_value(&record)
            .map_err(|e| AgentSyncError::parse(format!("serialize record {id}: {e}")))?;
        let outcome = self.store.upsert_document(index, id, &body).await?;
        Ok(Written::Full(outcome))
    }
}

/// Origin of a stored record. Only the `origin` field is read, so records
/// with other legacy fields still classify; a missing or unknown value is auto.
fn origin_of(doc: &Value) -> Origin {
    doc.get("origin")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentsync_store::MemoryStore;

    fn candidate(id: &str, count: u64, name: &str) -> AgencyCandidate {
        AgencyCandidate {
            contact_id: id.into(),
            listing_count: count,
            representative_name: name.into(),
            source: Some("romimo".into()),
        }
    }

    fn registry(store: Arc<MemoryStore>, policy: ReconcilePolicy) -> AgentRegistry {
        AgentRegistry::new(
            store,
            RegistryConfig {
                policy,
                ..RegistryConfig::default()
            },
        )
    }

    fn manual_record() -> Value {
        json!({
            "phone": "0799999999",
            "type": "agency",
            "agency_name": "Curated Agency",
            "listing_count": 3,
            "last_updated": "2024-01-15T10:00:00Z",
            "origin": "manual"
        })
    }

    #[tokio::test]
    async fn init_creates_schema_once() {
        let store = Arc::new(MemoryStore::new());
        let reg = registry(store.clone(), ReconcilePolicy::default());

        assert_eq!(reg.init().await.unwrap(), IndexStatus::Created);
        assert_eq!(reg.init().await.unwrap(), IndexStatus::Existing);

        let schema = store.index_schema("agents").unwrap();
        assert_eq!(schema["mappings"]["properties"]["phone"]["type"], "keyword");
        assert_eq!(schema["mappings"]["properties"]["origin"]["type"], "keyword");
    }

    #[tokio::test]
    async fn new_candidates_are_written_as_auto() {
        let store = Arc::new(MemoryStore::new());
        let reg = registry(store.clone(), ReconcilePolicy::default());

        let result = reg
            .reconcile(&[candidate("0712345678", 7, "Ana Imobiliare")])
            .await;
        assert_eq!(result.upserted, 1);
        assert_eq!(result.created, 1);

        let doc = store.document("agents", "0712345678").unwrap();
        assert_eq!(doc["phone"], "0712345678");
        assert_eq!(doc["type"], "agency");
        assert_eq!(doc["agency_name"], "Ana Imobiliare");
        assert_eq!(doc["listing_count"], 7);
        assert_eq!(doc["origin"], "auto");
        assert_eq!(doc["source"], "romimo");
        assert!(doc["last_updated"].is_string());
    }

    #[tokio::test]
    async fn rerun_updates_instead_of_duplicating() {
        let store = Arc::new(MemoryStore::new());
        let reg = registry(store.clone(), ReconcilePolicy::default());
        let candidates = [candidate("0712345678", 7, "Ana Imobiliare")];

        reg.reconcile(&candidates).await;
        let second = reg.reconcile(&candidates).await;
        assert_eq!(second.upserted, 1);
        assert_eq!(second.created, 0);
        assert_eq!(store.document_count("agents"), 1);
    }

    #[tokio::test]
    async fn overwrite_policy_replaces_manual_record() {
        // Curation is lost under this policy; `preserve_manual` keeps it.
        let store = Arc::new(MemoryStore::new().with_document(
            "agents",
            "0799999999",
            manual_record(),
        ));
        let reg = registry(store.clone(), ReconcilePolicy::Overwrite);

        let result = reg
            .reconcile(&[candidate("0799999999", 6, "Sampled Name")])
            .await;
        assert_eq!(result.upserted, 1);
        assert_eq!(result.preserved_manual, 0);

        let doc = store.document("agents", "0799999999").unwrap();
        assert_eq!(doc["origin"], "auto");
        assert_eq!(doc["agency_name"], "Sampled Name");
    }

    #[tokio::test]
    async fn preserve_manual_refreshes_counts_only() {
        let store = Arc::new(MemoryStore::new().with_document(
            "agents",
            "0799999999",
            manual_record(),
        ));
        let reg = registry(store.clone(), ReconcilePolicy::PreserveManual);

        let result = reg
            .reconcile(&[candidate("0799999999", 6, "Sampled Name")])
            .await;
        assert_eq!(result.upserted, 1);
        assert_eq!(result.preserved_manual, 1);
        assert_eq!(result.created, 0);

        let doc = store.document("agents", "0799999999").unwrap();
        assert_eq!(doc["origin"], "manual");
        assert_eq!(doc["agency_name"], "Curated Agency");
        assert_eq!(doc["listing_count"], 6);
        assert_ne!(doc["last_updated"], "2024-01-15T10:00:00Z");
    }

    #[tokio::test]
    async fn legacy_records_without_origin_are_replaced() {
        let store = Arc::new(MemoryStore::new().with_document(
            "agents",
            "0712345678",
            json!({"phone": "0712345678", "agency_name": "Old", "listing_count": 2,
                   "last_updated": "2023-05-01 08:00:00"}),
        ));
        let reg = registry(store.clone(), ReconcilePolicy::PreserveManual);

        let result = reg.reconcile(&[candidate("0712345678", 9, "New")]).await;
        assert_eq!(result.upserted, 1);
        assert_eq!(result.preserved_manual, 0);
        let doc = store.document("agents", "0712345678").unwrap();
        assert_eq!(doc["agency_name"], "New");
        assert_eq!(doc["origin"], "auto");
    }

    #[tokio::test]
    async fn failures_are_isolated_per_candidate() {
        let store = Arc::new(MemoryStore::new().fail_writes_for("0722222222"));
        let reg = registry(store.clone(), ReconcilePolicy::default());

        let result = reg
            .reconcile(&[
                candidate("0711111111", 5, "A"),
                candidate("0722222222", 6, "B"),
                candidate("0733333333", 7, "C"),
                candidate(" ", 8, "D"),
            ])
            .await;
        assert_eq!(result.upserted, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 1);
        assert!(store.document("agents", "0733333333").is_some());
    }

    #[test]
    fn origin_defaults_to_auto() {
        assert_eq!(origin_of(&json!({})), Origin::Auto);
        assert_eq!(origin_of(&json!({"origin": "weird"})), Origin::Auto);
        assert_eq!(origin_of(&json!({"origin": "manual"})), Origin::Manual);
    }
}
