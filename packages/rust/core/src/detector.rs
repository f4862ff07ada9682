//! Candidate agency detection over the listings index.
//!
//! A contact id seen on at least `min_listing_count` listings is a candidate.
//! Grouping runs inside the store as a terms aggregation with one sampled
//! listing per bucket; the sample provides the display name and source.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use agentsync_shared::{
    AgencyCandidate, AgentSyncError, DetectionConfig, ListingsConfig, Result,
};
use agentsync_store::{AggregationBucket, DocumentStore, TermsAggregation};

pub struct AgencyDetector {
    store: Arc<dyn DocumentStore>,
    listings: ListingsConfig,
    detection: DetectionConfig,
}

impl AgencyDetector {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        listings: ListingsConfig,
        detection: DetectionConfig,
    ) -> Self {
        Self {
            store,
            listings,
            detection,
        }
    }

    /// The aggregation issued for a given threshold.
    pub fn aggregation(&self, min_listing_count: u32) -> TermsAggregation {
        TermsAggregation {
            index: self.listings.index.clone(),
            field: self.listings.contact_field.clone(),
            min_doc_count: u64::from(min_listing_count),
            size: self.detection.bucket_cap,
            sample_fields: vec![
                self.listings.name_field.clone(),
                self.listings.source_field.clone(),
            ],
        }
    }

    /// Find every contact id with at least `min_listing_count` listings.
    ///
    /// Store failures propagate unchanged. Order of the result is not
    /// significant.
    #[instrument(skip_all, fields(index = %self.listings.index, min_listing_count = min_listing_count))]
    pub async fn detect(&self, min_listing_count: u32) -> Result<Vec<AgencyCandidate>> {
        if min_listing_count == 0 {
            return Err(AgentSyncError::validation(
                "min_listing_count must be at least 1",
            ));
        }

        let request = self.aggregation(min_listing_count);
        let buckets = self.store.aggregate_by_field(&request).await?;
        let bucket_count = buckets.len();

        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(bucket_count);
        for bucket in buckets {
            if bucket.doc_count < request.min_doc_count {
                debug!(key = %bucket.key, doc_count = bucket.doc_count, "bucket below threshold");
                continue;
            }
            if self.is_ignored(&bucket.key) {
                debug!(key = %bucket.key, "ignoring sentinel contact id");
                continue;
            }
            if !seen.insert(bucket.key.clone()) {
                debug!(key = %bucket.key, "duplicate bucket key");
                continue;
            }
            candidates.push(self.to_candidate(bucket));
        }

        info!(
            buckets = bucket_count,
            candidates = candidates.len(),
            "detection complete"
        );
        Ok(candidates)
    }

    fn is_ignored(&self, key: &str) -> bool {
        let key = key.trim();
        key.is_empty()
            || self
                .detection
                .ignored_contacts
                .iter()
                .any(|s| s.trim().eq_ignore_ascii_case(key))
    }

    fn to_candidate(&self, bucket: AggregationBucket) -> AgencyCandidate {
        let representative_name = bucket
            .sample_str(&self.listings.name_field)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(self.detection.placeholder_name.as_str())
            .to_string();
        let source = bucket
            .sample_str(&self.listings.source_field)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        AgencyCandidate {
            contact_id: bucket.key,
            listing_count: bucket.doc_count,
            representative_name,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentsync_store::MemoryStore;
    use serde_json::{Value, json};

    fn bucket(key: &str, doc_count: u64, sample: Value) -> AggregationBucket {
        AggregationBucket {
            key: key.into(),
            doc_count,
            sample: sample.as_object().cloned(),
        }
    }

    fn detector(store: Arc<MemoryStore>) -> AgencyDetector {
        AgencyDetector::new(store, ListingsConfig::default(), DetectionConfig::default())
    }

    fn by_key<'a>(candidates: &'a [AgencyCandidate], key: &str) -> &'a AgencyCandidate {
        candidates
            .iter()
            .find(|c| c.contact_id == key)
            .unwrap_or_else(|| panic!("no candidate {key}"))
    }

    #[tokio::test]
    async fn sentinels_and_blank_keys_are_skipped() {
        let store = Arc::new(MemoryStore::new().with_buckets(
            "listings",
            vec![
                bucket("0712345678", 7, json!({"user_name": "Ana Imobiliare"})),
                bucket("N/A", 20, json!({})),
                bucket("Unknown", 9, json!({})),
                bucket("  ", 6, json!({})),
            ],
        ));

        let candidates = detector(store).detect(5).await.unwrap();
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.contact_id, "0712345678");
        assert_eq!(c.listing_count, 7);
        assert_eq!(c.representative_name, "Ana Imobiliare");
    }

    #[tokio::test]
    async fn missing_or_blank_names_use_placeholder() {
        let store = Arc::new(MemoryStore::new().with_buckets(
            "listings",
            vec![
                bucket("0711111111", 5, json!({"ad_source": "publi24"})),
                bucket("0722222222", 6, json!({"user_name": "   "})),
                bucket("0733333333", 8, Value::Null),
            ],
        ));

        let candidates = detector(store).detect(5).await.unwrap();
        assert_eq!(candidates.len(), 3);
        for c in &candidates {
            assert_eq!(c.representative_name, "Unknown Agency");
        }
        assert_eq!(
            by_key(&candidates, "0711111111").source.as_deref(),
            Some("publi24")
        );
        assert_eq!(by_key(&candidates, "0733333333").source, None);
    }

    #[tokio::test]
    async fn threshold_is_passed_to_store_and_enforced() {
        let store = Arc::new(MemoryStore::new().with_buckets(
            "listings",
            vec![
                bucket("0711111111", 4, json!({})),
                bucket("0722222222", 5, json!({})),
            ],
        ));

        let candidates = detector(store.clone()).detect(5).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].contact_id, "0722222222");

        let requests = store.aggregation_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].field, "decrypted_phone.keyword");
        assert_eq!(requests[0].min_doc_count, 5);
        assert_eq!(requests[0].size, 10_000);
        assert_eq!(requests[0].sample_fields, vec!["user_name", "ad_source"]);
    }

    #[tokio::test]
    async fn duplicate_keys_yield_one_candidate() {
        let store = Arc::new(MemoryStore::new().with_buckets(
            "listings",
            vec![
                bucket("0711111111", 5, json!({"user_name": "First"})),
                bucket("0711111111", 9, json!({"user_name": "Second"})),
            ],
        ));

        let candidates = detector(store).detect(5).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].representative_name, "First");
    }

    #[tokio::test]
    async fn zero_threshold_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let err = detector(store.clone()).detect(0).await.unwrap_err();
        assert!(matches!(err, AgentSyncError::Validation { .. }));
        assert!(store.aggregation_requests().is_empty());
    }

    #[tokio::test]
    async fn store_failure_propagates() {
        let store = Arc::new(MemoryStore::new().fail_aggregation());
        let err = detector(store).detect(5).await.unwrap_err();
        assert!(err.is_transport());
    }
}
