//! Flag propagation onto the listings index.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{info, instrument};

use agentsync_shared::{AgentSyncError, ListingsConfig, Result, SyncTaskHandle};
use agentsync_store::{ConflictsPolicy, DocumentStore, Script, UpdateByQuery};

const SET_FLAG_SCRIPT: &str = "ctx._source[params.field] = params.value";

/// Sets the agency flag on every listing of the classified contacts.
pub struct SyncPropagator {
    store: Arc<dyn DocumentStore>,
    listings: ListingsConfig,
}

impl SyncPropagator {
    pub fn new(store: Arc<dyn DocumentStore>, listings: ListingsConfig) -> Self {
        Self { store, listings }
    }

    /// Build the update-by-query for a set of contact ids.
    ///
    /// Ids are deduplicated and sorted. Listings already flagged are excluded
    /// so repeated runs touch only new matches.
    pub fn request(&self, contact_ids: &[String]) -> Result<UpdateByQuery> {
        Ok(self.build_request(&distinct_ids(contact_ids)?))
    }

    fn build_request(&self, ids: &BTreeSet<&str>) -> UpdateByQuery {
        let query = json!({
            "bool": {
                "filter": [
                    { "terms": { (self.listings.contact_field.as_str()): ids } }
                ],
                "must_not": [
                    { "term": { (self.listings.flag_field.as_str()): true } }
                ]
            }
        });

        let mut params = Map::new();
        params.insert("field".into(), Value::from(self.listings.flag_field.as_str()));
        params.insert("value".into(), Value::Bool(true));

        UpdateByQuery {
            index: self.listings.index.clone(),
            query,
            script: Script::painless(SET_FLAG_SCRIPT, params),
            conflicts: ConflictsPolicy::Proceed,
            wait_for_completion: false,
        }
    }

    /// Submit the flag update and return without waiting for it.
    #[instrument(skip_all, fields(index = %self.listings.index))]
    pub async fn propagate(&self, contact_ids: &[String]) -> Result<SyncTaskHandle> {
        let ids = distinct_ids(contact_ids)?;
        let contact_count = ids.len();
        let request = self.build_request(&ids);

        let task_id = self.store.bulk_update_by_query(&request).await?;
        info!(%task_id, contacts = contact_count, "flag update submitted");

        Ok(SyncTaskHandle {
            task_id,
            index: self.listings.index.clone(),
            contact_count,
        })
    }
}

fn distinct_ids(contact_ids: &[String]) -> Result<BTreeSet<&str>> {
    let ids: BTreeSet<&str> = contact_ids
        .iter()
        .map(String::as_str)
        .filter(|id| !id.trim().is_empty())
        .collect();
    if ids.is_empty() {
        return Err(AgentSyncError::validation("no contact ids to propagate"));
    }
    Ok(ids)
}
