//! HTTP client for an OpenSearch/Elasticsearch-compatible document store.

use std::time::Duration;

use agentsync_shared::{AgentSyncError, Result, StoreConfig, resolve_credentials, store_base_url};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

use crate::DocumentStore;
use crate::request::{
    AggregationBucket, IndexStatus, TaskStatus, TermsAggregation, UpdateByQuery, WriteOutcome,
    parse_aggregation_response, parse_task_response, parse_task_submission, parse_write_response,
};

/// User-Agent string for store requests.
const USER_AGENT: &str = concat!("AgentSync/", env!("CARGO_PKG_VERSION"));

/// Error type the store reports when an index is created concurrently.
const ALREADY_EXISTS: &str = "resource_already_exists_exception";

/// Thin REST adapter. One method per store request, no business logic.
pub struct OpenSearchClient {
    client: Client,
    base_url: Url,
    credentials: Option<(String, String)>,
}

impl OpenSearchClient {
    /// Build a client from the `[store]` config section.
    ///
    /// Credentials are resolved from the environment here, so a missing
    /// password fails before any request is made.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let base_url = store_base_url(config)?;
        let credentials = resolve_credentials(config)?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| AgentSyncError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    /// Base URL requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append path segments to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                AgentSyncError::config(format!("store url cannot be a base: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    /// Send a request, mapping connection-level failures to transport errors.
    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        builder
            .send()
            .await
            .map_err(|e| AgentSyncError::Transport(format!("{what}: {e}")))
    }
}

/// Turn a non-2xx response into a status error carrying the body.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AgentSyncError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn read_json(response: Response, what: &str) -> Result<Value> {
    response
        .json::<Value>()
        .await
        .map_err(|e| AgentSyncError::Transport(format!("{what}: failed to read body: {e}")))
}

#[async_trait]
impl DocumentStore for OpenSearchClient {
    #[instrument(skip_all, fields(index = %request.index, field = %request.field))]
    async fn aggregate_by_field(
        &self,
        request: &TermsAggregation,
    ) -> Result<Vec<AggregationBucket>> {
        let url = self.endpoint(&[request.index.as_str(), "_search"])?;
        debug!(%url, min_doc_count = request.min_doc_count, "running terms aggregation");

        let response = self
            .send(
                self.request(Method::POST, url).json(&request.to_body()),
                "aggregation",
            )
            .await?;
        let body = read_json(check_status(response).await?, "aggregation").await?;
        parse_aggregation_response(&body)
    }

    #[instrument(skip_all, fields(index = %index))]
    async fn ensure_index(&self, index: &str, schema: &Value) -> Result<IndexStatus> {
        let url = self.endpoint(&[index])?;

        let probe = self
            .send(self.request(Method::HEAD, url.clone()), "index probe")
            .await?;
        match probe.status() {
            StatusCode::OK => {
                debug!("index exists, leaving it untouched");
                return Ok(IndexStatus::Existing);
            }
            StatusCode::NOT_FOUND => {}
            other => {
                return Err(AgentSyncError::Status {
                    status: other.as_u16(),
                    body: format!("unexpected status probing index '{index}'"),
                });
            }
        }

        debug!("index missing, creating");
        let response = self
            .send(
                self.request(Method::PUT, url).json(schema),
                "index create",
            )
            .await?;
        match check_status(response).await {
            Ok(_) => Ok(IndexStatus::Created),
            // Created concurrently by another run.
            Err(AgentSyncError::Status { body, .. }) if body.contains(ALREADY_EXISTS) => {
                Ok(IndexStatus::Existing)
            }
            Err(e) => Err(e),
        }
    }

    async fn upsert_document(
        &self,
        index: &str,
        id: &str,
        body: &Value,
    ) -> Result<WriteOutcome> {
        let url = self.endpoint(&[index, "_doc", id])?;
        let response = self
            .send(self.request(Method::PUT, url).json(body), "document upsert")
            .await?;
        let body = read_json(check_status(response).await?, "document upsert").await?;
        parse_write_response(&body)
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let url = self.endpoint(&[index, "_doc", id])?;
        let response = self
            .send(self.request(Method::GET, url), "document get")
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = read_json(check_status(response).await?, "document get").await?;
        if body.get("found").and_then(Value::as_bool) == Some(false) {
            return Ok(None);
        }
        Ok(body.get("_source").cloned())
    }

    async fn update_document(&self, index: &str, id: &str, partial: &Value) -> Result<()> {
        let url = self.endpoint(&[index, "_update", id])?;
        let response = self
            .send(
                self.request(Method::POST, url).json(&json!({ "doc": partial })),
                "document update",
            )
            .await?;
        check_status(response).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(index = %request.index))]
    async fn bulk_update_by_query(&self, request: &UpdateByQuery) -> Result<String> {
        let url = self.endpoint(&[request.index.as_str(), "_update_by_query"])?;
        debug!(
            %url,
            conflicts = request.conflicts.as_str(),
            wait = request.wait_for_completion,
            "submitting update-by-query"
        );

        let response = self
            .send(
                self.request(Method::POST, url)
                    .query(&request.query_params())
                    .json(&request.to_body()),
                "update-by-query",
            )
            .await?;
        let body = read_json(check_status(response).await?, "update-by-query").await?;
        parse_task_submission(&body)
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus> {
        let url = self.endpoint(&["_tasks", task_id])?;
        let response = self
            .send(self.request(Method::GET, url), "task status")
            .await?;
        let body = read_json(check_status(response).await?, "task status").await?;
        parse_task_response(task_id, &body)
    }
}
