//! Elasticsearch REST client.
//!
//! Speaks the typeless (7.x+) API: `PUT /{index}` with `mappings`, `_bulk`
//! NDJSON writes, `_mget`, ids queries and `_snapshot`. Transport errors,
//! 429 and 5xx answers are retried with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};

use hub_types::{ClientParams, Document};

use crate::client::{BulkOutcome, EngineConnector, IndexClient, SnapshotState};
use crate::error::SearchError;

/// Largest page an ids query may return.
const MAX_RESULT_WINDOW: usize = 10_000;

/// Builds [`EsClient`]s, one per set of client parameters.
#[derive(Debug, Clone, Default)]
pub struct EsConnector;

impl EsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl EngineConnector for EsConnector {
    fn client(&self, params: &ClientParams) -> Result<Arc<dyn IndexClient>, SearchError> {
        Ok(Arc::new(EsClient::new(params)?))
    }
}

/// Client bound to one Elasticsearch index.
pub struct EsClient {
    http: Client,
    base_url: String,
    index: String,
    num_shards: u32,
    num_replicas: u32,
    bulk_chunk_size: usize,
    max_retries: u32,
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

async fn status_error(resp: Response) -> SearchError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    SearchError::Status { status, body }
}

async fn json_body(resp: Response) -> Result<Value, SearchError> {
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

impl EsClient {
    pub fn new(params: &ClientParams) -> Result<Self, SearchError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(params.timeout_secs.max(1)))
            .build()
            .map_err(|e| SearchError::Config(e.to_string()))?;
        Ok(Self {
            http,
            base_url: normalize_host(&params.host),
            index: params.index_name.clone(),
            num_shards: params.num_shards,
            num_replicas: params.num_replicas,
            bulk_chunk_size: params.bulk_chunk_size.max(1),
            max_retries: params.max_retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request, retrying transient failures.
    async fn send<F>(&self, make: F) -> Result<Response, SearchError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        };
        let mut attempts = 0;

        loop {
            attempts += 1;
            let err = match make().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        status_error(resp).await
                    } else {
                        return Ok(resp);
                    }
                }
                Err(e) => SearchError::from(e),
            };

            if attempts > self.max_retries {
                error!(index = %self.index, error = %err, "Max retries exceeded");
                return Err(err);
            }
            match backoff.next_backoff() {
                Some(duration) => {
                    warn!(
                        index = %self.index,
                        error = %err,
                        retry_in_ms = duration.as_millis(),
                        "Engine request failed, retrying"
                    );
                    tokio::time::sleep(duration).await;
                }
                None => {
                    error!(index = %self.index, error = %err, "Backoff exhausted");
                    return Err(err);
                }
            }
        }
    }

    /// Send and require a 2xx answer; 404 maps to `not_found`.
    async fn send_ok<F>(&self, make: F, not_found: SearchError) -> Result<Response, SearchError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let resp = self.send(make).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(not_found);
        }
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        Ok(resp)
    }

    fn index_missing(&self) -> SearchError {
        SearchError::IndexNotFound(self.index.clone())
    }

    async fn bulk_chunk(&self, docs: &[Document]) -> Result<BulkOutcome, SearchError> {
        let mut outcome = BulkOutcome::default();
        let mut body = String::new();
        for doc in docs {
            let mut source = doc.clone();
            let id = match source.remove("_id") {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => {
                    outcome
                        .errors
                        .push(json!({"error": "document has no _id", "doc": doc}));
                    continue;
                }
            };
            let action = json!({"index": {"_index": self.index, "_id": id}});
            body.push_str(&serde_json::to_string(&action)?);
            body.push('\n');
            body.push_str(&serde_json::to_string(&source)?);
            body.push('\n');
        }
        if body.is_empty() {
            return Ok(outcome);
        }

        let url = self.url("_bulk");
        let resp = self
            .send_ok(
                || {
                    self.http
                        .post(&url)
                        .header("Content-Type", "application/x-ndjson")
                        .body(body.clone())
                },
                self.index_missing(),
            )
            .await?;
        let answer = json_body(resp).await?;

        let items = answer
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| SearchError::Serialization("bulk answer has no items".to_string()))?;
        for item in items {
            let result = item.get("index").unwrap_or(item);
            let status = result.get("status").and_then(Value::as_u64).unwrap_or(0);
            if (200..300).contains(&status) {
                outcome.count += 1;
            } else {
                outcome.errors.push(result.clone());
            }
        }
        Ok(outcome)
    }
}

#[async_trait]
impl IndexClient for EsClient {
    fn index_name(&self) -> &str {
        &self.index
    }

    async fn create_index(&self, mapping: &Value, settings: &Value) -> Result<(), SearchError> {
        let mut merged = Map::new();
        merged.insert("number_of_shards".to_string(), json!(self.num_shards));
        merged.insert("number_of_replicas".to_string(), json!(self.num_replicas));
        if let Some(extra) = settings.as_object() {
            merged.extend(extra.clone());
        } else if !settings.is_null() {
            return Err(SearchError::InvalidRequest(
                "index settings must be an object".to_string(),
            ));
        }
        let body = json!({"settings": merged, "mappings": mapping});
        let url = self.url(&self.index);
        let resp = self.send(|| self.http.put(&url).json(&body)).await?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        debug!(index = %self.index, "Index created");
        Ok(())
    }

    async fn index_exists(&self) -> Result<bool, SearchError> {
        let url = self.url(&self.index);
        let resp = self.send(|| self.http.head(&url)).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            _ => Err(status_error(resp).await),
        }
    }

    async fn delete_index(&self) -> Result<(), SearchError> {
        let url = self.url(&self.index);
        self.send_ok(|| self.http.delete(&url), self.index_missing())
            .await?;
        debug!(index = %self.index, "Index deleted");
        Ok(())
    }

    async fn bulk_index(&self, docs: Vec<Document>) -> Result<BulkOutcome, SearchError> {
        let mut outcome = BulkOutcome::default();
        for chunk in docs.chunks(self.bulk_chunk_size) {
            outcome = outcome.combine(self.bulk_chunk(chunk).await?);
        }
        Ok(outcome)
    }

    async fn mget(&self, ids: &[String]) -> Result<Vec<Document>, SearchError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.url(&format!("{}/_mget", self.index));
        let body = json!({"ids": ids});
        let resp = self
            .send_ok(|| self.http.post(&url).json(&body), self.index_missing())
            .await?;
        let answer = json_body(resp).await?;

        let mut docs = Vec::new();
        for entry in answer
            .get("docs")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if entry.get("found").and_then(Value::as_bool) != Some(true) {
                continue;
            }
            let mut doc = entry
                .get("_source")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            if let Some(id) = entry.get("_id") {
                doc.insert("_id".to_string(), id.clone());
            }
            docs.push(doc);
        }
        Ok(docs)
    }

    async fn exists_bulk(&self, ids: &[String]) -> Result<Vec<(String, bool)>, SearchError> {
        let url = self.url(&format!("{}/_search", self.index));
        let mut found = std::collections::HashSet::new();
        for chunk in ids.chunks(MAX_RESULT_WINDOW) {
            let body = json!({
                "query": {"ids": {"values": chunk}},
                "_source": false,
                "size": chunk.len(),
            });
            let resp = self
                .send_ok(|| self.http.post(&url).json(&body), self.index_missing())
                .await?;
            let answer = json_body(resp).await?;
            let hits = answer
                .pointer("/hits/hits")
                .and_then(Value::as_array)
                .into_iter()
                .flatten();
            for hit in hits {
                if let Some(id) = hit.get("_id").and_then(Value::as_str) {
                    found.insert(id.to_string());
                }
            }
        }
        Ok(ids
            .iter()
            .map(|id| (id.clone(), found.contains(id)))
            .collect())
    }

    async fn count(&self) -> Result<u64, SearchError> {
        let url = self.url(&format!("{}/_count", self.index));
        let resp = self
            .send_ok(|| self.http.get(&url), self.index_missing())
            .await?;
        let answer = json_body(resp).await?;
        answer
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| SearchError::Serialization("count answer has no count".to_string()))
    }

    async fn snapshot_create(
        &self,
        repository: &str,
        snapshot: &str,
        purge: bool,
    ) -> Result<Value, SearchError> {
        let url = self.url(&format!("_snapshot/{}/{}", repository, snapshot));
        if purge {
            let resp = self.send(|| self.http.delete(&url)).await?;
            match resp.status() {
                s if s.is_success() => {
                    debug!(repository = %repository, snapshot = %snapshot, "Deleted existing snapshot")
                }
                StatusCode::NOT_FOUND => {}
                _ => return Err(status_error(resp).await),
            }
        }
        let body = json!({"indices": self.index, "include_global_state": false});
        let resp = self
            .send_ok(
                || self.http.put(&url).json(&body),
                SearchError::SnapshotNotFound(format!("repository '{}'", repository)),
            )
            .await?;
        json_body(resp).await
    }

    async fn snapshot_status(
        &self,
        repository: &str,
        snapshot: &str,
    ) -> Result<SnapshotState, SearchError> {
        let url = self.url(&format!("_snapshot/{}/{}/_status", repository, snapshot));
        let missing = || SearchError::SnapshotNotFound(format!("{}/{}", repository, snapshot));
        let resp = self.send_ok(|| self.http.get(&url), missing()).await?;
        let answer = json_body(resp).await?;
        // one index per snapshot, first entry is enough
        answer
            .pointer("/snapshots/0/state")
            .and_then(Value::as_str)
            .map(SnapshotState::parse)
            .ok_or_else(missing)
    }

    async fn get_mapping_meta(&self) -> Result<Value, SearchError> {
        let url = self.url(&format!("{}/_mapping", self.index));
        let resp = self
            .send_ok(|| self.http.get(&url), self.index_missing())
            .await?;
        let answer = json_body(resp).await?;
        let mappings = answer
            .get(&self.index)
            .or_else(|| answer.as_object().and_then(|m| m.values().next()))
            .and_then(|v| v.get("mappings"));
        Ok(mappings
            .and_then(|m| m.get("_meta"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn update_mapping_meta(&self, meta: &Value) -> Result<(), SearchError> {
        let url = self.url(&format!("{}/_mapping", self.index));
        let body = json!({"_meta": meta});
        self.send_ok(|| self.http.put(&url).json(&body), self.index_missing())
            .await?;
        Ok(())
    }

    async fn get_repository(&self, repository: &str) -> Result<Value, SearchError> {
        let url = self.url(&format!("_snapshot/{}", repository));
        let resp = self
            .send_ok(
                || self.http.get(&url),
                SearchError::SnapshotNotFound(format!("repository '{}'", repository)),
            )
            .await?;
        let answer = json_body(resp).await?;
        Ok(answer.get(repository).cloned().unwrap_or(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> EsClient {
        let params = ClientParams::new(server.uri(), "genes_20240301", "gene")
            .with_bulk_chunk_size(2)
            .with_max_retries(2)
            .with_timeout_secs(5);
        EsClient::new(&params).unwrap()
    }

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("localhost:9200"), "http://localhost:9200");
        assert_eq!(normalize_host("https://es:9200/"), "https://es:9200");
    }

    #[tokio::test]
    async fn test_index_exists() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/genes_20240301"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        assert!(client_for(&server).index_exists().await.unwrap());

        let empty = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&empty)
            .await;
        assert!(!client_for(&empty).index_exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_create_index_sends_settings_and_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/genes_20240301"))
            .and(body_partial_json(json!({
                "settings": {"number_of_shards": 4, "codec": "best_compression"},
                "mappings": {"dynamic": false}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true})))
            .expect(1)
            .mount(&server)
            .await;

        let settings = json!({"number_of_shards": 4, "codec": "best_compression"});
        let mapping = json!({"dynamic": false, "properties": {"all": {"type": "text"}}});
        client_for(&server)
            .create_index(&mapping, &settings)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_index_conflict_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                "{\"error\":{\"type\":\"resource_already_exists_exception\"}}",
            ))
            .mount(&server)
            .await;
        let err = client_for(&server)
            .create_index(&json!({}), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Status { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_bulk_index_chunks_and_counts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(body_string_contains("\"_id\":\"g3\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": true,
                "items": [{"index": {"_id": "g3", "status": 400, "error": {"type": "mapper_parsing_exception"}}}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": false,
                "items": [
                    {"index": {"_id": "g1", "status": 201}},
                    {"index": {"_id": "g2", "status": 200}}
                ]
            })))
            .mount(&server)
            .await;

        let docs = vec![
            doc(json!({"_id": "g1", "symbol": "A"})),
            doc(json!({"_id": "g2", "symbol": "B"})),
            doc(json!({"_id": "g3", "symbol": "C"})),
            doc(json!({"symbol": "no id"})),
        ];
        let outcome = client_for(&server).bulk_index(docs).await.unwrap();
        assert_eq!(outcome.count, 2);
        // one engine rejection, one document without id
        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/genes_20240301/_count"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/genes_20240301/_count"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 25000})))
            .mount(&server)
            .await;

        assert_eq!(client_for(&server).count().await.unwrap(), 25000);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;
        let err = client_for(&server).count().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_mget_and_exists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/genes_20240301/_mget"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "docs": [
                    {"_id": "g1", "found": true, "_source": {"symbol": "A", "note": "kept"}},
                    {"_id": "g9", "found": false}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/genes_20240301/_search"))
            .and(body_partial_json(json!({"query": {"ids": {"values": ["g1", "g9"]}}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": {"hits": [{"_id": "g1"}]}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let ids = vec!["g1".to_string(), "g9".to_string()];
        let docs = client.mget(&ids).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["_id"], json!("g1"));
        assert_eq!(docs[0]["note"], json!("kept"));

        let exists = client.exists_bulk(&ids).await.unwrap();
        assert_eq!(
            exists,
            vec![("g1".to_string(), true), ("g9".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_snapshot_calls() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/_snapshot/hub_repository/genes_20240301"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/_snapshot/hub_repository/genes_20240301"))
            .and(body_partial_json(json!({"indices": "genes_20240301"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accepted": true})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_snapshot/hub_repository/genes_20240301/_status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "snapshots": [{"snapshot": "genes_20240301", "state": "IN_PROGRESS"}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let res = client
            .snapshot_create("hub_repository", "genes_20240301", true)
            .await
            .unwrap();
        assert_eq!(res, json!({"accepted": true}));
        let state = client
            .snapshot_status("hub_repository", "genes_20240301")
            .await
            .unwrap();
        assert_eq!(state, SnapshotState::InProgress);
    }

    #[tokio::test]
    async fn test_mapping_meta() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/genes_20240301/_mapping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "genes_20240301": {"mappings": {"_meta": {"build_version": "20240301"}}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/genes_20240301/_mapping"))
            .and(body_partial_json(json!({"_meta": {"build_version": "x"}})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_snapshot/hub_repository"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hub_repository": {"type": "s3", "settings": {"bucket": "b"}}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let meta = client.get_mapping_meta().await.unwrap();
        assert_eq!(meta["build_version"], json!("20240301"));
        client
            .update_mapping_meta(&json!({"build_version": "x"}))
            .await
            .unwrap();
        let repo = client.get_repository("hub_repository").await.unwrap();
        assert_eq!(repo["type"], json!("s3"));
    }

    #[tokio::test]
    async fn test_delete_missing_index() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        assert!(matches!(
            client_for(&server).delete_index().await,
            Err(SearchError::IndexNotFound(_))
        ));
    }
}
