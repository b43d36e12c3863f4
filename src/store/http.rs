//! HTTP `DocumentStore` implementation.
//!
//! Talks JSON to the content-store API over `reqwest`. Two clients are kept:
//! a short-timeout one for request/response calls and a long-timeout one for
//! the change-feed connection, which stays open for minutes.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::Value;

use super::client::DocumentStore;
use super::config::StoreConfig;
use super::errors::StoreError;
use super::listen::parse_event_stream;
use super::types::{
    AssetKind, AssetMeta, AssetRef, AssetSource, DocumentEvent, PatchOp,
};

// ─── Constants ──────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Wire envelopes ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DocumentIdResponse {
    #[serde(alias = "documentId", alias = "_id")]
    id: String,
}

#[derive(Deserialize)]
struct DocumentResponse {
    document: Value,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Deserialize)]
struct AssetResponse {
    asset: AssetRef,
}

// ─── HttpDocumentStore ──────────────────────────────────────────────────────

/// Client for the content-store HTTP API.
pub struct HttpDocumentStore {
    http: HttpClient,
    http_listen: HttpClient,
    config: StoreConfig,
}

impl HttpDocumentStore {
    /// Build a store client from config. Does not check connectivity — that
    /// happens on the first request.
    pub fn from_config(config: StoreConfig) -> Result<Self, StoreError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| StoreError::Transport {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let http_listen = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.listen_timeout_secs))
            .build()
            .map_err(|e| StoreError::Transport {
                reason: format!("failed to build listen HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            http_listen,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout {
                duration_secs: self.config.request_timeout_secs,
            }
        } else {
            StoreError::Transport {
                reason: e.to_string(),
            }
        }
    }

    /// Turn a non-2xx response into a `StoreError`, reading the body for
    /// context.
    async fn check(&self, resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        if status.as_u16() == 409 {
            return Err(StoreError::Conflict { reason: body });
        }
        Err(StoreError::Http {
            status: status.as_u16(),
            body,
        })
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<T, StoreError> {
        let resp = self
            .authorize(self.http.post(self.url(path)).json(body))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let resp = self.check(resp).await?;
        resp.json::<T>().await.map_err(|e| StoreError::Serialization {
            reason: format!("invalid response body: {e}"),
        })
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn create(&self, doc: Value) -> Result<String, StoreError> {
        tracing::debug!(doc_type = doc.get("_type").and_then(|v| v.as_str()), "create document");
        let resp: DocumentIdResponse = self.post_json("documents", &doc).await?;
        Ok(resp.id)
    }

    async fn create_or_replace(&self, id: &str, doc: Value) -> Result<String, StoreError> {
        let resp = self
            .authorize(self.http.put(self.url(&format!("documents/{id}"))).json(&doc))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let resp = self.check(resp).await?;
        let parsed: DocumentIdResponse =
            resp.json().await.map_err(|e| StoreError::Serialization {
                reason: format!("invalid response body: {e}"),
            })?;
        Ok(parsed.id)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Value>, StoreError> {
        let resp = self
            .authorize(self.http.get(self.url(&format!("documents/{id}"))))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let resp = self.check(resp).await?;
        let parsed: DocumentResponse =
            resp.json().await.map_err(|e| StoreError::Serialization {
                reason: format!("invalid response body: {e}"),
            })?;
        Ok(Some(parsed.document))
    }

    async fn patch(&self, id: &str, ops: Vec<PatchOp>) -> Result<Value, StoreError> {
        tracing::debug!(document_id = id, ops = ops.len(), "patch document");
        let body = serde_json::json!({ "ops": ops });
        let resp: DocumentResponse = self
            .post_json(&format!("documents/{id}/patch"), &body)
            .await?;
        Ok(resp.document)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        tracing::debug!(document_id = id, "delete document");
        let resp = self
            .authorize(self.http.delete(self.url(&format!("documents/{id}"))))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        // Deleting a missing document is a no-op
        if resp.status().as_u16() == 404 {
            return Ok(());
        }
        self.check(resp).await?;
        Ok(())
    }

    async fn fetch(&self, query: &str, params: Option<Value>) -> Result<Vec<Value>, StoreError> {
        let body = serde_json::json!({ "query": query, "params": params });
        let resp: QueryResponse = self.post_json("query", &body).await?;
        Ok(resp.results)
    }

    async fn upload_asset(
        &self,
        kind: AssetKind,
        source: AssetSource,
        meta: AssetMeta,
    ) -> Result<AssetRef, StoreError> {
        match source {
            AssetSource::Bytes(bytes) => {
                let mut req = self
                    .http
                    .post(self.url(&format!("assets/{}", kind.as_str())))
                    .body(bytes);
                if let Some(filename) = &meta.filename {
                    req = req.query(&[("filename", filename)]);
                }
                if let Some(content_type) = &meta.content_type {
                    req = req.header("content-type", content_type);
                }
                let resp = self
                    .authorize(req)
                    .send()
                    .await
                    .map_err(|e| self.transport_error(e))?;
                let resp = self.check(resp).await?;
                let parsed: AssetResponse =
                    resp.json().await.map_err(|e| StoreError::Serialization {
                        reason: format!("invalid response body: {e}"),
                    })?;
                Ok(parsed.asset)
            }
            AssetSource::Url(url) => {
                let body = serde_json::json!({ "url": url, "meta": meta });
                let resp: AssetResponse = self
                    .post_json(&format!("assets/{}/import", kind.as_str()), &body)
                    .await?;
                Ok(resp.asset)
            }
        }
    }

    async fn fetch_external_frame(&self, url: &str) -> Result<Value, StoreError> {
        let body = serde_json::json!({ "url": url });
        let resp: DocumentResponse = self.post_json("external/frames", &body).await?;
        Ok(resp.document)
    }

    async fn import_external_asset(
        &self,
        url: &str,
        meta: AssetMeta,
    ) -> Result<AssetRef, StoreError> {
        let body = serde_json::json!({ "url": url, "meta": meta });
        let resp: AssetResponse = self.post_json("external/assets", &body).await?;
        Ok(resp.asset)
    }

    async fn listen(
        &self,
        query: &str,
    ) -> Result<BoxStream<'static, Result<DocumentEvent, StoreError>>, StoreError> {
        let resp = self
            .authorize(
                self.http_listen
                    .get(self.url("listen"))
                    .query(&[("query", query)])
                    .header("accept", "text/event-stream"),
            )
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let resp = self.check(resp).await?;
        Ok(parse_event_stream(resp))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let store =
            HttpDocumentStore::from_config(StoreConfig::new("https://x.test/v1/")).unwrap();
        assert_eq!(store.url("documents"), "https://x.test/v1/documents");
    }

    #[test]
    fn test_document_id_response_aliases() {
        let a: DocumentIdResponse = serde_json::from_str(r#"{"id": "p1"}"#).unwrap();
        assert_eq!(a.id, "p1");
        let b: DocumentIdResponse = serde_json::from_str(r#"{"documentId": "p2"}"#).unwrap();
        assert_eq!(b.id, "p2");
        let c: DocumentIdResponse = serde_json::from_str(r#"{"_id": "p3"}"#).unwrap();
        assert_eq!(c.id, "p3");
    }

    #[test]
    fn test_query_response_defaults_to_empty() {
        let parsed: QueryResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.results.is_empty());
    }
}
