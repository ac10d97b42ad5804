// src/remote/http.rs

//! Kinto-style HTTP record store.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, IF_NONE_MATCH};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use super::{BatchOperation, OperationResult, RecordFilter, RecordStore, ServerInfo};
use crate::error::{AppError, Result};
use crate::models::{Record, RemoteConfig};
use crate::utils::http::create_store_client;

const NEXT_PAGE: &str = "Next-Page";

#[derive(Deserialize)]
struct RecordsPage {
    data: Vec<Record>,
}

#[derive(Deserialize)]
struct BatchResponse {
    responses: Vec<BatchItemResponse>,
}

#[derive(Deserialize)]
struct BatchItemResponse {
    status: u16,
    #[serde(default)]
    body: Value,
}

/// [`RecordStore`] backed by a Kinto server.
pub struct HttpRecordStore {
    client: Client,
    server_url: String,
    bucket: String,
    collection: String,
    auth: Option<(String, String)>,
    initialize: bool,
}

impl HttpRecordStore {
    pub fn new(config: &RemoteConfig, user_agent: &str) -> Result<Self> {
        let auth = config.auth.as_deref().map(|auth| {
            let (user, password) = auth.split_once(':').unwrap_or((auth, ""));
            (user.to_string(), password.to_string())
        });
        Ok(Self {
            client: create_store_client(config, user_agent)?,
            server_url: config.server_url.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            collection: config.collection.clone(),
            auth,
            initialize: config.initialize,
        })
    }

    fn bucket_path(&self) -> String {
        format!("/buckets/{}", self.bucket)
    }

    fn collection_path(&self) -> String {
        format!("{}/collections/{}", self.bucket_path(), self.collection)
    }

    fn record_path(&self, id: &str) -> String {
        format!("{}/records/{}", self.collection_path(), id)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.auth {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| AppError::unavailable(format!("{what}: {e}")))?;
        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::unavailable(format!("{what}: status {status}")));
        }
        Ok(response)
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: Response, what: &str) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::fetch(what, format!("status {status}: {body}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::unavailable(format!("{what}: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| AppError::fetch(what, e))
    }

    fn records_url(&self, filter: &RecordFilter) -> Result<Url> {
        let base = format!("{}{}/records", self.server_url, self.collection_path());
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(product) = &filter.product {
            params.push(("source.product", product.clone()));
        }
        if let Some(channel) = &filter.channel {
            params.push(("target.channel", channel.clone()));
        }
        if let Some(sort) = &filter.sort {
            params.push(("_sort", sort.clone()));
        }
        if let Some(limit) = filter.limit {
            params.push(("_limit", limit.to_string()));
        }
        if let Some(since) = filter.since {
            params.push(("_since", since.to_string()));
        }
        Ok(Url::parse_with_params(&base, &params)?)
    }

    /// Create a bucket or collection, tolerating one that already exists.
    async fn create_if_absent(&self, path: &str, body: Value) -> Result<()> {
        let url = format!("{}{}", self.server_url, path);
        let response = self
            .send(
                self.request(Method::PUT, &url)
                    .header(IF_NONE_MATCH, "*")
                    .json(&body),
                path,
            )
            .await?;
        match response.status() {
            status if status.is_success() => {
                log::info!("Created {}", path);
                Ok(())
            }
            StatusCode::PRECONDITION_FAILED => Ok(()),
            status => Err(AppError::fetch(&url, format!("status {status}"))),
        }
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn server_info(&self) -> Result<ServerInfo> {
        let url = format!("{}/", self.server_url);
        let response = self.send(self.request(Method::GET, &url), "server info").await?;
        Self::json(response, &url).await
    }

    async fn get_records(&self, filter: &RecordFilter) -> Result<Vec<Record>> {
        let mut next = Some(self.records_url(filter)?.to_string());
        let mut records = Vec::new();

        while let Some(url) = next.take() {
            let response = self.send(self.request(Method::GET, &url), "get records").await?;
            next = next_page(response.headers());
            let page: RecordsPage = Self::json(response, &url).await?;
            records.extend(page.data);

            // A limited query asks for one page only.
            if filter.limit.is_some_and(|limit| records.len() >= limit) {
                records.truncate(filter.limit.unwrap_or(records.len()));
                break;
            }
        }
        Ok(records)
    }

    async fn submit_batch(&self, operations: Vec<BatchOperation>) -> Result<Vec<OperationResult>> {
        let requests: Vec<Value> = operations
            .iter()
            .map(|operation| {
                let record = operation.record();
                let mut request = json!({
                    "method": "PUT",
                    "path": self.record_path(&record.id),
                    "body": {"data": record},
                });
                if matches!(operation, BatchOperation::Create(_)) {
                    request["headers"] = json!({"If-None-Match": "*"});
                }
                request
            })
            .collect();

        let url = format!("{}/batch", self.server_url);
        let response = self
            .send(
                self.request(Method::POST, &url)
                    .json(&json!({"requests": requests})),
                "batch",
            )
            .await?;
        let batch: BatchResponse = Self::json(response, &url).await?;
        if batch.responses.len() != operations.len() {
            return Err(AppError::unavailable(format!(
                "batch answered {} of {} operations",
                batch.responses.len(),
                operations.len()
            )));
        }

        Ok(batch
            .responses
            .into_iter()
            .map(|item| OperationResult {
                status: item.status,
                body: item.body,
            })
            .collect())
    }

    async fn ensure_collection(&self) -> Result<()> {
        if !self.initialize {
            return Ok(());
        }
        self.create_if_absent(
            &self.bucket_path(),
            json!({"permissions": {"read": ["system.Everyone"]}}),
        )
        .await?;
        self.create_if_absent(&self.collection_path(), json!({})).await
    }

    fn describe(&self) -> String {
        format!("{}{}", self.server_url, self.collection_path())
    }
}

fn next_page(headers: &HeaderMap) -> Option<String> {
    headers
        .get(NEXT_PAGE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(String::from)
}
