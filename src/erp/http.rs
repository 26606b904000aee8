//! reqwest-backed [`ErpClient`] for the `/api/resource` and `/api/method`
//! endpoints.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Url};
use serde_json::{Value, json};

use super::config::ErpConfig;
use super::{ErpClient, ListQuery};
use crate::core::{ComprobanteError, ExternalError};

const CANCEL_METHOD: &str = "frappe.client.cancel";

/// HTTP client for the document API.
///
/// Requests are issued one at a time by the caller; each is bounded by
/// [`ErpConfig::timeout`] and never retried here.
pub struct HttpErpClient {
    config: ErpConfig,
    client: reqwest::Client,
}

impl HttpErpClient {
    pub fn new(config: ErpConfig) -> Result<Self, ComprobanteError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ComprobanteError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// Client configured from the environment, see [`ErpConfig::from_env`].
    pub fn from_env() -> Result<Self, ComprobanteError> {
        Self::new(ErpConfig::from_env()?)
    }

    pub fn config(&self) -> &ErpConfig {
        &self.config
    }

    /// URL under the site root with each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, ExternalError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| ExternalError::transport(format!("invalid base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ExternalError::transport("base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn resource_url(&self, doctype: &str, name: Option<&str>) -> Result<Url, ExternalError> {
        match name {
            Some(name) => self.url(&["api", "resource", doctype, name]),
            None => self.url(&["api", "resource", doctype]),
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, ExternalError> {
        let request = match self.config.authorization() {
            Some(auth) => request.header(AUTHORIZATION, auth),
            None => request,
        };
        let response = request
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ExternalError::transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExternalError::transport(e.to_string()))?;

        if !status.is_success() {
            let err = ExternalError::from_body(status.as_u16(), &body);
            tracing::debug!(status = status.as_u16(), error = %err, "ERP request failed");
            return Err(err);
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| ExternalError::transport(format!("unreadable response body: {e}")))?;
        Ok(unwrap_data(value))
    }
}

/// Responses wrap the payload as `{"data": ...}` (resources) or
/// `{"message": ...}` (methods).
fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut map) => match map.remove("data") {
            Some(data) => data,
            None => map.remove("message").unwrap_or(Value::Object(map)),
        },
        other => other,
    }
}

#[async_trait]
impl ErpClient for HttpErpClient {
    async fn get(&self, doctype: &str, name: &str) -> Result<Value, ExternalError> {
        let url = self.resource_url(doctype, Some(name))?;
        tracing::debug!(doctype, name, "GET");
        self.send(self.client.get(url)).await
    }

    async fn list(&self, doctype: &str, query: &ListQuery) -> Result<Vec<Value>, ExternalError> {
        let mut url = self.resource_url(doctype, None)?;
        {
            let mut pairs = url.query_pairs_mut();
            if !query.filters.is_empty() {
                pairs.append_pair("filters", &query.filters_value().to_string());
            }
            if !query.fields.is_empty() {
                pairs.append_pair("fields", &json!(query.fields).to_string());
            }
            if let Some(order) = &query.order_by {
                pairs.append_pair("order_by", order);
            }
            if let Some(limit) = query.limit {
                pairs.append_pair("limit_page_length", &limit.to_string());
            }
        }
        tracing::debug!(doctype, filters = query.filters.len(), "LIST");
        match self.send(self.client.get(url)).await? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Err(ExternalError::transport(format!(
                "expected a list of {doctype}, got {other}"
            ))),
        }
    }

    async fn insert(&self, doctype: &str, doc: Value) -> Result<Value, ExternalError> {
        let url = self.resource_url(doctype, None)?;
        tracing::debug!(doctype, "POST");
        self.send(self.client.post(url).json(&doc)).await
    }

    async fn update(
        &self,
        doctype: &str,
        name: &str,
        fields: Value,
    ) -> Result<Value, ExternalError> {
        let url = self.resource_url(doctype, Some(name))?;
        tracing::debug!(doctype, name, "PUT");
        self.send(self.client.put(url).json(&fields)).await
    }

    async fn delete(&self, doctype: &str, name: &str) -> Result<(), ExternalError> {
        let url = self.resource_url(doctype, Some(name))?;
        tracing::debug!(doctype, name, "DELETE");
        self.send(self.client.delete(url)).await.map(|_| ())
    }

    async fn cancel(&self, doctype: &str, name: &str) -> Result<(), ExternalError> {
        let url = self.url(&["api", "method", CANCEL_METHOD])?;
        tracing::debug!(doctype, name, "cancel");
        self.send(
            self.client
                .post(url)
                .json(&json!({ "doctype": doctype, "name": name })),
        )
        .await
        .map(|_| ())
    }
}
