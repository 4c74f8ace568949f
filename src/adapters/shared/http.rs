//! JSON-over-HTTP client shared by provider adapters
//!
//! Every failure leaves here already classified: network errors and 5xx/429
//! are transient, provider error codes go through the adapter's
//! `ErrorTable`, 401/403 are fatal.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use serde_json::Value;

use crate::config::constants;
use crate::core::logging::sanitize;
use crate::swap::classify::{classify_http_status, ErrorTable};
use crate::swap::errors::{ErrorClass, ProviderError, ProviderResult};

const API_KEY_HEADER: &str = "x-api-key";

/// Longest response body excerpt kept in error messages
const BODY_EXCERPT: usize = 300;

pub struct ProviderHttp {
    provider: String,
    base_url: String,
    api_key: Option<String>,
    table: ErrorTable,
    client: reqwest::Client,
}

/// Client with the provider timeout and JSON/user-agent default headers
pub fn build_client() -> reqwest::Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, HeaderValue::from_static("chain_relay/0.1"));

    reqwest::Client::builder()
        .timeout(constants::provider_http_timeout())
        .default_headers(headers)
        .build()
}

impl ProviderHttp {
    pub fn new(provider: &str, base_url: &str, api_key: Option<String>, table: ErrorTable) -> Self {
        let client = build_client().unwrap_or_else(|e| {
            tracing::error!(
                provider = %provider,
                error = %e,
                "HTTP client build failed, using a client without timeout or default headers"
            );
            reqwest::Client::new()
        });

        if let Some(key) = &api_key {
            tracing::debug!(provider = %provider, api_key = %sanitize(key), "Provider API key configured");
        }

        Self {
            provider: provider.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            table,
            client,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn table(&self) -> &ErrorTable {
        &self.table
    }

    /// POST `body` to `path`; a 2xx body carrying an error field is a failure too
    pub async fn post_json(&self, path: &str, body: &Value) -> ProviderResult<Value> {
        let url = format!("{}{}", self.base_url, path);

        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await.map_err(|e| {
            ProviderError::transient(&self.provider, format!("POST {} failed: {}", path, e))
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            ProviderError::transient(&self.provider, format!("reading {} response: {}", path, e))
        })?;
        let parsed: Option<Value> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let detail = parsed
                .as_ref()
                .and_then(error_text)
                .unwrap_or_else(|| excerpt(&text));
            let class = self
                .table
                .classify_text(&detail)
                .or_else(|| classify_http_status(status.as_u16()))
                .unwrap_or(ErrorClass::Unclassified);
            tracing::debug!(provider = %self.provider, path, status = status.as_u16(), class = %class, "Provider call failed");
            return Err(ProviderError::new(class, &self.provider, format!("HTTP {}: {}", status.as_u16(), detail)));
        }

        let value = parsed.ok_or_else(|| {
            ProviderError::unclassified(&self.provider, format!("invalid JSON from {}: {}", path, excerpt(&text)))
        })?;

        if let Some(detail) = error_text(&value) {
            let class = self.table.classify_text(&detail).unwrap_or(ErrorClass::Unclassified);
            return Err(ProviderError::new(class, &self.provider, detail));
        }
        Ok(value)
    }
}

/// Error code / message fields a provider body may carry
pub fn error_text(body: &Value) -> Option<String> {
    let parts: Vec<&str> = ["errorCode", "error", "code", "message"]
        .iter()
        .filter_map(|field| body.get(*field).and_then(Value::as_str))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(": "))
    }
}

/// Token amounts arrive as JSON numbers or decimal strings
pub fn parse_amount(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(BODY_EXCERPT).collect()
}
