//! Thin HTTP client for the daemon API.

use anyhow::{Context, Result, bail};
use serde_json::Value;

/// Client for one daemon instance.
pub struct DaemonClient {
    base_url: String,
    http: reqwest::Client,
}

impl DaemonClient {
    /// A client for the daemon at `base_url`.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// GET a path and decode the JSON body.
    pub async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} (is ctrldotd running?)"))?;
        Self::decode(url, response).await
    }

    /// POST a JSON body to a path and decode the JSON response.
    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url} (is ctrldotd running?)"))?;
        Self::decode(url, response).await
    }

    async fn decode(url: String, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("decode response from {url}"))?;
        if !status.is_success() {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("request failed");
            bail!("{url}: {status}: {message}");
        }
        Ok(body)
    }
}

/// Prints a JSON value with stable indentation.
pub fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(rendered) => println!("{rendered}"),
        Err(_) => println!("{value}"),
    }
}
