//! Remote HTTP ledger sink.
//!
//! POSTs decision records as JSON to `<base_url>/v1/ctrldot/decisions`.
//! Best-effort unless marked required: transport errors get exactly one
//! retry with a fresh body, then are logged; non-2xx statuses are logged.
//! Events are not transported.

use std::time::Duration;

use tracing::warn;

use super::{BoxFuture, DecisionRecord, LedgerSink, SinkError};
use crate::config::KernelHttpConfig;
use crate::domain::Event;

/// Default per-request timeout when the config does not set one.
const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Sink that POSTs decision records to the kernel ledger HTTP endpoint.
pub struct KernelHttpSink {
    base_url: String,
    api_key: String,
    required: bool,
    client: reqwest::Client,
}

impl KernelHttpSink {
    /// Builds the sink from config. The timeout falls back to two seconds.
    #[must_use]
    pub fn new(config: &KernelHttpConfig) -> Self {
        let timeout_ms = if config.timeout_ms > 0 {
            config.timeout_ms
        } else {
            DEFAULT_TIMEOUT_MS
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            required: config.required,
            client,
        }
    }

    fn decisions_url(&self) -> String {
        format!("{}/v1/ctrldot/decisions", self.base_url)
    }

    async fn post_once(&self, url: &str, body: Vec<u8>) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        request.send().await
    }

    async fn emit(&self, record: &DecisionRecord) -> Result<(), SinkError> {
        let body = serde_json::to_vec(record)?;
        let url = self.decisions_url();

        let response = match self.post_once(&url, body.clone()).await {
            Ok(response) => response,
            // One retry with a fresh body.
            Err(_) => self
                .post_once(&url, body)
                .await
                .map_err(|e| SinkError::Transport {
                    url: url.clone(),
                    details: e.to_string(),
                })?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

impl LedgerSink for KernelHttpSink {
    fn emit_decision<'a>(
        &'a self,
        record: &'a DecisionRecord,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            match self.emit(record).await {
                Ok(()) => Ok(()),
                Err(err) if self.required => Err(err),
                Err(err) => {
                    warn!(error = %err, "kernel_http sink emit failed (best-effort)");
                    Ok(())
                },
            }
        })
    }

    fn emit_event<'a>(&'a self, _event: &'a Event) -> BoxFuture<'a, Result<(), SinkError>> {
        // Decisions only; the kernel ingests events elsewhere.
        Box::pin(async { Ok(()) })
    }

    fn close<'a>(&'a self) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async { Ok(()) })
    }

    fn required(&self) -> bool {
        self.required
    }
}
