//! HTTP gateway to the Pulse clearing API
//!
//! One POST per record. Every outcome, including transport failures, comes
//! back as a [`ProcessingResult`]; nothing here returns an error to the
//! caller once the gateway has been built.

use crate::api::endpoints;
use crate::api::types::{ClearDiscardFateRequest, ClearHoldRequest, ClearResponse};
use crate::config::ApiConfig;
use crate::error::{CliError, Result};
use crate::records::{ProcessingMode, ProcessingResult, Record};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Submits one record to the remote service
#[async_trait]
pub trait ApiGateway: Send + Sync {
    /// Never fails: errors are reported as `Failed` results
    async fn submit(&self, record: &Record, clear_code: &str) -> ProcessingResult;
}

#[async_trait]
impl<G: ApiGateway + ?Sized> ApiGateway for Arc<G> {
    async fn submit(&self, record: &Record, clear_code: &str) -> ProcessingResult {
        (**self).submit(record, clear_code).await
    }
}

/// Gateway backed by `reqwest`
pub struct HttpApiGateway {
    client: Client,
    hold_url: String,
    discard_url: String,
    abort: CancellationToken,
}

impl HttpApiGateway {
    /// Build a client with the identification headers and request timeout
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in [
            ("x-userid", &config.headers.user_id),
            ("x-appname", &config.headers.app_name),
            ("x-environment", &config.headers.environment),
        ] {
            let value = HeaderValue::from_str(value).map_err(|_| {
                CliError::config(format!("header {} contains invalid characters", name))
            })?;
            headers.insert(HeaderName::from_static(name), value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            hold_url: endpoints::endpoint_url(&config.base_url, &config.hold_endpoint),
            discard_url: endpoints::endpoint_url(&config.base_url, &config.discard_endpoint),
            abort: CancellationToken::new(),
        })
    }

    /// Abort in-flight requests when `token` fires
    ///
    /// Aborted calls resolve to `Failed` with "Request cancelled". This is
    /// separate from the graceful stop, which lets in-flight calls finish.
    pub fn with_abort(mut self, token: CancellationToken) -> Self {
        self.abort = token;
        self
    }

    /// Full URL used for a mode
    pub fn url(&self, mode: ProcessingMode) -> &str {
        match mode {
            ProcessingMode::Hold => &self.hold_url,
            ProcessingMode::Discard => &self.discard_url,
        }
    }

    async fn post<T: Serialize + Sync>(&self, url: &str, body: &T) -> std::result::Result<ClearResponse, String> {
        let send = async {
            let response = self
                .client
                .post(url)
                .json(body)
                .send()
                .await
                .map_err(describe_transport_error)?;

            let status = response.status();
            let text = response.text().await.map_err(describe_transport_error)?;

            if !status.is_success() {
                return Err(format!(
                    "HTTP {} {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown Status"),
                    text
                ));
            }

            serde_json::from_str::<ClearResponse>(&text)
                .map_err(|e| format!("Deserialization error: {}", e))
        };

        tokio::select! {
            biased;
            _ = self.abort.cancelled() => Err("Request cancelled".to_string()),
            outcome = send => outcome,
        }
    }
}

#[async_trait]
impl ApiGateway for HttpApiGateway {
    async fn submit(&self, record: &Record, clear_code: &str) -> ProcessingResult {
        let key = record.key();
        let url = self.url(record.mode());
        debug!(key = %key, url = %url, "Submitting record");

        let outcome = match record {
            Record::Hold(hold) => {
                self.post(url, &ClearHoldRequest::from_record(hold, clear_code))
                    .await
            }
            Record::Discard(discard) => {
                self.post(url, &ClearDiscardFateRequest::from_record(discard, clear_code))
                    .await
            }
        };

        match outcome {
            Ok(response) if response.is_cleared() => {
                debug!(key = %key, "Record cleared");
                ProcessingResult::success(record.clone())
            }
            Ok(response) => {
                let message = response.failure_message();
                warn!(
                    key = %key,
                    status = ?response.status,
                    error_number = ?response.error_number,
                    error = %message,
                    "API declined record"
                );
                ProcessingResult::failure(record.clone(), message)
            }
            Err(message) => {
                warn!(key = %key, error = %message, "Request failed");
                ProcessingResult::failure(record.clone(), message)
            }
        }
    }
}

fn describe_transport_error(err: reqwest::Error) -> String {
    if err.is_timeout() {
        "Request timeout".to_string()
    } else if err.is_decode() {
        format!("Deserialization error: {}", err)
    } else {
        format!("Transport error: {}", err)
    }
}
