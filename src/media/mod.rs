//! Media enrichment — best-effort extraction of text from inbound media.
//!
//! Enrichment is infallible by signature: implementations catch their own
//! failures and report `handled: false`, so the orchestrator can always fall
//! back to a placeholder and keep going.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::queue::job::MessageKind;

/// Input to an enrichment call.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentRequest {
    pub media_kind: MessageKind,
    pub media_ref: String,
    pub external_message_id: String,
    pub counterparty_id: Uuid,
}

/// Output of an enrichment call.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnrichmentResult {
    pub handled: bool,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub enhanced_ref: Option<String>,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

impl EnrichmentResult {
    pub fn unhandled() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait MediaEnricher: Send + Sync {
    async fn process(&self, request: &EnrichmentRequest) -> EnrichmentResult;
}

/// Enricher used when no extraction service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEnricher;

#[async_trait]
impl MediaEnricher for NoopEnricher {
    async fn process(&self, request: &EnrichmentRequest) -> EnrichmentResult {
        debug!(
            kind = request.media_kind.as_str(),
            message_id = %request.external_message_id,
            "No media extractor configured"
        );
        EnrichmentResult::unhandled()
    }
}

/// Posts the request to an external extraction service.
pub struct HttpEnricher {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpEnricher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn try_process(&self, request: &EnrichmentRequest) -> Result<EnrichmentResult, String> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("HTTP {status}: {body}"));
        }

        resp.json::<EnrichmentResult>()
            .await
            .map_err(|e| format!("invalid response: {e}"))
    }
}

#[async_trait]
impl MediaEnricher for HttpEnricher {
    async fn process(&self, request: &EnrichmentRequest) -> EnrichmentResult {
        match self.try_process(request).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    kind = request.media_kind.as_str(),
                    message_id = %request.external_message_id,
                    "Media enrichment failed: {e}"
                );
                EnrichmentResult::unhandled()
            }
        }
    }
}
