//! Outbound gateway — delivers reply text to a counterparty's channel address.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::info;

use crate::config::GatewayConfig;
use crate::error::DeliveryError;
use crate::queue::job::MessageKind;

#[async_trait]
pub trait OutboundGateway: Send + Sync {
    async fn send(
        &self,
        address: &str,
        kind: MessageKind,
        content: &str,
    ) -> Result<(), DeliveryError>;
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    kind: MessageKind,
    content: &'a str,
}

/// POSTs `{to, kind, content}` to a messaging provider's send endpoint.
pub struct HttpGateway {
    send_url: String,
    token: Option<SecretString>,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            send_url: config.send_url,
            token: config.token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl OutboundGateway for HttpGateway {
    async fn send(
        &self,
        address: &str,
        kind: MessageKind,
        content: &str,
    ) -> Result<(), DeliveryError> {
        let mut req = self.client.post(&self.send_url).json(&SendRequest {
            to: address,
            kind,
            content,
        });
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.expose_secret());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DeliveryError::transient(format!("send request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DeliveryError::from_status(status, &body));
        }
        Ok(())
    }
}

/// Logs instead of sending. Used when no gateway URL is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunGateway;

#[async_trait]
impl OutboundGateway for DryRunGateway {
    async fn send(
        &self,
        address: &str,
        kind: MessageKind,
        content: &str,
    ) -> Result<(), DeliveryError> {
        info!(
            address,
            kind = kind.as_str(),
            chars = content.chars().count(),
            "Dry-run send"
        );
        Ok(())
    }
}
