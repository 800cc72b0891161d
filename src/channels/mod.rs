//! Channel I/O: the inbound webhook and the outbound gateway.

pub mod gateway;
pub mod webhook;

pub use gateway::{DryRunGateway, HttpGateway, OutboundGateway};
pub use webhook::{WebhookState, webhook_routes};
