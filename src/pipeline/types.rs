//! Shared types for the inbound admission pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::queue::job::MessageKind;

// ── Inbound event ───────────────────────────────────────────────────

/// One inbound chat message, as delivered by the messaging provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Provider message id, kept on the job for audit.
    pub external_message_id: String,
    /// Sender address (phone number / chat id).
    pub channel_address: String,
    /// Message text, or the caption for media.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub message_kind: MessageKind,
    /// Provider reference to attached media, if any.
    #[serde(default)]
    pub media_ref: Option<String>,
    /// Business profile published by the sender, when the channel has one.
    #[serde(default)]
    pub profile: Option<ProfileMetadata>,
}

/// Channel-provided business profile of the sender.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileMetadata {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

// ── Admission ───────────────────────────────────────────────────────

/// An already registered counterparty the message was matched to.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedAgency {
    pub counterparty_id: Uuid,
    pub display_name: String,
    pub channel_address: String,
}

/// Admission decision.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    pub accepted: bool,
    /// In `[0, 1]`.
    pub confidence: f32,
    pub reasoning: String,
    /// Rejected, but close enough that asking the sender would make sense.
    pub needs_clarification: bool,
    pub matched: Option<MatchedAgency>,
}

impl VerificationResult {
    pub fn accept(confidence: f32, reasoning: impl Into<String>) -> Self {
        Self {
            accepted: true,
            confidence,
            reasoning: reasoning.into(),
            needs_clarification: false,
            matched: None,
        }
    }

    pub fn reject(confidence: f32, reasoning: impl Into<String>) -> Self {
        Self {
            accepted: false,
            confidence,
            reasoning: reasoning.into(),
            needs_clarification: false,
            matched: None,
        }
    }
}

// ── Outcome ─────────────────────────────────────────────────────────

/// The only synchronous result of processing an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessOutcome {
    pub accepted: bool,
    pub queued: bool,
}

impl ProcessOutcome {
    pub fn rejected() -> Self {
        Self {
            accepted: false,
            queued: false,
        }
    }

    pub fn queued() -> Self {
        Self {
            accepted: true,
            queued: true,
        }
    }
}
