//! Storage traits the pipeline depends on.
//!
//! `LibSqlBackend` implements all three; tests and alternative deployments can
//! swap any of them independently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::queue::job::{JobCounts, NewJob, QueueJob};

/// A registered agency / broker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Counterparty {
    pub id: Uuid,
    pub channel_address: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of a conversation. The core only ever creates `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Archived,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }
}

/// A conversation with one counterparty on one channel address.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationRecord {
    pub id: Uuid,
    pub counterparty_id: Uuid,
    pub channel_address: String,
    pub status: ConversationStatus,
    pub display_name: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Direction of a stored conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Incoming,
    Outgoing,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

/// A message stored in a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub direction: MessageDirection,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Registered counterparties keyed by channel address.
#[async_trait]
pub trait CounterpartyStore: Send + Sync {
    async fn find_by_address(
        &self,
        channel_address: &str,
    ) -> Result<Option<Counterparty>, DatabaseError>;

    /// Register a counterparty. Idempotent on `channel_address`: an existing
    /// row is returned unchanged.
    async fn create_counterparty(
        &self,
        channel_address: &str,
        display_name: &str,
    ) -> Result<Counterparty, DatabaseError>;
}

/// Conversation lookup plus the message log the reply generator reads.
#[async_trait]
pub trait ConversationRegistry: Send + Sync {
    /// Return the conversation for `(counterparty_id, channel_address)`,
    /// creating an `active` one on first use. Safe to call on every message.
    async fn find_or_create(
        &self,
        counterparty_id: Uuid,
        channel_address: &str,
        display_name: Option<&str>,
    ) -> Result<ConversationRecord, DatabaseError>;

    async fn get_conversation(&self, id: Uuid)
    -> Result<Option<ConversationRecord>, DatabaseError>;

    async fn append_message(
        &self,
        conversation_id: Uuid,
        direction: MessageDirection,
        content: &str,
    ) -> Result<(), DatabaseError>;

    /// Record an inbound message once per `external_message_id`. Returns
    /// `false` if it was already recorded.
    async fn record_incoming(
        &self,
        conversation_id: Uuid,
        external_message_id: &str,
        content: &str,
    ) -> Result<bool, DatabaseError>;

    /// Most recent `limit` messages, oldest first.
    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, DatabaseError>;
}

/// The durable reply queue.
///
/// `enqueue` is the only operation for producers; the state-changing methods
/// are reserved for the queue worker and only act on jobs in the expected
/// source state, so terminal jobs can never be modified.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Append a new `pending` job with `retry_count = 0`.
    ///
    /// Idempotent on `external_message_id`: a redelivered message returns the
    /// job already queued for it.
    async fn enqueue(&self, job: &NewJob) -> Result<QueueJob, DatabaseError>;

    async fn get_job(&self, id: i64) -> Result<Option<QueueJob>, DatabaseError>;

    async fn find_job_by_external_id(
        &self,
        external_message_id: &str,
    ) -> Result<Option<QueueJob>, DatabaseError>;

    /// Oldest pending job by `created_at`, ties broken by id.
    ///
    /// Rows that can no longer be decoded are marked `failed` and skipped, so
    /// they never block the jobs behind them.
    async fn oldest_pending_job(&self) -> Result<Option<QueueJob>, DatabaseError>;

    /// Up to `limit` pending jobs in FIFO order.
    async fn pending_jobs(&self, limit: usize) -> Result<Vec<QueueJob>, DatabaseError>;

    /// Atomically move `pending → processing`. Returns `false` if the job was
    /// not pending (someone else claimed it, or it is terminal).
    async fn claim_job(&self, id: i64) -> Result<bool, DatabaseError>;

    /// `processing → completed`.
    async fn complete_job(
        &self,
        id: i64,
        reply_text: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// `processing → pending`, keeping `created_at` so FIFO priority survives.
    async fn requeue_job(
        &self,
        id: i64,
        retry_count: u32,
        error_message: &str,
    ) -> Result<bool, DatabaseError>;

    /// `processing → failed`. Terminal.
    async fn fail_job(
        &self,
        id: i64,
        retry_count: u32,
        error_message: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Return jobs orphaned in `processing` by a previous process to `pending`.
    async fn reset_processing_jobs(&self) -> Result<usize, DatabaseError>;

    async fn job_counts(&self) -> Result<JobCounts, DatabaseError>;
}
