//! libSQL backend — implements the counterparty, conversation and job stores.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! RFC 3339 with microsecond precision so text ordering matches time ordering.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::queue::job::{JobCounts, JobStatus, NewJob, QueueJob};
use crate::store::migrations;
use crate::store::traits::{
    ConversationMessage, ConversationRecord, ConversationRegistry, ConversationStatus,
    Counterparty, CounterpartyStore, JobStore, MessageDirection,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Run all pending schema migrations.
    pub async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str, column: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn col_str(row: &libsql::Row, idx: i32, name: &str) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Query(format!("column {name}: {e}")))
}

fn col_i64(row: &libsql::Row, idx: i32, name: &str) -> Result<i64, DatabaseError> {
    row.get::<i64>(idx)
        .map_err(|e| DatabaseError::Query(format!("column {name}: {e}")))
}

fn row_to_counterparty(row: &libsql::Row) -> Result<Counterparty, DatabaseError> {
    let id: String = col_str(row, 0, "id")?;
    let created: String = col_str(row, 3, "created_at")?;
    Ok(Counterparty {
        id: parse_uuid(&id, "counterparties.id")?,
        channel_address: col_str(row, 1, "channel_address")?,
        display_name: col_str(row, 2, "display_name")?,
        created_at: parse_datetime(&created),
    })
}

fn row_to_conversation(row: &libsql::Row) -> Result<ConversationRecord, DatabaseError> {
    let id: String = col_str(row, 0, "id")?;
    let counterparty_id: String = col_str(row, 1, "counterparty_id")?;
    let status: String = col_str(row, 3, "status")?;
    let metadata: String = row.get::<String>(5).unwrap_or_else(|_| "{}".to_string());
    let created: String = col_str(row, 6, "created_at")?;
    let updated: String = col_str(row, 7, "updated_at")?;

    Ok(ConversationRecord {
        id: parse_uuid(&id, "conversations.id")?,
        counterparty_id: parse_uuid(&counterparty_id, "conversations.counterparty_id")?,
        channel_address: col_str(row, 2, "channel_address")?,
        status: match status.as_str() {
            "archived" => ConversationStatus::Archived,
            _ => ConversationStatus::Active,
        },
        display_name: row.get::<String>(4).ok(),
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::json!({})),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Map a libsql Row to a QueueJob. Column order matches `JOB_COLUMNS`.
fn row_to_job(row: &libsql::Row) -> Result<QueueJob, DatabaseError> {
    let conversation_id: String = col_str(row, 4, "conversation_id")?;
    let counterparty_id: String = col_str(row, 5, "counterparty_id")?;
    let payload: String = col_str(row, 6, "payload")?;
    let admission: String = col_str(row, 7, "admission_metadata")?;
    let status: String = col_str(row, 8, "status")?;
    let retry_count: i64 = col_i64(row, 9, "retry_count")?;
    let max_retries: i64 = col_i64(row, 10, "max_retries")?;
    let processed_at: Option<String> = row.get::<String>(11).ok();
    let created: String = col_str(row, 14, "created_at")?;
    let updated: String = col_str(row, 15, "updated_at")?;

    Ok(QueueJob {
        id: col_i64(row, 0, "id")?,
        channel_address: col_str(row, 1, "channel_address")?,
        message_content: col_str(row, 2, "message_content")?,
        external_message_id: col_str(row, 3, "external_message_id")?,
        conversation_id: parse_uuid(&conversation_id, "queue_jobs.conversation_id")?,
        counterparty_id: parse_uuid(&counterparty_id, "queue_jobs.counterparty_id")?,
        payload: serde_json::from_str(&payload)
            .map_err(|e| DatabaseError::Serialization(format!("queue_jobs.payload: {e}")))?,
        admission: serde_json::from_str(&admission).map_err(|e| {
            DatabaseError::Serialization(format!("queue_jobs.admission_metadata: {e}"))
        })?,
        status: status.parse().map_err(DatabaseError::Serialization)?,
        retry_count: retry_count.max(0) as u32,
        max_retries: max_retries.max(0) as u32,
        processed_at: processed_at.as_deref().map(parse_datetime),
        error_message: row.get::<String>(12).ok(),
        reply_text: row.get::<String>(13).ok(),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

const COUNTERPARTY_COLUMNS: &str = "id, channel_address, display_name, created_at";

const CONVERSATION_COLUMNS: &str = "id, counterparty_id, channel_address, status, display_name, metadata, created_at, updated_at";

const JOB_COLUMNS: &str = "id, channel_address, message_content, external_message_id, conversation_id, counterparty_id, payload, admission_metadata, status, retry_count, max_retries, processed_at, error_message, reply_text, created_at, updated_at";

/// Job rows read in one query, split into decoded jobs and the ids of rows
/// that no longer decode.
struct JobScan {
    jobs: Vec<QueueJob>,
    undecodable: Vec<(i64, DatabaseError)>,
}

async fn scan_jobs(mut rows: libsql::Rows, op: &str) -> Result<JobScan, DatabaseError> {
    let mut scan = JobScan {
        jobs: Vec::new(),
        undecodable: Vec::new(),
    };
    loop {
        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => break,
            Err(e) => return Err(DatabaseError::Query(format!("{op}: {e}"))),
        };
        match row_to_job(&row) {
            Ok(job) => scan.jobs.push(job),
            Err(e) => scan.undecodable.push((col_i64(&row, 0, "id")?, e)),
        }
    }
    Ok(scan)
}

async fn first_job(mut rows: libsql::Rows, op: &str) -> Result<Option<QueueJob>, DatabaseError> {
    match rows.next().await {
        Ok(Some(row)) => row_to_job(&row).map(Some),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
    }
}

impl LibSqlBackend {
    /// Move a pending job whose row cannot be decoded to `failed`, recording
    /// the decode error.
    async fn fail_undecodable(&self, id: i64, err: &DatabaseError) -> Result<(), DatabaseError> {
        let now = fmt_ts(Utc::now());
        self.conn()
            .execute(
                "UPDATE queue_jobs SET status = 'failed', error_message = ?2,
                    processed_at = ?3, updated_at = ?3
                 WHERE id = ?1 AND status = 'pending'",
                params![id, format!("undecodable: {err}"), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("fail_undecodable: {e}")))?;
        warn!(job_id = id, error = %err, "Undecodable job marked failed");
        Ok(())
    }

    async fn touch_conversation(&self, conversation_id: Uuid, now: &str) {
        if let Err(e) = self
            .conn()
            .execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                params![conversation_id.to_string(), now],
            )
            .await
        {
            debug!(%conversation_id, "Failed to touch conversation: {e}");
        }
    }
}

// ── Counterparties ──────────────────────────────────────────────────

#[async_trait]
impl CounterpartyStore for LibSqlBackend {
    async fn find_by_address(
        &self,
        channel_address: &str,
    ) -> Result<Option<Counterparty>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {COUNTERPARTY_COLUMNS} FROM counterparties WHERE channel_address = ?1"
                ),
                params![channel_address],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_by_address: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_counterparty(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_by_address: {e}"))),
        }
    }

    async fn create_counterparty(
        &self,
        channel_address: &str,
        display_name: &str,
    ) -> Result<Counterparty, DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO counterparties (id, channel_address, display_name, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (channel_address) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    channel_address,
                    display_name,
                    fmt_ts(Utc::now()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_counterparty: {e}")))?;

        if inserted > 0 {
            info!(channel_address, display_name, "Registered new counterparty");
        }

        self.find_by_address(channel_address)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "counterparty".into(),
                id: channel_address.to_string(),
            })
    }
}

// ── Conversations ───────────────────────────────────────────────────

#[async_trait]
impl ConversationRegistry for LibSqlBackend {
    async fn find_or_create(
        &self,
        counterparty_id: Uuid,
        channel_address: &str,
        display_name: Option<&str>,
    ) -> Result<ConversationRecord, DatabaseError> {
        let conn = self.conn();
        let now = fmt_ts(Utc::now());
        let inserted = conn
            .execute(
                "INSERT INTO conversations (id, counterparty_id, channel_address, status,
                    display_name, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, '{}', ?6, ?6)
                 ON CONFLICT (counterparty_id, channel_address) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    counterparty_id.to_string(),
                    channel_address,
                    ConversationStatus::Active.as_str(),
                    opt_text(display_name),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_or_create: {e}")))?;

        if inserted > 0 {
            debug!(%counterparty_id, channel_address, "Conversation created");
        }

        let mut rows = conn
            .query(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations
                     WHERE counterparty_id = ?1 AND channel_address = ?2"
                ),
                params![counterparty_id.to_string(), channel_address],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_or_create select: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_conversation(&row),
            Ok(None) => Err(DatabaseError::NotFound {
                entity: "conversation".into(),
                id: format!("{counterparty_id}/{channel_address}"),
            }),
            Err(e) => Err(DatabaseError::Query(format!("find_or_create select: {e}"))),
        }
    }

    async fn get_conversation(
        &self,
        id: Uuid,
    ) -> Result<Option<ConversationRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_conversation: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_conversation(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_conversation: {e}"))),
        }
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        direction: MessageDirection,
        content: &str,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = fmt_ts(Utc::now());
        conn.execute(
            "INSERT INTO conversation_messages (id, conversation_id, direction, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                conversation_id.to_string(),
                direction.as_str(),
                content,
                now.clone(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("append_message: {e}")))?;

        self.touch_conversation(conversation_id, &now).await;
        Ok(())
    }

    async fn record_incoming(
        &self,
        conversation_id: Uuid,
        external_message_id: &str,
        content: &str,
    ) -> Result<bool, DatabaseError> {
        let now = fmt_ts(Utc::now());
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO conversation_messages
                    (id, conversation_id, direction, content, created_at, external_message_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (external_message_id) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    conversation_id.to_string(),
                    MessageDirection::Incoming.as_str(),
                    content,
                    now.clone(),
                    external_message_id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_incoming: {e}")))?;

        if inserted == 0 {
            debug!(external_message_id, "Inbound message already recorded");
            return Ok(false);
        }
        self.touch_conversation(conversation_id, &now).await;
        Ok(true)
    }

    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, direction, content, created_at FROM conversation_messages
                 WHERE conversation_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                params![conversation_id.to_string(), limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id_str: String = row.get(0).unwrap_or_default();
            let direction: String = row.get(1).unwrap_or_default();
            let content: String = row.get(2).unwrap_or_default();
            let created_str: String = row.get(3).unwrap_or_default();
            messages.push(ConversationMessage {
                id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
                conversation_id,
                direction: if direction == "outgoing" {
                    MessageDirection::Outgoing
                } else {
                    MessageDirection::Incoming
                },
                content,
                created_at: parse_datetime(&created_str),
            });
        }
        messages.reverse();
        Ok(messages)
    }
}

// ── Queue jobs ──────────────────────────────────────────────────────

#[async_trait]
impl JobStore for LibSqlBackend {
    async fn enqueue(&self, job: &NewJob) -> Result<QueueJob, DatabaseError> {
        let payload = serde_json::to_string(&job.payload)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let admission = serde_json::to_string(&job.admission)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let now = fmt_ts(Utc::now());

        let mut rows = self
            .conn()
            .query(
                "INSERT INTO queue_jobs (channel_address, message_content, external_message_id,
                    conversation_id, counterparty_id, payload, admission_metadata, status,
                    retry_count, max_retries, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', 0, ?8, ?9, ?9)
                 ON CONFLICT (external_message_id) DO NOTHING
                 RETURNING id",
                params![
                    job.channel_address.as_str(),
                    job.message_content.as_str(),
                    job.external_message_id.as_str(),
                    job.conversation_id.to_string(),
                    job.counterparty_id.to_string(),
                    payload,
                    admission,
                    job.max_retries as i64,
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("enqueue: {e}")))?;

        let inserted = match rows.next().await {
            Ok(Some(row)) => Some(col_i64(&row, 0, "id")?),
            Ok(None) => None,
            Err(e) => return Err(DatabaseError::Query(format!("enqueue: {e}"))),
        };
        drop(rows);

        let Some(id) = inserted else {
            debug!(
                external_message_id = %job.external_message_id,
                "Job already queued for this message"
            );
            return self
                .find_job_by_external_id(&job.external_message_id)
                .await?
                .ok_or_else(|| DatabaseError::NotFound {
                    entity: "queue_job".into(),
                    id: job.external_message_id.clone(),
                });
        };

        debug!(job_id = id, conversation_id = %job.conversation_id, "Job enqueued");

        self.get_job(id).await?.ok_or_else(|| DatabaseError::NotFound {
            entity: "queue_job".into(),
            id: id.to_string(),
        })
    }

    async fn get_job(&self, id: i64) -> Result<Option<QueueJob>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM queue_jobs WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_job: {e}")))?;
        first_job(rows, "get_job").await
    }

    async fn find_job_by_external_id(
        &self,
        external_message_id: &str,
    ) -> Result<Option<QueueJob>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM queue_jobs WHERE external_message_id = ?1"),
                params![external_message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_job_by_external_id: {e}")))?;
        first_job(rows, "find_job_by_external_id").await
    }

    async fn oldest_pending_job(&self) -> Result<Option<QueueJob>, DatabaseError> {
        Ok(self.pending_jobs(1).await?.into_iter().next())
    }

    async fn pending_jobs(&self, limit: usize) -> Result<Vec<QueueJob>, DatabaseError> {
        // Each pass fails at least one undecodable pending row, so this ends.
        loop {
            let rows = self
                .conn()
                .query(
                    &format!(
                        "SELECT {JOB_COLUMNS} FROM queue_jobs WHERE status = 'pending'
                         ORDER BY created_at ASC, id ASC LIMIT ?1"
                    ),
                    params![limit as i64],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("pending_jobs: {e}")))?;
            let scan = scan_jobs(rows, "pending_jobs").await?;
            if scan.undecodable.is_empty() {
                return Ok(scan.jobs);
            }
            for (id, err) in &scan.undecodable {
                self.fail_undecodable(*id, err).await?;
            }
        }
    }

    async fn claim_job(&self, id: i64) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE queue_jobs SET status = 'processing', updated_at = ?2
                 WHERE id = ?1 AND status = 'pending'",
                params![id, fmt_ts(Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_job: {e}")))?;
        Ok(affected == 1)
    }

    async fn complete_job(
        &self,
        id: i64,
        reply_text: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE queue_jobs SET status = 'completed', reply_text = ?2,
                    processed_at = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = 'processing'",
                params![id, reply_text, fmt_ts(processed_at), fmt_ts(Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_job: {e}")))?;
        Ok(affected == 1)
    }

    async fn requeue_job(
        &self,
        id: i64,
        retry_count: u32,
        error_message: &str,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE queue_jobs SET status = 'pending', retry_count = ?2,
                    error_message = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = 'processing'",
                params![id, retry_count as i64, error_message, fmt_ts(Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("requeue_job: {e}")))?;
        Ok(affected == 1)
    }

    async fn fail_job(
        &self,
        id: i64,
        retry_count: u32,
        error_message: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE queue_jobs SET status = 'failed', retry_count = ?2,
                    error_message = ?3, processed_at = ?4, updated_at = ?5
                 WHERE id = ?1 AND status = 'processing'",
                params![
                    id,
                    retry_count as i64,
                    error_message,
                    fmt_ts(processed_at),
                    fmt_ts(Utc::now()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("fail_job: {e}")))?;
        Ok(affected == 1)
    }

    async fn reset_processing_jobs(&self) -> Result<usize, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE queue_jobs SET status = 'pending', updated_at = ?1
                 WHERE status = 'processing'",
                params![fmt_ts(Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("reset_processing_jobs: {e}")))?;
        Ok(affected as usize)
    }

    async fn job_counts(&self) -> Result<JobCounts, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT status, COUNT(*) FROM queue_jobs GROUP BY status",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("job_counts: {e}")))?;

        let mut counts = JobCounts::default();
        while let Ok(Some(row)) = rows.next().await {
            let status: String = row.get(0).unwrap_or_default();
            let count: i64 = row.get(1).unwrap_or(0);
            let count = count.max(0) as u64;
            match status.parse::<JobStatus>() {
                Ok(JobStatus::Pending) => counts.pending = count,
                Ok(JobStatus::Processing) => counts.processing = count,
                Ok(JobStatus::Completed) => counts.completed = count,
                Ok(JobStatus::Failed) => counts.failed = count,
                Err(e) => warn!("job_counts: {e}"),
            }
        }
        Ok(counts)
    }
}
