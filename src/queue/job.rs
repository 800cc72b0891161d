//! Queue job record and state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Status of a queued reply job.
///
/// `Pending → Processing → Completed | Pending (retry) | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Pending)
                | (Processing, Failed)
        )
    }

    /// Terminal jobs are never mutated again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Kind of inbound message the job answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Document,
    Audio,
    Video,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Document => "document",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// Outcome of media enrichment, stored for audit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentSummary {
    /// Enrichment was attempted and did not produce content.
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Opaque payload carried to the reply generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub message_kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentSummary>,
}

/// Admission decision kept with the job for audit. Never re-evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionMetadata {
    pub confidence: f32,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_display_name: Option<String>,
}

/// Fields the orchestrator supplies when enqueueing.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub channel_address: String,
    pub message_content: String,
    pub external_message_id: String,
    pub conversation_id: Uuid,
    pub counterparty_id: Uuid,
    pub payload: JobPayload,
    pub admission: AdmissionMetadata,
    pub max_retries: u32,
}

/// A persisted reply job.
#[derive(Debug, Clone, Serialize)]
pub struct QueueJob {
    pub id: i64,
    pub channel_address: String,
    pub message_content: String,
    pub external_message_id: String,
    pub conversation_id: Uuid,
    pub counterparty_id: Uuid,
    pub payload: JobPayload,
    pub admission: AdmissionMetadata,
    pub status: JobStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub reply_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What to do with a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to `pending` with the new retry count.
    Retry { retry_count: u32 },
    /// Budget exhausted; the job becomes `failed`. The count is left as is,
    /// so `retry_count <= max_retries` holds for every stored job.
    GiveUp { retry_count: u32 },
}

impl QueueJob {
    /// Move the in-memory copy to `target`, refusing illegal transitions.
    pub fn transition_to(&mut self, target: JobStatus) -> Result<(), QueueError> {
        if !self.status.can_transition_to(target) {
            return Err(QueueError::InvalidTransition {
                id: self.id,
                status: self.status.to_string(),
                target: target.to_string(),
            });
        }
        self.status = target;
        Ok(())
    }

    /// Decide the next state after one more failed attempt.
    pub fn after_failure(&self) -> RetryDecision {
        if self.retry_count < self.max_retries {
            RetryDecision::Retry {
                retry_count: self.retry_count + 1,
            }
        } else {
            RetryDecision::GiveUp {
                retry_count: self.retry_count,
            }
        }
    }
}

/// Number of jobs in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_retries(retry_count: u32, max_retries: u32) -> QueueJob {
        QueueJob {
            id: 1,
            channel_address: "5511999990000".into(),
            message_content: "oi".into(),
            external_message_id: "wamid.1".into(),
            conversation_id: Uuid::new_v4(),
            counterparty_id: Uuid::new_v4(),
            payload: JobPayload::default(),
            admission: AdmissionMetadata {
                confidence: 1.0,
                reasoning: "known counterparty".into(),
                matched_display_name: None,
            },
            status: JobStatus::Processing,
            retry_count,
            max_retries,
            processed_at: None,
            error_message: None,
            reply_text: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Pending));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("stuck".parse::<JobStatus>().is_err());
    }

    #[test]
    fn retry_budget() {
        assert_eq!(
            job_with_retries(0, 3).after_failure(),
            RetryDecision::Retry { retry_count: 1 }
        );
        assert_eq!(
            job_with_retries(2, 3).after_failure(),
            RetryDecision::Retry { retry_count: 3 }
        );
        assert_eq!(
            job_with_retries(3, 3).after_failure(),
            RetryDecision::GiveUp { retry_count: 3 }
        );
    }

    #[test]
    fn in_memory_transition_guard() {
        let mut job = job_with_retries(0, 3);
        job.transition_to(JobStatus::Completed).unwrap();
        assert!(matches!(
            job.transition_to(JobStatus::Pending),
            Err(QueueError::InvalidTransition { .. })
        ));
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn zero_retries_fails_on_first_error() {
        assert_eq!(
            job_with_retries(0, 0).after_failure(),
            RetryDecision::GiveUp { retry_count: 0 }
        );
    }

    #[test]
    fn payload_serialization_omits_empty_fields() {
        let payload = JobPayload::default();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["message_kind"], "text");
        assert!(json.get("media_ref").is_none());
        assert!(json.get("enrichment").is_none());
    }
}
