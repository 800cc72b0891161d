//! Orchestrator — admits an inbound event and queues it for a reply.
//!
//! Never generates or waits for a reply; the queue worker does that later.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::PipelineError;
use crate::media::{EnrichmentRequest, MediaEnricher};
use crate::pipeline::classifier::{AdmissionClassifier, extract_display_name};
use crate::pipeline::types::{InboundEvent, ProcessOutcome};
use crate::queue::job::{AdmissionMetadata, EnrichmentSummary, JobPayload, NewJob};
use crate::store::traits::{ConversationRegistry, CounterpartyStore, JobStore};

pub struct Orchestrator {
    classifier: AdmissionClassifier,
    counterparties: Arc<dyn CounterpartyStore>,
    conversations: Arc<dyn ConversationRegistry>,
    jobs: Arc<dyn JobStore>,
    enricher: Arc<dyn MediaEnricher>,
    media_fallback: String,
    max_retries: u32,
}

impl Orchestrator {
    pub fn new(
        classifier: AdmissionClassifier,
        counterparties: Arc<dyn CounterpartyStore>,
        conversations: Arc<dyn ConversationRegistry>,
        jobs: Arc<dyn JobStore>,
        enricher: Arc<dyn MediaEnricher>,
        media_fallback: String,
        max_retries: u32,
    ) -> Self {
        Self {
            classifier,
            counterparties,
            conversations,
            jobs,
            enricher,
            media_fallback,
            max_retries,
        }
    }

    /// Classify the event and, if admitted, enqueue a reply job.
    ///
    /// Rejected events persist nothing. A redelivered event that already has
    /// a job is acknowledged without queueing again. Errors are storage
    /// failures only.
    pub async fn process_message(
        &self,
        event: InboundEvent,
    ) -> Result<ProcessOutcome, PipelineError> {
        if let Some(existing) = self
            .jobs
            .find_job_by_external_id(&event.external_message_id)
            .await
            .map_err(PipelineError::DuplicateCheck)?
        {
            debug!(
                job_id = existing.id,
                message_id = %event.external_message_id,
                "Duplicate delivery, already queued"
            );
            return Ok(ProcessOutcome::queued());
        }

        let verdict = self
            .classifier
            .classify(&event.channel_address, &event.text, event.profile.as_ref())
            .await;

        if !verdict.accepted {
            debug!(
                confidence = verdict.confidence,
                needs_clarification = verdict.needs_clarification,
                "Message rejected"
            );
            return Ok(ProcessOutcome::rejected());
        }

        let (counterparty_id, display_name) = match &verdict.matched {
            Some(agency) => (agency.counterparty_id, agency.display_name.clone()),
            None => {
                let name = extract_display_name(
                    &event.text,
                    event.profile.as_ref(),
                    &event.channel_address,
                );
                let created = self
                    .counterparties
                    .create_counterparty(&event.channel_address, &name)
                    .await
                    .map_err(PipelineError::Registration)?;
                (created.id, created.display_name)
            }
        };

        let conversation = self
            .conversations
            .find_or_create(counterparty_id, &event.channel_address, Some(&display_name))
            .await
            .map_err(PipelineError::Conversation)?;

        let (message_content, payload) = self.enrich(&event, counterparty_id).await;

        self.conversations
            .record_incoming(conversation.id, &event.external_message_id, &message_content)
            .await
            .map_err(PipelineError::Conversation)?;

        let job = self
            .jobs
            .enqueue(&NewJob {
                channel_address: event.channel_address.clone(),
                message_content,
                external_message_id: event.external_message_id.clone(),
                conversation_id: conversation.id,
                counterparty_id,
                payload,
                admission: AdmissionMetadata {
                    confidence: verdict.confidence,
                    reasoning: verdict.reasoning,
                    matched_display_name: verdict.matched.map(|m| m.display_name),
                },
                max_retries: self.max_retries,
            })
            .await
            .map_err(PipelineError::Enqueue)?;

        info!(
            job_id = job.id,
            conversation_id = %conversation.id,
            confidence = job.admission.confidence,
            "Message queued"
        );
        Ok(ProcessOutcome::queued())
    }

    /// Run media enrichment, if the event has media. Never fails.
    async fn enrich(
        &self,
        event: &InboundEvent,
        counterparty_id: uuid::Uuid,
    ) -> (String, JobPayload) {
        let caption = event.text.trim();
        let mut payload = JobPayload {
            message_kind: event.message_kind,
            media_ref: event.media_ref.clone(),
            enrichment: None,
        };

        let Some(media_ref) = &event.media_ref else {
            return (event.text.clone(), payload);
        };

        let result = self
            .enricher
            .process(&EnrichmentRequest {
                media_kind: event.message_kind,
                media_ref: media_ref.clone(),
                external_message_id: event.external_message_id.clone(),
                counterparty_id,
            })
            .await;

        let extracted = result
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty() && result.handled);

        let content = match extracted {
            Some(text) => join_nonempty(caption, text),
            None => join_nonempty(caption, &self.media_fallback),
        };

        if result.handled {
            if let Some(enhanced) = result.enhanced_ref {
                payload.media_ref = Some(enhanced);
            }
        } else {
            debug!(
                message_id = %event.external_message_id,
                "Media not enriched, using fallback text"
            );
        }

        payload.enrichment = Some(EnrichmentSummary {
            failed: extracted.is_none(),
            extracted_text: extracted.map(str::to_string),
            meta: result.meta,
        });

        (content, payload)
    }
}

fn join_nonempty(first: &str, second: &str) -> String {
    match (first.is_empty(), second.is_empty()) {
        (true, _) => second.to_string(),
        (_, true) => first.to_string(),
        _ => format!("{first}\n\n{second}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::config::{AdmissionConfig, DEFAULT_MEDIA_FALLBACK};
    use crate::media::EnrichmentResult;
    use crate::queue::job::{JobCounts, JobStatus, MessageKind};
    use crate::store::LibSqlBackend;
    use crate::store::testing::FaultyJobStore;
    use crate::store::traits::MessageDirection;

    /// Returns a fixed result and counts calls.
    struct FixedEnricher {
        result: EnrichmentResult,
        calls: AtomicUsize,
    }

    impl FixedEnricher {
        fn new(result: EnrichmentResult) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MediaEnricher for FixedEnricher {
        async fn process(&self, _request: &EnrichmentRequest) -> EnrichmentResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    async fn setup(
        enricher: Arc<FixedEnricher>,
        allowlist: &[&str],
    ) -> (Orchestrator, Arc<LibSqlBackend>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let config = AdmissionConfig {
            allowlist: allowlist.iter().map(|s| s.to_string()).collect(),
        };
        let orchestrator = Orchestrator::new(
            AdmissionClassifier::new(db.clone(), &config),
            db.clone(),
            db.clone(),
            db.clone(),
            enricher,
            DEFAULT_MEDIA_FALLBACK.to_string(),
            3,
        );
        (orchestrator, db)
    }

    fn text_event(address: &str, text: &str) -> InboundEvent {
        InboundEvent {
            external_message_id: format!("wamid.{}", uuid::Uuid::new_v4()),
            channel_address: address.into(),
            text: text.into(),
            message_kind: MessageKind::Text,
            media_ref: None,
            profile: None,
        }
    }

    fn media_event(address: &str, caption: &str) -> InboundEvent {
        InboundEvent {
            message_kind: MessageKind::Image,
            media_ref: Some("media/123".into()),
            ..text_event(address, caption)
        }
    }

    fn unhandled() -> Arc<FixedEnricher> {
        Arc::new(FixedEnricher::new(EnrichmentResult::unhandled()))
    }

    #[tokio::test]
    async fn accepted_message_creates_one_pending_job() {
        let (orchestrator, db) = setup(unhandled(), &[]).await;

        let outcome = orchestrator
            .process_message(text_event(
                "5511999990000",
                "Sou corretor, tenho apartamento disponível",
            ))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::queued());

        let pending = db.pending_jobs(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        let job = &pending[0];
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 3);
        assert!(job.admission.confidence >= 0.7);
        assert!(job.payload.enrichment.is_none());

        let counterparty = db.find_by_address("5511999990000").await.unwrap().unwrap();
        assert_eq!(counterparty.id, job.counterparty_id);
        assert_eq!(counterparty.display_name, "Agency 5511999990000");

        let conversation = db.get_conversation(job.conversation_id).await.unwrap().unwrap();
        assert_eq!(conversation.counterparty_id, counterparty.id);

        let history = db.recent_messages(conversation.id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].direction, MessageDirection::Incoming);
    }

    #[tokio::test]
    async fn rejected_message_leaves_no_trace() {
        let (orchestrator, db) = setup(unhandled(), &[]).await;

        let outcome = orchestrator
            .process_message(text_event("5511999990000", "oi"))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::rejected());

        assert_eq!(db.job_counts().await.unwrap(), JobCounts::default());
        assert!(db.find_by_address("5511999990000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn known_counterparty_reuses_conversation() {
        let (orchestrator, db) = setup(unhandled(), &[]).await;

        orchestrator
            .process_message(text_event(
                "5511999990000",
                "Olá, sou a Maria Souza. Tenho casa e apartamento para venda",
            ))
            .await
            .unwrap();
        let followup = orchestrator
            .process_message(text_event("5511999990000", "ok"))
            .await
            .unwrap();
        assert_eq!(followup, ProcessOutcome::queued());

        let jobs = db.pending_jobs(10).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].conversation_id, jobs[1].conversation_id);
        assert_eq!(jobs[1].admission.reasoning, "known counterparty");
        assert_eq!(
            jobs[1].admission.matched_display_name.as_deref(),
            Some("Maria Souza")
        );
    }

    #[tokio::test]
    async fn allowlisted_sender_always_queued() {
        let (orchestrator, db) = setup(unhandled(), &["5511000000000"]).await;

        let outcome = orchestrator
            .process_message(text_event("5511000000000", "teste"))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::queued());

        let job = db.oldest_pending_job().await.unwrap().unwrap();
        assert_eq!(job.admission.confidence, 1.0);
    }

    #[tokio::test]
    async fn failed_enrichment_uses_fallback() {
        let enricher = unhandled();
        let (orchestrator, db) = setup(enricher.clone(), &["5511000000000"]).await;

        orchestrator
            .process_message(media_event("5511000000000", ""))
            .await
            .unwrap();

        assert_eq!(enricher.calls.load(Ordering::SeqCst), 1);
        let job = db.oldest_pending_job().await.unwrap().unwrap();
        assert_eq!(job.message_content, DEFAULT_MEDIA_FALLBACK);
        assert_eq!(job.payload.media_ref.as_deref(), Some("media/123"));
        assert!(job.payload.enrichment.as_ref().unwrap().failed);
    }

    #[tokio::test]
    async fn enrichment_augments_caption() {
        let enricher = Arc::new(FixedEnricher::new(EnrichmentResult {
            handled: true,
            text: Some("Apartamento 2 quartos, 65m²".into()),
            enhanced_ref: Some("media/123-hd".into()),
            meta: Some(serde_json::json!({"pages": 1})),
        }));
        let (orchestrator, db) = setup(enricher, &["5511000000000"]).await;

        orchestrator
            .process_message(media_event("5511000000000", "Olha esse"))
            .await
            .unwrap();

        let job = db.oldest_pending_job().await.unwrap().unwrap();
        assert_eq!(job.message_content, "Olha esse\n\nApartamento 2 quartos, 65m²");
        assert_eq!(job.payload.media_ref.as_deref(), Some("media/123-hd"));
        let enrichment = job.payload.enrichment.unwrap();
        assert!(!enrichment.failed);
        assert_eq!(enrichment.meta, Some(serde_json::json!({"pages": 1})));
    }

    #[tokio::test]
    async fn text_message_skips_enricher() {
        let enricher = unhandled();
        let (orchestrator, _) = setup(enricher.clone(), &["5511000000000"]).await;

        orchestrator
            .process_message(text_event("5511000000000", "teste"))
            .await
            .unwrap();
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn redelivered_event_is_queued_once() {
        let (orchestrator, db) = setup(unhandled(), &[]).await;
        let event = text_event("5511999990000", "Sou corretor, tenho apartamento disponível");

        let first = orchestrator.process_message(event.clone()).await.unwrap();
        let second = orchestrator.process_message(event).await.unwrap();
        assert_eq!(first, ProcessOutcome::queued());
        assert_eq!(second, ProcessOutcome::queued());

        let jobs = db.pending_jobs(10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        let history = db.recent_messages(jobs[0].conversation_id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn retry_after_enqueue_failure_records_message_once() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let jobs = Arc::new(FaultyJobStore::new(db.clone()));
        let orchestrator = Orchestrator::new(
            AdmissionClassifier::new(db.clone(), &AdmissionConfig::default()),
            db.clone(),
            db.clone(),
            jobs.clone(),
            unhandled(),
            DEFAULT_MEDIA_FALLBACK.to_string(),
            3,
        );
        let event = text_event("5511999990000", "Sou corretor, tenho apartamento disponível");

        jobs.fail_next("enqueue", 1);
        let err = orchestrator.process_message(event.clone()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Enqueue(_)));

        let outcome = orchestrator.process_message(event).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::queued());

        let pending = db.pending_jobs(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        let history = db
            .recent_messages(pending[0].conversation_id, 10)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].direction, MessageDirection::Incoming);
    }

    #[test]
    fn join_skips_empty_parts() {
        assert_eq!(join_nonempty("", "b"), "b");
        assert_eq!(join_nonempty("a", ""), "a");
        assert_eq!(join_nonempty("a", "b"), "a\n\nb");
    }
}
