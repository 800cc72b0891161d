//! Queue worker — delivers one reply per eligible tick.
//!
//! Each tick:
//! 1. Returns `Busy` if another tick is still running (single-flight)
//! 2. Returns `RateLimited` while the cooldown after the last success runs
//! 3. Claims the oldest pending job (FIFO, retries keep their position)
//! 4. Generates the reply, records it, sends it, marks the job completed
//! 5. On failure, requeues the job or marks it failed once the budget is spent
//!
//! If the status write in step 4 or 5 fails, the job stays `processing` and
//! the write is retried at the start of every later tick until it lands. No
//! other job is claimed in the meantime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channels::gateway::OutboundGateway;
use crate::clock::Clock;
use crate::config::{QueueConfig, RateLimitScope};
use crate::error::{DeliveryError, QueueError};
use crate::queue::job::{JobStatus, MessageKind, QueueJob, RetryDecision};
use crate::reply::ReplyGenerator;
use crate::store::traits::{ConversationRegistry, JobStore, MessageDirection};

/// How many pending jobs are scanned for one whose counterparty is not
/// cooling down.
const PER_COUNTERPARTY_SCAN: usize = 50;

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick is still in progress.
    Busy,
    /// Inside the cooldown window; nothing touched.
    RateLimited,
    /// No pending job (or the claim was lost to another worker).
    Idle,
    Completed { job_id: i64 },
    Retried { job_id: i64, retry_count: u32 },
    Failed { job_id: i64 },
}

/// Time of the last successful delivery, per cooldown scope.
#[derive(Debug, Default)]
struct Cooldowns {
    global: Option<DateTime<Utc>>,
    per_counterparty: HashMap<Uuid, DateTime<Utc>>,
}

/// A status write for a claimed job, kept until the store accepts it.
#[derive(Debug, Clone)]
enum Settlement {
    Complete {
        reply: String,
        processed_at: DateTime<Utc>,
    },
    Requeue {
        retry_count: u32,
        error_message: String,
    },
    Fail {
        retry_count: u32,
        error_message: String,
        processed_at: DateTime<Utc>,
    },
}

impl Settlement {
    fn target(&self) -> JobStatus {
        match self {
            Self::Complete { .. } => JobStatus::Completed,
            Self::Requeue { .. } => JobStatus::Pending,
            Self::Fail { .. } => JobStatus::Failed,
        }
    }
}

/// Clears the single-flight flag when dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct QueueWorker {
    jobs: Arc<dyn JobStore>,
    conversations: Arc<dyn ConversationRegistry>,
    generator: Arc<dyn ReplyGenerator>,
    gateway: Arc<dyn OutboundGateway>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
    in_flight: AtomicBool,
    cooldowns: Mutex<Cooldowns>,
    unsettled: Mutex<Option<(i64, Settlement)>>,
}

impl QueueWorker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        conversations: Arc<dyn ConversationRegistry>,
        generator: Arc<dyn ReplyGenerator>,
        gateway: Arc<dyn OutboundGateway>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Self {
        Self {
            jobs,
            conversations,
            generator,
            gateway,
            clock,
            config,
            in_flight: AtomicBool::new(false),
            cooldowns: Mutex::new(Cooldowns::default()),
            unsettled: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Return jobs left in `processing` by a previous run to `pending`.
    ///
    /// Call once at startup, before the first tick.
    pub async fn recover_stale_jobs(&self) -> Result<usize, QueueError> {
        let reset = self.jobs.reset_processing_jobs().await?;
        if reset > 0 {
            warn!(count = reset, "Recovered jobs orphaned in processing");
        }
        Ok(reset)
    }

    fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(&self.in_flight))
    }

    /// Run one processing cycle.
    pub async fn tick(&self) -> Result<TickOutcome, QueueError> {
        let Some(_guard) = self.try_begin() else {
            debug!("Tick skipped, previous tick still running");
            return Ok(TickOutcome::Busy);
        };

        self.settle_unsettled().await?;

        let job = match self.select_job().await? {
            Selection::Job(job) => job,
            Selection::RateLimited => return Ok(TickOutcome::RateLimited),
            Selection::Empty => return Ok(TickOutcome::Idle),
        };

        if !self.jobs.claim_job(job.id).await? {
            debug!(job_id = job.id, "Claim lost, job no longer pending");
            return Ok(TickOutcome::Idle);
        }
        let mut job = job;
        job.transition_to(JobStatus::Processing)?;

        info!(
            job_id = job.id,
            conversation_id = %job.conversation_id,
            attempt = job.retry_count + 1,
            "Processing job"
        );

        match self.execute(&job).await {
            Ok(reply) => self.finish_success(job, &reply).await,
            Err(e) => self.finish_failure(job, e).await,
        }
    }

    async fn select_job(&self) -> Result<Selection, QueueError> {
        let now = self.clock.now();
        let mut cooldowns = self.cooldowns.lock().await;
        cooldowns
            .per_counterparty
            .retain(|_, last| self.cooling_down(Some(*last), now));

        match self.config.rate_limit_scope {
            RateLimitScope::Global => {
                if self.cooling_down(cooldowns.global, now) {
                    return Ok(Selection::RateLimited);
                }
                drop(cooldowns);
                Ok(match self.jobs.oldest_pending_job().await? {
                    Some(job) => Selection::Job(job),
                    None => Selection::Empty,
                })
            }
            RateLimitScope::PerCounterparty => {
                let pending = self.jobs.pending_jobs(PER_COUNTERPARTY_SCAN).await?;
                if pending.is_empty() {
                    return Ok(Selection::Empty);
                }
                let eligible = pending.into_iter().find(|job| {
                    let last = cooldowns.per_counterparty.get(&job.counterparty_id).copied();
                    !self.cooling_down(last, now)
                });
                Ok(eligible.map_or(Selection::RateLimited, Selection::Job))
            }
        }
    }

    fn cooling_down(&self, last_success: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(last) = last_success else {
            return false;
        };
        let interval = chrono::Duration::from_std(self.config.rate_limit_interval)
            .unwrap_or(chrono::Duration::MAX);
        now - last < interval
    }

    /// Generate, record and send the reply.
    async fn execute(&self, job: &QueueJob) -> Result<String, DeliveryError> {
        let reply = self
            .bounded(
                "reply generation",
                self.generator
                    .generate(job.conversation_id, &job.message_content, &job.payload),
            )
            .await?;

        self.bounded("reply persistence", async {
            self.conversations
                .append_message(job.conversation_id, MessageDirection::Outgoing, &reply)
                .await
                .map_err(DeliveryError::from)
        })
        .await?;

        self.bounded(
            "send",
            self.gateway
                .send(&job.channel_address, MessageKind::Text, &reply),
        )
        .await?;

        Ok(reply)
    }

    /// Apply the per-attempt timeout, if configured.
    async fn bounded<T, F>(&self, step: &str, fut: F) -> Result<T, DeliveryError>
    where
        F: Future<Output = Result<T, DeliveryError>>,
    {
        match self.config.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| DeliveryError::timeout(step, limit))?,
            None => fut.await,
        }
    }

    async fn finish_success(
        &self,
        mut job: QueueJob,
        reply: &str,
    ) -> Result<TickOutcome, QueueError> {
        let processed_at = self.clock.now();
        {
            // The reply is out; start the cooldown even if the status write fails.
            let mut cooldowns = self.cooldowns.lock().await;
            cooldowns.global = Some(processed_at);
            cooldowns
                .per_counterparty
                .insert(job.counterparty_id, processed_at);
        }

        job.transition_to(JobStatus::Completed)?;
        let written = self
            .settle(
                job.id,
                Settlement::Complete {
                    reply: reply.to_string(),
                    processed_at,
                },
            )
            .await?;

        if written {
            info!(job_id = job.id, "Job completed");
        }
        Ok(TickOutcome::Completed { job_id: job.id })
    }

    async fn finish_failure(
        &self,
        mut job: QueueJob,
        err: DeliveryError,
    ) -> Result<TickOutcome, QueueError> {
        let error_message = err.to_string();

        match job.after_failure() {
            RetryDecision::Retry { retry_count } => {
                job.transition_to(JobStatus::Pending)?;
                let written = self
                    .settle(
                        job.id,
                        Settlement::Requeue {
                            retry_count,
                            error_message: error_message.clone(),
                        },
                    )
                    .await?;
                if written {
                    warn!(
                        job_id = job.id,
                        retry_count,
                        max_retries = job.max_retries,
                        error = %error_message,
                        "Job attempt failed, will retry"
                    );
                }
                Ok(TickOutcome::Retried {
                    job_id: job.id,
                    retry_count,
                })
            }
            RetryDecision::GiveUp { retry_count } => {
                job.transition_to(JobStatus::Failed)?;
                let written = self
                    .settle(
                        job.id,
                        Settlement::Fail {
                            retry_count,
                            error_message: error_message.clone(),
                            processed_at: self.clock.now(),
                        },
                    )
                    .await?;
                if written {
                    error!(
                        job_id = job.id,
                        retry_count,
                        error = %error_message,
                        "Job failed permanently"
                    );
                }
                Ok(TickOutcome::Failed { job_id: job.id })
            }
        }
    }

    /// Write a claimed job's outcome. Returns `false` if the job had already
    /// left `processing`. On a store error the write is kept and retried by
    /// the next tick.
    async fn settle(&self, job_id: i64, settlement: Settlement) -> Result<bool, QueueError> {
        let written = match &settlement {
            Settlement::Complete {
                reply,
                processed_at,
            } => self.jobs.complete_job(job_id, reply, *processed_at).await,
            Settlement::Requeue {
                retry_count,
                error_message,
            } => {
                self.jobs
                    .requeue_job(job_id, *retry_count, error_message)
                    .await
            }
            Settlement::Fail {
                retry_count,
                error_message,
                processed_at,
            } => {
                self.jobs
                    .fail_job(job_id, *retry_count, error_message, *processed_at)
                    .await
            }
        };

        match written {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!(
                    job_id,
                    status = %settlement.target(),
                    "Job no longer processing, status write skipped"
                );
                Ok(false)
            }
            Err(e) => {
                error!(
                    job_id,
                    status = %settlement.target(),
                    error = %e,
                    "Job status write failed, retrying next tick"
                );
                *self.unsettled.lock().await = Some((job_id, settlement));
                Err(e.into())
            }
        }
    }

    async fn settle_unsettled(&self) -> Result<(), QueueError> {
        let unsettled = self.unsettled.lock().await.take();
        if let Some((job_id, settlement)) = unsettled {
            info!(job_id, status = %settlement.target(), "Retrying job status write");
            self.settle(job_id, settlement).await?;
        }
        Ok(())
    }
}

enum Selection {
    Job(QueueJob),
    RateLimited,
    Empty,
}

/// Spawn the timer loop that drives `worker.tick()`.
///
/// Returns a `JoinHandle` and shutdown flag.
pub fn spawn_worker_loop(worker: Arc<QueueWorker>) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    let period = worker.config().tick_interval;

    let handle = tokio::spawn(async move {
        info!("Queue worker started — ticking every {}s", period.as_secs());

        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Queue worker shutting down");
                return;
            }

            match worker.tick().await {
                Ok(outcome) => debug!(?outcome, "Tick finished"),
                Err(e) => error!(error = %e, "Tick failed"),
            }
        }
    });

    (handle, shutdown_flag)
}
