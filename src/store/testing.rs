//! Test double for `JobStore` that fails chosen operations on demand.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::queue::job::{JobCounts, NewJob, QueueJob};
use crate::store::LibSqlBackend;
use crate::store::traits::JobStore;

/// Delegates to a real backend, except for operations armed with
/// [`FaultyJobStore::fail_next`], which return a query error instead.
pub(crate) struct FaultyJobStore {
    inner: Arc<LibSqlBackend>,
    armed: Mutex<HashMap<&'static str, usize>>,
}

impl FaultyJobStore {
    pub(crate) fn new(inner: Arc<LibSqlBackend>) -> Self {
        Self {
            inner,
            armed: Mutex::new(HashMap::new()),
        }
    }

    /// Make the next `times` calls of `op` fail.
    pub(crate) fn fail_next(&self, op: &'static str, times: usize) {
        self.armed.lock().unwrap().insert(op, times);
    }

    fn check(&self, op: &'static str) -> Result<(), DatabaseError> {
        let mut armed = self.armed.lock().unwrap();
        match armed.get_mut(op) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(DatabaseError::Query(format!("{op}: database is locked")))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl JobStore for FaultyJobStore {
    async fn enqueue(&self, job: &NewJob) -> Result<QueueJob, DatabaseError> {
        self.check("enqueue")?;
        self.inner.enqueue(job).await
    }

    async fn get_job(&self, id: i64) -> Result<Option<QueueJob>, DatabaseError> {
        self.inner.get_job(id).await
    }

    async fn find_job_by_external_id(
        &self,
        external_message_id: &str,
    ) -> Result<Option<QueueJob>, DatabaseError> {
        self.inner.find_job_by_external_id(external_message_id).await
    }

    async fn oldest_pending_job(&self) -> Result<Option<QueueJob>, DatabaseError> {
        self.inner.oldest_pending_job().await
    }

    async fn pending_jobs(&self, limit: usize) -> Result<Vec<QueueJob>, DatabaseError> {
        self.inner.pending_jobs(limit).await
    }

    async fn claim_job(&self, id: i64) -> Result<bool, DatabaseError> {
        self.inner.claim_job(id).await
    }

    async fn complete_job(
        &self,
        id: i64,
        reply_text: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        self.check("complete_job")?;
        self.inner.complete_job(id, reply_text, processed_at).await
    }

    async fn requeue_job(
        &self,
        id: i64,
        retry_count: u32,
        error_message: &str,
    ) -> Result<bool, DatabaseError> {
        self.check("requeue_job")?;
        self.inner.requeue_job(id, retry_count, error_message).await
    }

    async fn fail_job(
        &self,
        id: i64,
        retry_count: u32,
        error_message: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        self.check("fail_job")?;
        self.inner
            .fail_job(id, retry_count, error_message, processed_at)
            .await
    }

    async fn reset_processing_jobs(&self) -> Result<usize, DatabaseError> {
        self.inner.reset_processing_jobs().await
    }

    async fn job_counts(&self) -> Result<JobCounts, DatabaseError> {
        self.inner.job_counts().await
    }
}
