//! Request handler pool
//!
//! Each worker owns a competing consumer on the request queue and drives one
//! job at a time through `queued → in_progress → {succeeded, failed}`. The
//! job message is acknowledged only after its result is durably published,
//! so a crash between the backend call and the ack republishes the result
//! rather than losing it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::RetryPolicy;
use crate::config::WorkerConfig;
use crate::core::{
    BackendError, ErrorKind, JobStatus, TranslationJob, TranslationRequest, TranslationResult,
};
use crate::error::Result;
use crate::queue::{Inbound, RequestQueue, ResultQueue};
use crate::translators::TranslatorRegistry;

/// What happened to one job message
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Success result published, job acked
    Succeeded,
    /// Transient failure, requeued with the bumped counter
    Retrying { retries: u32, delay: Duration },
    /// Terminal failure result published, job acked
    Failed(ErrorKind),
    /// Poison message rejected
    Dropped,
    /// Result could not be published; the job goes back unchanged
    Deferred,
}

/// Processes single job messages
pub struct RequestHandler {
    translators: TranslatorRegistry,
    results: ResultQueue,
    policy: RetryPolicy,
    max_retries: u32,
    backend_timeout: Duration,
    infra_retry_delay: Duration,
}

impl RequestHandler {
    pub fn new(translators: TranslatorRegistry, results: ResultQueue, config: &WorkerConfig) -> Self {
        RequestHandler {
            translators,
            results,
            policy: RetryPolicy::from_config(config),
            max_retries: config.max_retries,
            backend_timeout: config.backend_timeout,
            infra_retry_delay: config.infra_retry_delay,
        }
    }

    /// Override the retry delay policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Handle one delivered job message and settle it
    pub async fn handle(&self, inbound: Inbound<TranslationJob>) -> JobOutcome {
        let mut job = match &inbound.message {
            Ok(job) => job.clone(),
            Err(e) => {
                warn!(error = %e, kind = %ErrorKind::ValidationError, "dropping undecodable job");
                settle(inbound.reject().await);
                return JobOutcome::Dropped;
            }
        };

        if let Err(e) = job.validate() {
            warn!(job_id = %job.id, error = %e, kind = %ErrorKind::ValidationError, "dropping invalid job");
            settle(inbound.reject().await);
            return JobOutcome::Dropped;
        }

        job.status = JobStatus::InProgress;
        debug!(
            job_id = %job.id,
            session_id = %job.session_id,
            backend = %job.backend,
            retries = job.retries,
            "processing job"
        );

        match self.call_backend(&job).await {
            Ok(result) => {
                job.status = JobStatus::Succeeded;
                self.publish_and_ack(inbound, &job, result, JobOutcome::Succeeded).await
            }
            Err(e) if e.is_transient() && job.retries < self.max_retries => {
                let delay = self.policy.delay_for(job.retries);
                job.retries += 1;
                job.status = JobStatus::Queued;
                info!(
                    job_id = %job.id,
                    retries = job.retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient backend failure, requeueing"
                );
                match inbound.requeue(&job, delay).await {
                    Ok(()) => JobOutcome::Retrying {
                        retries: job.retries,
                        delay,
                    },
                    Err(err) => {
                        error!(job_id = %job.id, error = %err, "requeue failed, leaving job to redelivery");
                        JobOutcome::Deferred
                    }
                }
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                warn!(
                    job_id = %job.id,
                    retries = job.retries,
                    kind = %e.kind,
                    error = %e.detail,
                    "job failed terminally"
                );
                let result = TranslationResult::failure(&job, e.kind, e.detail);
                self.publish_and_ack(inbound, &job, result, JobOutcome::Failed(e.kind))
                    .await
            }
        }
    }

    async fn call_backend(
        &self,
        job: &TranslationJob,
    ) -> std::result::Result<TranslationResult, BackendError> {
        let translator = self.translators.get(&job.backend).ok_or_else(|| {
            BackendError::fatal(format!("unknown translator backend: {}", job.backend))
        })?;

        let request = TranslationRequest::from(job);
        let translation = tokio::time::timeout(self.backend_timeout, translator.translate(&request))
            .await
            .map_err(|_| {
                BackendError::transient(format!(
                    "backend {} timed out after {:?}",
                    job.backend, self.backend_timeout
                ))
            })??;

        Ok(TranslationResult::success(
            job,
            translation.translated_text,
            translation.source_lang,
        ))
    }

    async fn publish_and_ack(
        &self,
        inbound: Inbound<TranslationJob>,
        job: &TranslationJob,
        result: TranslationResult,
        outcome: JobOutcome,
    ) -> JobOutcome {
        if let Err(e) = self.results.emit(&result).await {
            // Nothing published: redeliver the job as it arrived
            error!(job_id = %job.id, error = %e, "failed to publish result");
            settle(inbound.nack(self.infra_retry_delay).await);
            return JobOutcome::Deferred;
        }
        settle(inbound.ack().await);
        debug!(job_id = %job.id, ?outcome, "job settled");
        outcome
    }
}

fn settle(result: Result<()>) {
    if let Err(e) = result {
        error!(error = %e, "failed to settle queue message");
    }
}

/// A fixed set of request workers
pub struct RequestHandlerPool {
    workers: Vec<JoinHandle<()>>,
}

impl RequestHandlerPool {
    /// Spawn `workers` consumers on `queue`
    pub async fn start(
        handler: Arc<RequestHandler>,
        queue: RequestQueue,
        workers: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let mut handles = Vec::with_capacity(workers);

        for i in 0..workers {
            let mut consumer = queue.consumer().await?;
            let handler = handler.clone();
            let mut shutdown = shutdown.clone();

            handles.push(tokio::spawn(async move {
                info!(worker = i, queue = consumer.queue(), "request worker started");
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        next = consumer.next() => match next {
                            Ok(Some(inbound)) => {
                                handler.handle(inbound).await;
                            }
                            Ok(None) => break,
                            Err(e) => {
                                error!(worker = i, error = %e, "request queue consume failed");
                                tokio::time::sleep(handler.infra_retry_delay).await;
                            }
                        },
                    }
                }
                info!(worker = i, "request worker stopped");
            }));
        }

        Ok(RequestHandlerPool { workers: handles })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Wait for every worker to stop
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "request worker panicked");
            }
        }
    }
}
