//! [`JobOrchestrator`]: submission, cancellation and event-driven state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_comfyui::{ComfyUIMessage, EventChannelClient, EventHandler, HandlerError, MessageKind};
use relay_core::admission::{AdmissionDecision, AdmissionLimits, QueueFull};
use relay_core::job_status::JobStatus;
use relay_core::types::DbId;
use relay_db::{Job, JobRepository, NewJob, RepoError, StatusUpdate, UpdateOutcome};

use crate::admission::AdmissionController;
use crate::compute::ComputeClient;
use crate::delivery::{DeliveryScheduler, DEFAULT_DEBOUNCE_WINDOW};
use crate::error::OrchestratorError;
use crate::sink::DeliverySink;

/// Message kinds the orchestrator subscribes to.
pub const HANDLED_KINDS: [MessageKind; 4] = [
    MessageKind::ExecutionStart,
    MessageKind::Progress,
    MessageKind::Executed,
    MessageKind::ExecutionError,
];

/// Tunables for [`JobOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub limits: AdmissionLimits,
    pub debounce_window: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            limits: AdmissionLimits::default(),
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
        }
    }
}

/// Turns backend events into job-state transitions and drives delivery.
///
/// Every status change goes through [`JobRepository::update_status`],
/// which rejects edges that leave a terminal status. Rejections and
/// unknown correlation ids are logged and dropped.
pub struct JobOrchestrator {
    repo: Arc<dyn JobRepository>,
    compute: Arc<dyn ComputeClient>,
    sink: Arc<dyn DeliverySink>,
    admission: AdmissionController,
    delivery: DeliveryScheduler,
    client_id: String,
}

impl JobOrchestrator {
    /// `client_id` must be the id the push channel connects with.
    pub fn new(
        repo: Arc<dyn JobRepository>,
        compute: Arc<dyn ComputeClient>,
        sink: Arc<dyn DeliverySink>,
        config: OrchestratorConfig,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            admission: AdmissionController::new(Arc::clone(&repo), config.limits),
            delivery: DeliveryScheduler::new(
                Arc::clone(&repo),
                Arc::clone(&sink),
                config.debounce_window,
            ),
            repo,
            compute,
            sink,
            client_id: client_id.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn delivery(&self) -> &DeliveryScheduler {
        &self.delivery
    }

    /// Register this orchestrator as a listener on `channel`.
    pub async fn start(self: &Arc<Self>, channel: &EventChannelClient) {
        if channel.client_id() != self.client_id {
            tracing::warn!(
                channel_client_id = channel.client_id(),
                submit_client_id = %self.client_id,
                "Channel and submissions use different client ids; events will not arrive",
            );
        }
        for kind in HANDLED_KINDS {
            channel
                .add_listener(kind, Arc::clone(self) as Arc<dyn EventHandler>)
                .await;
        }
    }

    /// Admit, submit, then persist a new Pending job.
    ///
    /// Nothing is sent to the backend when admission rejects, and nothing
    /// is persisted when the submission fails.
    pub async fn create_job(
        &self,
        owner_id: &str,
        scope_id: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<Job, OrchestratorError> {
        if let AdmissionDecision::Reject(QueueFull { active, ceiling }) =
            self.admission.check(owner_id, scope_id).await?
        {
            tracing::info!(owner_id, scope_id, active, ceiling, "Submission rejected, queue full");
            return Err(OrchestratorError::AdmissionRejected {
                owner_id: owner_id.to_string(),
                active,
                ceiling,
            });
        }

        let correlation_id = match self.compute.submit(&payload, &self.client_id).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(owner_id, error = %e, "Workflow submission failed");
                return Err(e.into());
            }
        };

        let job = self
            .repo
            .create_job(NewJob {
                correlation_id,
                owner_id: owner_id.to_string(),
                scope_id: scope_id.map(str::to_string),
                payload,
            })
            .await?;

        tracing::info!(
            job_id = job.id,
            prompt_id = %job.correlation_id,
            owner_id,
            "Job created",
        );
        Ok(job)
    }

    /// Cancel a non-terminal job.
    ///
    /// Returns `Ok(false)` if the job does not exist or is already
    /// terminal. Backend failures are logged and do not block the
    /// cancellation.
    pub async fn cancel_job(&self, job_id: DbId) -> Result<bool, OrchestratorError> {
        let Some(job) = self.repo.get_job_by_id(job_id).await? else {
            return Ok(false);
        };
        if job.status.is_terminal() {
            tracing::debug!(job_id, status = %job.status, "Cancel ignored for terminal job");
            return Ok(false);
        }

        let interrupted = job.status == JobStatus::Running;
        if interrupted {
            self.interrupt(job_id).await;
        }
        if let Err(e) = self.compute.remove_from_queue(&job.correlation_id).await {
            tracing::warn!(job_id, error = %e, "Queue removal failed");
        }

        match self
            .repo
            .update_status(&job.correlation_id, StatusUpdate::Cancelled)
            .await?
        {
            UpdateOutcome::Updated { previous, .. } => {
                // The job may have started after the first read.
                if previous == JobStatus::Running && !interrupted {
                    self.interrupt(job_id).await;
                }
                tracing::info!(job_id, prompt_id = %job.correlation_id, "Job cancelled");
                Ok(true)
            }
            UpdateOutcome::Rejected { current } => {
                tracing::debug!(job_id, status = %current, "Job finished before cancel landed");
                Ok(false)
            }
            UpdateOutcome::NotFound => Ok(false),
        }
    }

    async fn interrupt(&self, job_id: DbId) {
        if let Err(e) = self.compute.interrupt().await {
            tracing::warn!(job_id, error = %e, "Interrupt failed");
        }
    }

    /// All Pending and Running jobs, oldest first.
    pub async fn active_jobs(&self) -> Result<Vec<Job>, OrchestratorError> {
        Ok(self.repo.list_pending().await?)
    }

    /// Cancel every active job of `owner_id`. Returns how many were cancelled.
    pub async fn clear_queue(&self, owner_id: &str) -> Result<usize, OrchestratorError> {
        let mut cancelled = 0;
        for job in self.repo.list_pending().await? {
            if job.owner_id == owner_id && self.cancel_job(job.id).await? {
                cancelled += 1;
            }
        }
        tracing::info!(owner_id, cancelled, "Cleared queue");
        Ok(cancelled)
    }

    /// Stop pending deliveries. Call after the channel is disconnected.
    pub async fn shutdown(&self) {
        self.delivery.shutdown().await;
    }

    // ---- event handlers ----

    async fn on_start(&self, correlation_id: &str) -> Result<(), RepoError> {
        match self
            .repo
            .update_status(correlation_id, StatusUpdate::Started)
            .await?
        {
            UpdateOutcome::Updated { job, .. } => {
                tracing::info!(job_id = job.id, prompt_id = %correlation_id, "Job started");
            }
            UpdateOutcome::Rejected { current } => {
                tracing::debug!(prompt_id = %correlation_id, status = %current, "Ignoring start event");
            }
            UpdateOutcome::NotFound => correlation_miss(correlation_id, MessageKind::ExecutionStart),
        }
        Ok(())
    }

    async fn on_progress(&self, correlation_id: &str, value: i32, max: i32) -> Result<(), RepoError> {
        match self.repo.update_progress(correlation_id, value, max).await? {
            UpdateOutcome::Updated { job, .. } => {
                tracing::debug!(
                    job_id = job.id,
                    value,
                    max,
                    percent = job.progress_percent(),
                    "Generation progress",
                );
            }
            UpdateOutcome::Rejected { current } => {
                tracing::debug!(prompt_id = %correlation_id, status = %current, "Ignoring progress event");
            }
            UpdateOutcome::NotFound => correlation_miss(correlation_id, MessageKind::Progress),
        }
        Ok(())
    }

    async fn on_completed(
        &self,
        correlation_id: &str,
        artifacts: Vec<serde_json::Value>,
    ) -> Result<(), RepoError> {
        let count = artifacts.len();
        let update = StatusUpdate::Completed { artifacts };
        if let Some(job) = self
            .apply_terminal(correlation_id, update, MessageKind::Executed)
            .await?
        {
            tracing::info!(
                job_id = job.id,
                prompt_id = %correlation_id,
                artifacts = count,
                "Job completed",
            );
            self.delivery.schedule(&job).await;
        }
        Ok(())
    }

    async fn on_error(&self, correlation_id: &str, error_detail: String) -> Result<(), RepoError> {
        let update = StatusUpdate::Failed { error_detail };
        let Some(job) = self
            .apply_terminal(correlation_id, update, MessageKind::ExecutionError)
            .await?
        else {
            return Ok(());
        };

        tracing::info!(
            job_id = job.id,
            prompt_id = %correlation_id,
            error = job.error_detail.as_deref().unwrap_or_default(),
            "Job failed",
        );
        if let Err(e) = self.sink.notify_failure(&job).await {
            tracing::error!(job_id = job.id, error = %e, "Failure notification failed");
        }
        Ok(())
    }

    /// Apply a terminal update, inserting the Running step if the start
    /// event was missed. Returns the job when the update landed.
    async fn apply_terminal(
        &self,
        correlation_id: &str,
        update: StatusUpdate,
        kind: MessageKind,
    ) -> Result<Option<Job>, RepoError> {
        let mut outcome = self
            .repo
            .update_status(correlation_id, update.clone())
            .await?;

        if matches!(outcome, UpdateOutcome::Rejected { current: JobStatus::Pending }) {
            tracing::debug!(prompt_id = %correlation_id, "Start event missed, marking Running first");
            self.repo
                .update_status(correlation_id, StatusUpdate::Started)
                .await?;
            outcome = self.repo.update_status(correlation_id, update).await?;
        }

        match outcome {
            UpdateOutcome::Updated { job, .. } => Ok(Some(job)),
            UpdateOutcome::Rejected { current } => {
                tracing::debug!(
                    prompt_id = %correlation_id,
                    status = %current,
                    kind = %kind,
                    "Ignoring event for terminal job",
                );
                Ok(None)
            }
            UpdateOutcome::NotFound => {
                correlation_miss(correlation_id, kind);
                Ok(None)
            }
        }
    }
}

fn correlation_miss(correlation_id: &str, kind: MessageKind) {
    tracing::warn!(prompt_id = %correlation_id, kind = %kind, "No job for event, dropping");
}

#[async_trait]
impl EventHandler for JobOrchestrator {
    async fn handle(&self, message: &ComfyUIMessage) -> Result<(), HandlerError> {
        let result = match message {
            ComfyUIMessage::ExecutionStart(data) => self.on_start(&data.prompt_id).await,
            ComfyUIMessage::Progress(data) => match data.prompt_id.as_deref() {
                Some(prompt_id) => self.on_progress(prompt_id, data.value, data.max).await,
                None => Ok(()),
            },
            ComfyUIMessage::Executed(data) => match data.images() {
                Some(images) => self.on_completed(&data.prompt_id, images.to_vec()).await,
                None => Ok(()),
            },
            ComfyUIMessage::ExecutionError(data) => {
                self.on_error(&data.prompt_id, data.detail()).await
            }
            _ => Ok(()),
        };

        result.map_err(|e| HandlerError::new(format!("Failed to persist event: {e}")))
    }
}
