//! Shared fakes for orchestrator integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relay_comfyui::messages::parse_message;
use relay_comfyui::EventHandler;
use relay_core::admission::AdmissionLimits;
use relay_db::{InMemoryJobRepo, Job, JobRepository, StatusUpdate};
use relay_orchestrator::{
    ComputeClient, ComputeError, DeliveryError, DeliverySink, JobOrchestrator, OrchestratorConfig,
};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// FakeCompute
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeCompute {
    next: AtomicUsize,
    pub fail_submit: AtomicBool,
    pub fail_control: AtomicBool,
    pub submitted: Mutex<Vec<(serde_json::Value, String)>>,
    pub interrupts: AtomicUsize,
    pub removed: Mutex<Vec<String>>,
    /// When set, queue removal marks the job Running first, as if its
    /// `execution_start` arrived while the cancel was in flight.
    pub start_on_remove: Mutex<Option<Arc<InMemoryJobRepo>>>,
}

impl FakeCompute {
    pub fn submit_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn interrupt_count(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ComputeClient for FakeCompute {
    async fn submit(
        &self,
        payload: &serde_json::Value,
        client_id: &str,
    ) -> Result<String, ComputeError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(ComputeError::Backend("prompt has no outputs".into()));
        }
        self.submitted
            .lock()
            .unwrap()
            .push((payload.clone(), client_id.to_string()));
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("prompt-{n}"))
    }

    async fn interrupt(&self) -> Result<(), ComputeError> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        if self.fail_control.load(Ordering::SeqCst) {
            return Err(ComputeError::Backend("connection refused".into()));
        }
        Ok(())
    }

    async fn remove_from_queue(&self, correlation_id: &str) -> Result<(), ComputeError> {
        self.removed.lock().unwrap().push(correlation_id.to_string());
        let repo = self.start_on_remove.lock().unwrap().clone();
        if let Some(repo) = repo {
            repo.update_status(correlation_id, StatusUpdate::Started)
                .await
                .map_err(|e| ComputeError::Backend(e.to_string()))?;
        }
        if self.fail_control.load(Ordering::SeqCst) {
            return Err(ComputeError::Backend("connection refused".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    pub delivered: Mutex<Vec<(Instant, Job)>>,
    pub failures: Mutex<Vec<Job>>,
}

impl RecordingSink {
    pub fn delivered(&self) -> Vec<(Instant, Job)> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<Job> {
        self.failures.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(&self, job: &Job) -> Result<(), DeliveryError> {
        self.delivered
            .lock()
            .unwrap()
            .push((Instant::now(), job.clone()));
        Ok(())
    }

    async fn notify_failure(&self, job: &Job) -> Result<(), DeliveryError> {
        self.failures.lock().unwrap().push(job.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub const CLIENT_ID: &str = "relay-test";

pub struct Harness {
    pub repo: Arc<InMemoryJobRepo>,
    pub compute: Arc<FakeCompute>,
    pub sink: Arc<RecordingSink>,
    pub orchestrator: Arc<JobOrchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_limits(AdmissionLimits::default())
    }

    pub fn with_limits(limits: AdmissionLimits) -> Self {
        let repo = Arc::new(InMemoryJobRepo::new());
        let compute = Arc::new(FakeCompute::default());
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Arc::new(JobOrchestrator::new(
            repo.clone(),
            compute.clone(),
            sink.clone(),
            OrchestratorConfig {
                limits,
                debounce_window: Duration::from_secs(1),
            },
            CLIENT_ID,
        ));
        Self {
            repo,
            compute,
            sink,
            orchestrator,
        }
    }

    pub async fn create(&self, owner: &str) -> Job {
        self.orchestrator
            .create_job(owner, None, serde_json::json!({"3": {"class_type": "KSampler"}}))
            .await
            .unwrap()
    }

    /// Feed a raw push-channel frame to the orchestrator.
    pub async fn event(&self, frame: serde_json::Value) {
        let message = parse_message(&frame.to_string()).unwrap();
        self.orchestrator.handle(&message).await.unwrap();
    }

    pub async fn start(&self, prompt_id: &str) {
        self.event(serde_json::json!({
            "type": "execution_start",
            "data": {"prompt_id": prompt_id}
        }))
        .await;
    }

    pub async fn progress(&self, prompt_id: &str, value: i32, max: i32) {
        self.event(serde_json::json!({
            "type": "progress",
            "data": {"prompt_id": prompt_id, "value": value, "max": max, "node": "3"}
        }))
        .await;
    }

    pub async fn executed(&self, prompt_id: &str, filename: &str) {
        self.event(serde_json::json!({
            "type": "executed",
            "data": {
                "prompt_id": prompt_id,
                "node": "9",
                "output": {"images": [{"filename": filename, "subfolder": "", "type": "output"}]}
            }
        }))
        .await;
    }

    pub async fn error(&self, prompt_id: &str) {
        self.event(serde_json::json!({
            "type": "execution_error",
            "data": {
                "prompt_id": prompt_id,
                "node_id": "3",
                "exception_type": "torch.OutOfMemoryError",
                "exception_message": "CUDA out of memory"
            }
        }))
        .await;
    }

    pub async fn job(&self, prompt_id: &str) -> Job {
        self.repo
            .get_job_by_correlation_id(prompt_id)
            .await
            .unwrap()
            .expect("job exists")
    }
}
