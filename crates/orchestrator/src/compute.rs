//! The compute backend as seen by the orchestrator.

use async_trait::async_trait;
use relay_comfyui::{ComfyUIApi, ComfyUIApiError};

#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    #[error(transparent)]
    Api(#[from] ComfyUIApiError),

    /// Failure from a backend other than the ComfyUI REST API.
    #[error("{0}")]
    Backend(String),
}

/// Submission and control calls made against the compute backend.
#[async_trait]
pub trait ComputeClient: Send + Sync {
    /// Queue `payload` and return the backend's correlation id for it.
    ///
    /// `client_id` must be the push-channel client id, so the backend
    /// routes this job's events to our channel.
    async fn submit(
        &self,
        payload: &serde_json::Value,
        client_id: &str,
    ) -> Result<String, ComputeError>;

    /// Stop whatever is executing right now.
    async fn interrupt(&self) -> Result<(), ComputeError>;

    /// Drop a not-yet-started job from the backend queue.
    async fn remove_from_queue(&self, correlation_id: &str) -> Result<(), ComputeError>;
}

#[async_trait]
impl ComputeClient for ComfyUIApi {
    async fn submit(
        &self,
        payload: &serde_json::Value,
        client_id: &str,
    ) -> Result<String, ComputeError> {
        let response = self.submit_workflow(payload, client_id).await?;
        Ok(response.prompt_id)
    }

    async fn interrupt(&self) -> Result<(), ComputeError> {
        Ok(ComfyUIApi::interrupt(self).await?)
    }

    async fn remove_from_queue(&self, correlation_id: &str) -> Result<(), ComputeError> {
        Ok(ComfyUIApi::remove_from_queue(self, correlation_id).await?)
    }
}
