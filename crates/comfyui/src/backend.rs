//! The seam between the loop controller and a ComfyUI server.

use async_trait::async_trait;
use flowcontrol_core::types::ClientId;

use crate::api::{ComfyUIApi, ComfyUIApiError, SubmitResponse};
use crate::queue::QueueSnapshot;

/// Operations the looper needs from a ComfyUI server.
///
/// Implemented by [`ComfyUIApi`] for real servers; tests drive the
/// controller with in-memory fakes.
#[async_trait]
pub trait PromptBackend: Send + Sync {
    /// Queue a workflow tagged with `client_id`.
    async fn submit_prompt(
        &self,
        prompt: &serde_json::Value,
        client_id: &ClientId,
    ) -> Result<SubmitResponse, ComfyUIApiError>;

    /// Snapshot the server's running and pending queues.
    async fn queue(&self) -> Result<QueueSnapshot, ComfyUIApiError>;
}

#[async_trait]
impl PromptBackend for ComfyUIApi {
    async fn submit_prompt(
        &self,
        prompt: &serde_json::Value,
        client_id: &ClientId,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        self.submit_workflow(prompt, client_id).await
    }

    async fn queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        self.get_queue().await
    }
}
