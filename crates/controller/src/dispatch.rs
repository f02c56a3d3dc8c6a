//! One iteration of the dispatch loop.
//!
//! [`Dispatcher::run_once`] expands the template, submits it tagged with
//! this process's [`ClientId`], then blocks until ComfyUI has taken the
//! prompt off the pending list. The loop itself lives in the controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use flowcontrol_comfyui::api::ComfyUIApiError;
use flowcontrol_comfyui::backend::PromptBackend;
use flowcontrol_comfyui::queue::{ClientQueue, QueueObserver};
use flowcontrol_core::templates::JobTemplate;
use flowcontrol_core::types::ClientId;

/// A submission that ComfyUI rejected or that never reached it.
#[derive(Debug, thiserror::Error)]
#[error("Failed to submit workflow {template}: {source}")]
pub struct SubmissionError {
    pub template: String,
    #[source]
    pub source: ComfyUIApiError,
}

/// Outcome of a successful iteration.
#[derive(Debug, Clone)]
pub struct Iteration {
    /// Server-assigned prompt identifier.
    pub prompt_id: String,
    /// Time from expansion until ComfyUI accepted the prompt.
    pub elapsed: Duration,
}

impl Iteration {
    /// Elapsed time in whole milliseconds, saturating at `u64::MAX`.
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Submits expanded templates and waits on the queue for one client.
pub struct Dispatcher {
    backend: Arc<dyn PromptBackend>,
    observer: QueueObserver<dyn PromptBackend>,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn PromptBackend>, client_id: ClientId, poll_interval: Duration) -> Self {
        let observer = QueueObserver::new(Arc::clone(&backend), client_id, poll_interval);
        Self { backend, observer }
    }

    pub fn client_id(&self) -> &ClientId {
        self.observer.client_id()
    }

    /// Expand, submit and wait for acceptance of one prompt.
    ///
    /// Poll failures are absorbed by the observer; only submission
    /// failures are returned.
    pub async fn run_once(&self, template: &JobTemplate) -> Result<Iteration, SubmissionError> {
        let started = Instant::now();
        let prompt = template.randomized();

        let response = self
            .backend
            .submit_prompt(&prompt, self.client_id())
            .await
            .map_err(|source| SubmissionError {
                template: template.name().to_string(),
                source,
            })?;

        tracing::debug!(
            template = template.name(),
            prompt_id = %response.prompt_id,
            number = response.number,
            "Workflow submitted to ComfyUI",
        );

        self.observer.wait_for_acceptance().await;

        let elapsed = started.elapsed();
        tracing::info!(
            template = template.name(),
            prompt_id = %response.prompt_id,
            elapsed_secs = elapsed.as_secs_f64(),
            "Workflow accepted",
        );

        Ok(Iteration {
            prompt_id: response.prompt_id,
            elapsed,
        })
    }

    /// Block until none of this client's prompts are pending or running.
    pub async fn wait_for_drain(&self) -> ClientQueue {
        self.observer.wait_for_drain().await
    }
}
