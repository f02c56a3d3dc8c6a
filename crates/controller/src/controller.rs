//! Loop lifecycle management.
//!
//! [`LoopController`] owns the single dispatch loop. `start` always runs
//! the full stop protocol first, so two loops never coexist; `stop`
//! cancels the loop and waits until it has drained this client's work
//! from the ComfyUI queue. Transitions are serialized by an async mutex
//! held for the whole stop-then-start sequence.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use flowcontrol_comfyui::backend::PromptBackend;
use flowcontrol_core::error::TemplateError;
use flowcontrol_core::templates::{JobTemplate, TemplateStore};
use flowcontrol_core::types::ClientId;
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::events::LoopEvent;

/// Broadcast channel capacity for loop events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle state of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
        })
    }
}

/// Handle to the currently spawned loop task.
struct ActiveLoop {
    template: String,
    cancel: CancellationToken,
    handle: JoinHandle<u64>,
}

/// Starts and stops the workflow dispatch loop.
///
/// Create once at startup and share via `Arc`.
pub struct LoopController {
    dispatcher: Arc<Dispatcher>,
    store: TemplateStore,
    active: Mutex<Option<ActiveLoop>>,
    state: Arc<watch::Sender<LoopState>>,
    events: broadcast::Sender<LoopEvent>,
}

impl LoopController {
    pub fn new(
        backend: Arc<dyn PromptBackend>,
        store: TemplateStore,
        client_id: ClientId,
        poll_interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            dispatcher: Arc::new(Dispatcher::new(backend, client_id, poll_interval)),
            store,
            active: Mutex::new(None),
            state: Arc::new(state),
            events,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        self.dispatcher.client_id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Watch lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Subscribe to loop events.
    pub fn subscribe(&self) -> broadcast::Receiver<LoopEvent> {
        self.events.subscribe()
    }

    /// Stop any active loop, then start looping `template_name`.
    ///
    /// Returns once the new loop is spawned. If the template cannot be
    /// resolved the error is logged and returned, and the controller
    /// stays idle.
    pub async fn start(&self, template_name: &str) -> Result<(), TemplateError> {
        let mut active = self.active.lock().await;
        self.stop_locked(&mut active).await;

        let template = match self.store.load(template_name).await {
            Ok(template) => template,
            Err(e) => {
                tracing::error!(template = template_name, error = %e, "Failed to resolve workflow");
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        self.state.send_replace(LoopState::Running);
        let _ = self.events.send(LoopEvent::Started {
            template: template_name.to_string(),
        });
        tracing::info!(template = template_name, client_id = %self.client_id(), "Starting workflow loop");

        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.dispatcher),
            template,
            cancel.clone(),
            Arc::clone(&self.state),
            self.events.clone(),
        ));

        *active = Some(ActiveLoop {
            template: template_name.to_string(),
            cancel,
            handle,
        });
        Ok(())
    }

    /// Stop the active loop and wait until its work has drained.
    ///
    /// A no-op when nothing is running. Concurrent callers queue on the
    /// lifecycle lock; later ones find the loop already gone.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        self.stop_locked(&mut active).await;
    }

    /// The loop stays in `active` until its task has finished, so a stop
    /// or start that is dropped mid-drain leaves the next caller to finish
    /// the job.
    async fn stop_locked(&self, active: &mut Option<ActiveLoop>) {
        let Some(current) = active.as_mut() else {
            return;
        };

        current.cancel.cancel();
        if !current.handle.is_finished() {
            tracing::info!(template = %current.template, "Stopping workflow loop...");
            self.state.send_if_modified(|state| {
                let running = *state == LoopState::Running;
                if running {
                    *state = LoopState::Stopping;
                }
                running
            });
        }

        match (&mut current.handle).await {
            Ok(iterations) => {
                tracing::info!(template = %current.template, iterations, "Workflow loop stopped");
            }
            Err(e) => {
                tracing::error!(template = %current.template, error = %e, "Workflow loop task failed");
            }
        }
        *active = None;
        self.state.send_replace(LoopState::Idle);
    }
}

/// Body of the spawned loop task. Returns the number of completed
/// iterations.
///
/// Cancellation is only checked between iterations. Whatever ends the
/// loop, the queue is drained before the state returns to idle.
async fn run_loop(
    dispatcher: Arc<Dispatcher>,
    template: JobTemplate,
    cancel: CancellationToken,
    state: Arc<watch::Sender<LoopState>>,
    events: broadcast::Sender<LoopEvent>,
) -> u64 {
    let name = template.name().to_string();
    let mut iterations = 0u64;

    while !cancel.is_cancelled() {
        match dispatcher.run_once(&template).await {
            Ok(iteration) => {
                iterations += 1;
                let _ = events.send(LoopEvent::IterationCompleted {
                    template: name.clone(),
                    iteration: iterations,
                    elapsed_ms: iteration.elapsed_ms(),
                    prompt_id: iteration.prompt_id,
                });
            }
            Err(e) => {
                tracing::error!(template = %name, error = %e, "Workflow error, ending loop");
                let _ = events.send(LoopEvent::SubmissionFailed {
                    template: name.clone(),
                    error: e.to_string(),
                });
                break;
            }
        }
    }

    state.send_replace(LoopState::Stopping);
    let _ = events.send(LoopEvent::Stopping {
        template: name.clone(),
    });

    let remaining = dispatcher.wait_for_drain().await;
    tracing::debug!(template = %name, ?remaining, "Queue drained");

    state.send_replace(LoopState::Idle);
    let _ = events.send(LoopEvent::Stopped {
        template: name,
        iterations,
    });
    iterations
}
