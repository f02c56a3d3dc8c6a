//! Loop lifecycle events.
//!
//! Emitted by the [`LoopController`](crate::controller::LoopController)
//! on a broadcast channel. The OSC status notifier forwards them to the
//! outbound port; tests subscribe to observe the loop.

use serde::Serialize;

/// A state change or milestone of the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// A loop began running the named template.
    Started { template: String },

    /// One submission was queued and accepted by ComfyUI.
    IterationCompleted {
        template: String,
        iteration: u64,
        prompt_id: String,
        elapsed_ms: u64,
    },

    /// Submission failed; the loop is terminating.
    SubmissionFailed { template: String, error: String },

    /// The loop left its iteration cycle and is draining the queue.
    Stopping { template: String },

    /// Drain finished; the controller is idle again.
    Stopped { template: String, iterations: u64 },
}

impl LoopEvent {
    /// Template the event refers to.
    pub fn template(&self) -> &str {
        match self {
            Self::Started { template }
            | Self::IterationCompleted { template, .. }
            | Self::SubmissionFailed { template, .. }
            | Self::Stopping { template }
            | Self::Stopped { template, .. } => template,
        }
    }
}
