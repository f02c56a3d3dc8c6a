//! ComfyUI REST client library.
//!
//! Provides the HTTP API wrapper for prompt submission and queue
//! inspection, the [`PromptBackend`](backend::PromptBackend) seam the
//! loop controller is written against, and the queue observer that
//! waits for this client's prompts to be accepted or drained.

pub mod api;
pub mod backend;
pub mod queue;
