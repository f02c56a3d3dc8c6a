//! ComfyUI queue inspection and polling.
//!
//! `GET /queue` returns two arrays, `queue_running` and `queue_pending`.
//! Each entry is a tuple `[number, prompt_id, prompt, extra_data,
//! outputs]` where `extra_data.client_id` names the client that
//! submitted it. [`QueueObserver`] polls that endpoint until this
//! client's share of the queue satisfies a condition.

use std::sync::Arc;
use std::time::Duration;

use flowcontrol_core::types::ClientId;
use serde::Deserialize;
use serde_json::Value;

use crate::backend::PromptBackend;

/// Default delay between queue polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Index of the `extra_data` object inside a queue tuple.
const EXTRA_DATA_INDEX: usize = 3;

/// Raw body of `GET /queue`. Missing or `null` arrays are empty.
#[derive(Debug, Default, Deserialize)]
pub struct QueueResponse {
    #[serde(default)]
    pub queue_running: Option<Vec<Value>>,
    #[serde(default)]
    pub queue_pending: Option<Vec<Value>>,
}

/// A single queued or running prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub number: Option<i64>,
    pub prompt_id: Option<String>,
    /// Owning client, if the entry carries one.
    pub client_id: Option<String>,
}

impl QueueEntry {
    /// Extract the fields we care about from a raw queue tuple.
    ///
    /// Entries that are not arrays, or lack `extra_data.client_id`, are
    /// kept but belong to no client.
    pub fn from_raw(raw: &Value) -> Self {
        let item = raw.as_array();
        let field = |i: usize| item.and_then(|a| a.get(i));

        Self {
            number: field(0).and_then(Value::as_i64),
            prompt_id: field(1).and_then(Value::as_str).map(str::to_string),
            client_id: field(EXTRA_DATA_INDEX)
                .and_then(|extra| extra.get("client_id"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// Whether this entry was submitted by `client_id`.
    pub fn belongs_to(&self, client_id: &ClientId) -> bool {
        self.client_id.as_deref() == Some(client_id.as_str())
    }
}

/// Point-in-time view of the server's queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub running: Vec<QueueEntry>,
    pub pending: Vec<QueueEntry>,
}

impl From<QueueResponse> for QueueSnapshot {
    fn from(raw: QueueResponse) -> Self {
        let parse = |entries: Option<Vec<Value>>| -> Vec<QueueEntry> {
            entries
                .unwrap_or_default()
                .iter()
                .map(QueueEntry::from_raw)
                .collect()
        };

        Self {
            running: parse(raw.queue_running),
            pending: parse(raw.queue_pending),
        }
    }
}

impl QueueSnapshot {
    /// Count the entries owned by `client_id`.
    pub fn for_client(&self, client_id: &ClientId) -> ClientQueue {
        let count = |entries: &[QueueEntry]| {
            entries.iter().filter(|e| e.belongs_to(client_id)).count()
        };

        ClientQueue {
            running: count(self.running.as_slice()),
            pending: count(self.pending.as_slice()),
        }
    }
}

/// One client's share of the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientQueue {
    pub running: usize,
    pub pending: usize,
}

impl ClientQueue {
    /// Nothing of ours is waiting; the next prompt may be queued.
    pub fn is_accepted(&self) -> bool {
        self.pending == 0
    }

    /// Nothing of ours is waiting or executing.
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

/// Polls the ComfyUI queue on behalf of one client.
pub struct QueueObserver<B: PromptBackend + ?Sized> {
    backend: Arc<B>,
    client_id: ClientId,
    interval: Duration,
}

impl<B: PromptBackend + ?Sized> QueueObserver<B> {
    pub fn new(backend: Arc<B>, client_id: ClientId, interval: Duration) -> Self {
        Self {
            backend,
            client_id,
            interval,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Wait until none of this client's prompts are pending.
    ///
    /// Running prompts are allowed, which caps the pending depth at one
    /// submission per client.
    pub async fn wait_for_acceptance(&self) -> ClientQueue {
        self.poll_until(ClientQueue::is_accepted).await
    }

    /// Wait until none of this client's prompts are pending or running.
    pub async fn wait_for_drain(&self) -> ClientQueue {
        self.poll_until(ClientQueue::is_drained).await
    }

    /// Poll until `predicate` holds for this client's queue share.
    ///
    /// The first poll is immediate. Failed polls are logged and retried
    /// after the interval; there is no overall timeout.
    pub async fn poll_until<F>(&self, predicate: F) -> ClientQueue
    where
        F: Fn(&ClientQueue) -> bool,
    {
        let mut attempt = 0u64;

        loop {
            attempt += 1;
            match self.backend.queue().await {
                Ok(snapshot) => {
                    let mine = snapshot.for_client(&self.client_id);
                    if predicate(&mine) {
                        return mine;
                    }
                    tracing::trace!(
                        attempt,
                        pending = mine.pending,
                        running = mine.running,
                        "Queue not ready yet",
                    );
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Error polling ComfyUI queue");
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}
