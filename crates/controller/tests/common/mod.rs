//! Shared fixtures for controller integration tests.
//!
//! [`MockComfy`] is an in-memory ComfyUI: submissions join a FIFO
//! pending list, and every queue poll advances a single simulated
//! executor by one tick. It records what the client had in flight at
//! each submission so tests can check the single-loop guarantees.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use flowcontrol::controller::{LoopController, LoopState};
use flowcontrol_comfyui::api::{ComfyUIApiError, SubmitResponse};
use flowcontrol_comfyui::backend::PromptBackend;
use flowcontrol_comfyui::queue::{ClientQueue, QueueEntry, QueueSnapshot};
use flowcontrol_core::templates::TemplateStore;
use flowcontrol_core::types::ClientId;

/// Poll interval used by every test controller.
pub const TEST_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Upper bound for any wait in a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct Job {
    number: i64,
    prompt_id: String,
    client_id: String,
}

impl Job {
    fn entry(&self) -> QueueEntry {
        QueueEntry {
            number: Some(self.number),
            prompt_id: Some(self.prompt_id.clone()),
            client_id: Some(self.client_id.clone()),
        }
    }
}

/// What the mock saw when a prompt was submitted.
#[derive(Debug, Clone)]
pub struct Submission {
    pub prompt: Value,
    pub client_id: String,
    /// This client's pending entries at submission time.
    pub pending_before: usize,
    /// This client's running entries at submission time.
    pub running_before: usize,
}

#[derive(Default)]
struct Inner {
    pending: VecDeque<Job>,
    running: Option<(Job, u32)>,
    foreign: Vec<Job>,
    submissions: Vec<Submission>,
    next_number: i64,
    polls: usize,
    /// Reject every submission after this many have succeeded.
    fail_after: Option<usize>,
    /// Fail this many queue polls before answering normally.
    failing_polls: usize,
}

/// In-memory ComfyUI server.
pub struct MockComfy {
    inner: Mutex<Inner>,
    /// Polls a job spends running before it completes.
    ticks_per_job: u32,
}

impl MockComfy {
    pub fn new(ticks_per_job: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            ticks_per_job: ticks_per_job.max(1),
        })
    }

    pub fn failing_after(ticks_per_job: u32, successes: usize) -> Arc<Self> {
        let mock = Self::new(ticks_per_job);
        mock.inner.lock().unwrap().fail_after = Some(successes);
        mock
    }

    /// Make the next `count` queue polls fail with a 500.
    pub fn fail_next_polls(&self, count: usize) {
        self.inner.lock().unwrap().failing_polls = count;
    }

    /// Add another client's job that stays pending forever.
    pub fn add_foreign_pending(&self, client_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_number += 1;
        let job = Job {
            number: inner.next_number,
            prompt_id: format!("foreign-{}", inner.next_number),
            client_id: client_id.to_string(),
        };
        inner.foreign.push(job);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.inner.lock().unwrap().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.inner.lock().unwrap().submissions.len()
    }

    pub fn polls(&self) -> usize {
        self.inner.lock().unwrap().polls
    }

    /// This client's share of the queue, without advancing the executor.
    pub fn client_queue(&self, client_id: &ClientId) -> ClientQueue {
        self.inner.lock().unwrap().snapshot().for_client(client_id)
    }
}

impl Inner {
    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            running: self.running.iter().map(|(job, _)| job.entry()).collect(),
            pending: self
                .pending
                .iter()
                .chain(self.foreign.iter())
                .map(Job::entry)
                .collect(),
        }
    }

    /// Advance the executor by one tick.
    fn tick(&mut self, ticks_per_job: u32) {
        if let Some((_, remaining)) = self.running.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.running = None;
            }
        }
        if self.running.is_none() {
            if let Some(job) = self.pending.pop_front() {
                self.running = Some((job, ticks_per_job));
            }
        }
    }
}

#[async_trait]
impl PromptBackend for MockComfy {
    async fn submit_prompt(
        &self,
        prompt: &Value,
        client_id: &ClientId,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let mut inner = self.inner.lock().unwrap();

        if inner
            .fail_after
            .is_some_and(|limit| inner.submissions.len() >= limit)
        {
            return Err(ComfyUIApiError::ApiError {
                status: 500,
                body: "mock rejected prompt".into(),
            });
        }

        let mine = inner.snapshot().for_client(client_id);
        inner.submissions.push(Submission {
            prompt: prompt.clone(),
            client_id: client_id.to_string(),
            pending_before: mine.pending,
            running_before: mine.running,
        });

        inner.next_number += 1;
        let number = inner.next_number;
        let job = Job {
            number,
            prompt_id: format!("prompt-{number}"),
            client_id: client_id.to_string(),
        };
        inner.pending.push_back(job.clone());

        Ok(SubmitResponse {
            prompt_id: job.prompt_id,
            number,
            node_errors: Value::Null,
        })
    }

    async fn queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        let mut inner = self.inner.lock().unwrap();
        inner.polls += 1;

        if inner.failing_polls > 0 {
            inner.failing_polls -= 1;
            return Err(ComfyUIApiError::ApiError {
                status: 500,
                body: "mock queue unavailable".into(),
            });
        }

        inner.tick(self.ticks_per_job);
        Ok(inner.snapshot())
    }
}

/// Write `<name>.json` holding a workflow tagged with its own name.
pub fn write_workflow(dir: &Path, name: &str) {
    let workflow = serde_json::json!({
        "3": {
            "class_type": "KSampler",
            "inputs": { "seed": "$RANDOM", "steps": 4 }
        },
        "9": {
            "class_type": "SaveImage",
            "inputs": { "filename_prefix": format!("{name}_$RANDOM") }
        }
    });
    std::fs::write(
        dir.join(format!("{name}.json")),
        serde_json::to_string_pretty(&workflow).unwrap(),
    )
    .unwrap();
}

/// Template name a submitted prompt was expanded from.
pub fn template_of(prompt: &Value) -> String {
    let prefix = prompt["9"]["inputs"]["filename_prefix"].as_str().unwrap();
    let (name, _) = prefix.rsplit_once('_').unwrap();
    name.to_string()
}

/// A controller over `mock` with workflows `names` in a temp directory.
pub fn controller_with(
    mock: &Arc<MockComfy>,
    names: &[&str],
) -> (Arc<LoopController>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    for name in names {
        write_workflow(dir.path(), name);
    }

    let backend: Arc<dyn PromptBackend> = mock.clone();
    let controller = LoopController::new(
        backend,
        TemplateStore::new(dir.path()),
        ClientId::generate(),
        TEST_POLL_INTERVAL,
    );
    (Arc::new(controller), dir)
}

/// Poll `condition` until it holds, panicking after [`TEST_TIMEOUT`].
pub async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let result = tokio::time::timeout(TEST_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

/// Await `fut`, panicking after [`TEST_TIMEOUT`].
pub async fn within<T>(what: &str, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(TEST_TIMEOUT, fut)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

/// Wait until the controller reports `state`.
pub async fn wait_for_state(controller: &LoopController, state: LoopState) {
    let mut rx = controller.subscribe_state();
    within("loop state", rx.wait_for(|s| *s == state))
        .await
        .expect("state channel closed");
}
