//! # Concurrent Slot Dispatcher
//!
//! Runs a manifest's slots on a bounded pool of tokio worker tasks that pull
//! from one shared queue. Each worker owns a slot end to end: acquire the
//! session, submit, poll to a terminal state, resolve produced alphas and
//! append the slot's fingerprints to the checkpoint.
//!
//! ## Failure isolation
//!
//! - A rejected submission, a remote ERROR or exhausted polling retries mark
//!   only that slot failed; its fingerprints are never checkpointed.
//! - Only fatal session errors stop the pool: workers stop taking new slots
//!   and the error is returned to the caller.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::api::SharedApi;
use crate::checkpoint::CheckpointStore;
use crate::config::{BatchConfig, PollPolicy};
use crate::errors::{AlphaBatchError, Result};
use crate::model::AlphaResult;
use crate::packer::Slot;
use crate::poller::{fetch_until_ready, poll_job, JobOutcome};
use crate::session::SessionManager;

/// Result of running one slot.
#[derive(Debug, Clone)]
pub struct SlotOutcome {
    pub slot_index: usize,
    pub size: usize,
    pub results: Vec<AlphaResult>,
    /// Why the slot failed, `None` on success.
    pub error: Option<String>,
    /// Whether the slot's fingerprints reached the checkpoint file.
    pub checkpointed: bool,
}

impl SlotOutcome {
    fn failed(slot: &Slot, reason: impl Into<String>) -> Self {
        Self::failed_at(slot.index, slot.len(), reason)
    }

    fn failed_at(slot_index: usize, size: usize, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!("Slot {} ({} alphas) failed: {}", slot_index, size, reason);
        Self {
            slot_index,
            size,
            results: Vec::new(),
            error: Some(reason),
            checkpointed: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate of every slot outcome of one dispatch.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<SlotOutcome>,
}

impl DispatchReport {
    pub fn successful_alphas(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.succeeded())
            .map(|outcome| outcome.size)
            .sum()
    }

    pub fn failed_alphas(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.succeeded())
            .map(|outcome| outcome.size)
            .sum()
    }

    pub fn results(&self) -> Vec<AlphaResult> {
        self.outcomes
            .iter()
            .flat_map(|outcome| outcome.results.iter().cloned())
            .collect()
    }

    pub fn produced_ids(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .flat_map(|outcome| outcome.results.iter().map(|result| result.id.clone()))
            .collect()
    }
}

/// Everything a worker needs to run a slot; cheap to clone into tasks.
#[derive(Clone)]
struct SlotRunner {
    session: Arc<SessionManager>,
    checkpoint: Arc<CheckpointStore>,
    poll: PollPolicy,
    alpha_tags: Vec<String>,
}

impl SlotRunner {
    /// Run one slot. Only fatal session errors are returned as `Err`.
    async fn run(&self, slot: Slot) -> Result<SlotOutcome> {
        let api = self.session.acquire().await?;

        let documents: Vec<Value> = slot
            .entries
            .iter()
            .map(|entry| entry.request.to_document())
            .collect();
        let body = if slot.is_multi() {
            Value::Array(documents)
        } else {
            documents.into_iter().next().unwrap_or(Value::Null)
        };

        let response = match api.post("/simulations", &body).await {
            Ok(response) => response,
            Err(e) => return Ok(SlotOutcome::failed(&slot, format!("submission failed: {}", e))),
        };
        if !response.is_success() {
            return Ok(SlotOutcome::failed(
                &slot,
                format!("submission rejected with status {}: {}", response.status, response.body),
            ));
        }
        let location = match response.location {
            Some(location) => location,
            None => return Ok(SlotOutcome::failed(&slot, "submission returned no job location")),
        };

        let terminal = match poll_job(api.as_ref(), &location, &self.poll).await {
            JobOutcome::Complete(body) => body,
            JobOutcome::Failed { reason, body } => {
                if slot.is_multi() {
                    self.log_failed_children(&api, &body).await;
                }
                return Ok(SlotOutcome::failed(&slot, reason));
            }
        };

        let alpha_ids = if slot.is_multi() {
            match self.resolve_children(&slot, &terminal).await? {
                Ok(ids) => ids,
                Err(reason) => return Ok(SlotOutcome::failed(&slot, reason)),
            }
        } else {
            match terminal.get("alpha").and_then(Value::as_str) {
                Some(id) => vec![id.to_string()],
                None => {
                    return Ok(SlotOutcome::failed(
                        &slot,
                        format!("completed simulation carries no alpha id: {}", terminal),
                    ))
                }
            }
        };

        let api = self.session.acquire().await?;
        let mut results = Vec::with_capacity(alpha_ids.len());
        for (entry, alpha_id) in slot.entries.iter().zip(alpha_ids.iter()) {
            let document = match fetch_until_ready(api.as_ref(), &format!("/alphas/{}", alpha_id)).await {
                Ok(response) if response.is_success() => response.body,
                Ok(response) => {
                    return Ok(SlotOutcome::failed(
                        &slot,
                        format!("alpha {} lookup returned status {}", alpha_id, response.status),
                    ))
                }
                Err(e) => {
                    return Ok(SlotOutcome::failed(&slot, format!("alpha {} lookup failed: {}", alpha_id, e)))
                }
            };
            results.push(AlphaResult::from_document(&entry.request, alpha_id, &document));
        }

        if !self.alpha_tags.is_empty() {
            for result in &results {
                self.tag_alpha(&api, &result.id).await;
            }
        }

        let checkpointed = match self.checkpoint.append(&slot.fingerprints()) {
            Ok(()) => true,
            Err(e) => {
                error!("Slot {} completed but was not checkpointed: {}", slot.index, e);
                false
            }
        };

        info!(
            "Slot {} complete: {} alphas ({})",
            slot.index,
            results.len(),
            alpha_ids.join(", ")
        );
        Ok(SlotOutcome {
            slot_index: slot.index,
            size: slot.len(),
            results,
            error: None,
            checkpointed,
        })
    }

    /// Poll every child of a completed multi-job and collect their alpha ids in order.
    ///
    /// The outer `Result` carries fatal session errors, the inner one a slot failure.
    async fn resolve_children(
        &self,
        slot: &Slot,
        terminal: &Value,
    ) -> Result<std::result::Result<Vec<String>, String>> {
        let children: Vec<String> = terminal
            .get("children")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if children.len() != slot.len() {
            return Ok(Err(format!(
                "multi-simulation returned {} children for {} alphas",
                children.len(),
                slot.len()
            )));
        }

        let mut ids = Vec::with_capacity(children.len());
        for child in &children {
            let api = self.session.acquire().await?;
            let location = child_location(child);
            match poll_job(api.as_ref(), &location, &self.poll).await {
                JobOutcome::Complete(body) => match body.get("alpha").and_then(Value::as_str) {
                    Some(id) => ids.push(id.to_string()),
                    None => return Ok(Err(format!("child simulation {} carries no alpha id", child))),
                },
                JobOutcome::Failed { reason, .. } => {
                    return Ok(Err(format!("child simulation {} failed: {}", child, reason)))
                }
            }
        }
        Ok(Ok(ids))
    }

    async fn log_failed_children(&self, api: &SharedApi, body: &Value) {
        let Some(children) = body.get("children").and_then(Value::as_array) else {
            return;
        };
        for child in children.iter().filter_map(Value::as_str) {
            match api.get(&child_location(child)).await {
                Ok(response) => error!("Child simulation {} failed: {}", child, response.body),
                Err(e) => error!("Child simulation {} failed and could not be inspected: {}", child, e),
            }
        }
    }

    async fn tag_alpha(&self, api: &SharedApi, alpha_id: &str) {
        let properties = json!({
            "color": Value::Null,
            "name": Value::Null,
            "tags": self.alpha_tags,
            "category": Value::Null,
            "regular": {"description": Value::Null},
            "combo": {"description": "None"},
            "selection": {"description": "None"},
        });
        match api.patch(&format!("/alphas/{}", alpha_id), &properties).await {
            Ok(response) if response.is_success() => {}
            Ok(response) => warn!("Tagging alpha {} returned status {}", alpha_id, response.status),
            Err(e) => warn!("Tagging alpha {} failed: {}", alpha_id, e),
        }
    }
}

/// Child ids are bare ids or already-absolute locations.
fn child_location(child: &str) -> String {
    if child.starts_with("http://") || child.starts_with("https://") || child.starts_with('/') {
        child.to_string()
    } else {
        format!("/simulations/{}", child)
    }
}

/// Bounded-parallelism slot engine.
pub struct Dispatcher {
    runner: SlotRunner,
    concurrency: usize,
}

impl Dispatcher {
    /// `config` is expected to have been through [`BatchConfig::validated`].
    pub fn new(
        session: Arc<SessionManager>,
        checkpoint: Arc<CheckpointStore>,
        config: &BatchConfig,
    ) -> Self {
        Self {
            runner: SlotRunner {
                session,
                checkpoint,
                poll: config.poll.clone(),
                alpha_tags: config.alpha_tags.clone(),
            },
            concurrency: config.concurrency,
        }
    }

    /// Run every slot; returns once the queue is drained or a fatal error stopped the pool.
    pub async fn run(&self, slots: Vec<Slot>) -> Result<DispatchReport> {
        if slots.is_empty() {
            return Ok(DispatchReport::default());
        }
        let workers = self.concurrency.max(1).min(slots.len());
        info!("Dispatching {} slots on {} workers", slots.len(), workers);

        let queue = Arc::new(Mutex::new(slots.into_iter().collect::<VecDeque<Slot>>()));
        let halted = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let queue = queue.clone();
            let halted = halted.clone();
            let runner = self.runner.clone();
            handles.push(tokio::spawn(async move {
                let mut outcomes = Vec::new();
                loop {
                    if halted.load(Ordering::SeqCst) {
                        break;
                    }
                    let next = match queue.lock() {
                        Ok(mut pending) => pending.pop_front(),
                        Err(_) => {
                            return Err(AlphaBatchError::Worker("slot queue lock poisoned".to_string()))
                        }
                    };
                    let Some(slot) = next else {
                        break;
                    };
                    let (index, size) = (slot.index, slot.len());
                    let slot_runner = runner.clone();
                    let result = match tokio::spawn(async move { slot_runner.run(slot).await }).await {
                        Ok(result) => result,
                        Err(e) => Ok(SlotOutcome::failed_at(index, size, format!("slot task aborted: {}", e))),
                    };
                    match result {
                        Ok(outcome) => outcomes.push(outcome),
                        Err(e) => {
                            error!("Worker {} stopping batch: {}", worker_id, e);
                            halted.store(true, Ordering::SeqCst);
                            return Err(e);
                        }
                    }
                }
                Ok(outcomes)
            }));
        }

        let mut report = DispatchReport::default();
        let mut fatal: Option<AlphaBatchError> = None;
        for (worker_id, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(Ok(outcomes)) => report.outcomes.extend(outcomes),
                Ok(Err(e)) => {
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Err(e) => error!("Worker {} ended abnormally: {}", worker_id, e),
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        report.outcomes.sort_by_key(|outcome| outcome.slot_index);
        Ok(report)
    }
}
