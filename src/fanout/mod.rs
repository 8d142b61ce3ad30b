//! Concurrent fan-out of one operation to many actors.
//!
//! Every addressed actor gets its own task. Outcomes are settled
//! independently: an actor failure, a transport error, a timeout or a panic
//! only ever fills that actor's slot in the report.

pub mod directory;

pub use directory::{ActorDirectory, ActorPath, RemoteActorDirectory};

use crate::core::{CHUNK_ID_SPACE, ReproError, Result};
use crate::protocol::{ActorEnvelope, FailureEnvelope, Operation, decode_envelope};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const MAX_FAN_OUT: usize = 30;
pub const SINGLETON_ACTOR: &str = "singleton";

/// Deterministic actor names `feed-2021-07-01 ..= feed-2021-07-{n}`.
pub fn actor_names(n: usize) -> Vec<String> {
    (1..=n).map(|day| format!("feed-2021-07-{:02}", day)).collect()
}

pub fn validate_width(n: usize) -> Result<usize> {
    if (1..=MAX_FAN_OUT).contains(&n) {
        Ok(n)
    } else {
        Err(ReproError::InvalidFanOutWidth(n, MAX_FAN_OUT))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanOutSummary {
    pub num_objects: usize,
    pub actual_chunks: u64,
    pub expected_chunks: u64,
    pub data_loaded_percentage: f64,
    pub failures: usize,
    pub process_instances: BTreeMap<String, usize>,
    pub load_times: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanOutReport {
    pub summary: FanOutSummary,
    pub responses: BTreeMap<String, ActorEnvelope>,
}

/// Derive the summary. Only successful envelopes contribute counts.
pub fn summarize(responses: &BTreeMap<String, ActorEnvelope>) -> FanOutSummary {
    let num_objects = responses.len();
    let expected_chunks = u64::from(CHUNK_ID_SPACE) * num_objects as u64;
    let mut actual_chunks = 0u64;
    let mut failures = 0usize;
    let mut process_instances: BTreeMap<String, usize> = BTreeMap::new();
    let mut load_times = Vec::new();

    for (name, envelope) in responses {
        match envelope {
            ActorEnvelope::Success(success) => {
                actual_chunks += success.memory_chunks;
                *process_instances
                    .entry(success.process_id.clone())
                    .or_default() += 1;
                if success.ensure_loaded_millis > 0 {
                    load_times.push(format!(
                        "{} load took {}ms",
                        name, success.ensure_loaded_millis
                    ));
                }
            }
            ActorEnvelope::Failure(_) => failures += 1,
        }
    }

    let data_loaded_percentage = if expected_chunks == 0 {
        0.0
    } else {
        actual_chunks as f64 / expected_chunks as f64 * 100.0
    };

    FanOutSummary {
        num_objects,
        actual_chunks,
        expected_chunks,
        data_loaded_percentage,
        failures,
        process_instances,
        load_times,
    }
}

/// Drives actors through an [`ActorDirectory`].
pub struct FanOut {
    directory: Arc<dyn ActorDirectory>,
    call_timeout: Option<Duration>,
}

impl FanOut {
    pub fn new(directory: Arc<dyn ActorDirectory>) -> Self {
        Self {
            directory,
            call_timeout: None,
        }
    }

    /// Bound each inner call. Without it a hung actor keeps the fan-out pending.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn directory(&self) -> &Arc<dyn ActorDirectory> {
        &self.directory
    }

    /// Send `operation` to `n` actors concurrently and wait for all of them.
    pub async fn run(&self, operation: Operation, n: usize) -> Result<FanOutReport> {
        let n = validate_width(n)?;
        let names = actor_names(n);
        let started = Instant::now();

        let tasks = names.iter().map(|name| {
            let directory = self.directory.clone();
            let name = name.clone();
            let timeout = self.call_timeout;
            tokio::spawn(async move { dispatch(directory.as_ref(), &name, operation, timeout).await })
        });
        let settled = join_all(tasks).await;

        let responses: BTreeMap<String, ActorEnvelope> = names
            .into_iter()
            .zip(settled)
            .map(|(name, outcome)| {
                let envelope = outcome.unwrap_or_else(|join_err| {
                    warn!(actor = %name, error = %join_err, "actor call task aborted");
                    FailureEnvelope::client(format!("actor call task failed: {}", join_err)).into()
                });
                (name, envelope)
            })
            .collect();

        let summary = summarize(&responses);
        info!(
            operation = %operation,
            n,
            actual_chunks = summary.actual_chunks,
            failures = summary.failures,
            percentage = summary.data_loaded_percentage,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fan-out settled"
        );
        Ok(FanOutReport { summary, responses })
    }

    /// One call to one actor with the same failure handling as [`run`](Self::run).
    pub async fn call_one(&self, name: &str, operation: Operation) -> ActorEnvelope {
        dispatch(self.directory.as_ref(), name, operation, self.call_timeout).await
    }
}

async fn dispatch(
    directory: &dyn ActorDirectory,
    name: &str,
    operation: Operation,
    timeout: Option<Duration>,
) -> ActorEnvelope {
    let (path, body) = match operation.request() {
        Some(request) => (ActorPath::Root, request.to_body()),
        None => (ActorPath::Hang, String::new()),
    };
    let call = directory.fetch(name, path, body);
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ReproError::Timeout(limit.as_millis() as u64)),
        },
        None => call.await,
    };

    match outcome.and_then(|body| decode_envelope(&body)) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(actor = name, operation = %operation, error = %err, "client-side failure");
            FailureEnvelope::client(err).into()
        }
    }
}
