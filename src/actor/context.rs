use super::identity::diagnostic_id;
use super::mutation::{self, FillLimits};
use super::state::{ActorState, DEFAULT_PAGE_SIZE, LoadStats};
use crate::core::{ReproError, Result};
use crate::protocol::{
    ActorEnvelope, ActorRequest, ActorResult, FailureEnvelope, PROTOCOL_VERSION, Side,
    SuccessEnvelope,
};
use crate::storage::ChunkStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Tunables shared by every actor a host activates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorSettings {
    pub page_size: usize,
    pub fill: FillLimits,
}

impl Default for ActorSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            fill: FillLimits::default(),
        }
    }
}

/// Diagnostics captured while a request is handled, reported even if a
/// later step fails.
#[derive(Debug, Default)]
struct Captured {
    ensure_loaded_millis: Option<u64>,
    stats: Option<LoadStats>,
    memory_chunks: Option<u64>,
}

/// Everything one actor incarnation owns. Created on activation, dropped on
/// eviction; the first request after construction performs the load.
pub struct ActorContext {
    name: String,
    process_id: String,
    instance_id: String,
    store: Arc<dyn ChunkStore>,
    state: ActorState,
    fill_limits: FillLimits,
}

impl ActorContext {
    pub fn new(
        name: impl Into<String>,
        process_id: impl Into<String>,
        store: Arc<dyn ChunkStore>,
        settings: ActorSettings,
    ) -> Self {
        Self {
            name: name.into(),
            process_id: process_id.into(),
            instance_id: diagnostic_id(),
            store,
            state: ActorState::with_page_size(settings.page_size),
            fill_limits: settings.fill,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn state(&self) -> &ActorState {
        &self.state
    }

    /// Handle one request body. Never fails: errors become a `side: do`
    /// failure envelope carrying whatever was measured before the error.
    pub async fn handle(&mut self, body: &[u8]) -> ActorEnvelope {
        let mut captured = Captured::default();
        match self.compute_response(body, &mut captured).await {
            Ok(success) => success.into(),
            Err(err) => {
                warn!(actor = %self.name, error = %err, "actor request failed");
                self.failure(captured, err).into()
            }
        }
    }

    async fn compute_response(
        &mut self,
        body: &[u8],
        captured: &mut Captured,
    ) -> Result<SuccessEnvelope> {
        let started = Instant::now();
        self.state.ensure_loaded(self.store.as_ref()).await?;
        let ensure_loaded_millis = started.elapsed().as_millis() as u64;
        let stats = self.state.stats();
        captured.ensure_loaded_millis = Some(ensure_loaded_millis);
        captured.stats = Some(stats);

        let request: ActorRequest = serde_json::from_slice(body)
            .map_err(|e| ReproError::Protocol(format!("unsupported request: {}", e)))?;
        let result = self.dispatch(request).await?;
        let memory_chunks = self.state.len() as u64;
        captured.memory_chunks = Some(memory_chunks);

        Ok(SuccessEnvelope {
            success: true,
            version: PROTOCOL_VERSION,
            ensure_loaded_millis,
            process_id: self.process_id.clone(),
            instance_id: self.instance_id.clone(),
            loaded_chunks: stats.loaded_chunks,
            loaded_records: stats.loaded_records,
            loaded_size: stats.loaded_size,
            loaded_list_calls: stats.loaded_list_calls,
            memory_chunks,
            allocated_bytes: allocated_bytes(),
            result,
        })
    }

    async fn dispatch(&mut self, request: ActorRequest) -> Result<ActorResult> {
        let store = self.store.as_ref();
        Ok(match request {
            ActorRequest::Put => {
                ActorResult::Put(mutation::fill(&mut self.state, store, self.fill_limits).await?)
            }
            ActorRequest::Query => ActorResult::Query(mutation::aggregate_count(&self.state)),
            ActorRequest::Clear => ActorResult::Clear(mutation::reset(&mut self.state, store).await?),
        })
    }

    fn failure(&self, captured: Captured, err: ReproError) -> FailureEnvelope {
        FailureEnvelope {
            success: false,
            version: Some(PROTOCOL_VERSION),
            ensure_loaded_millis: captured.ensure_loaded_millis,
            process_id: Some(self.process_id.clone()),
            instance_id: Some(self.instance_id.clone()),
            loaded_chunks: captured.stats.map(|s| s.loaded_chunks),
            loaded_records: captured.stats.map(|s| s.loaded_records),
            loaded_size: captured.stats.map(|s| s.loaded_size),
            loaded_list_calls: captured.stats.map(|s| s.loaded_list_calls),
            memory_chunks: captured.memory_chunks,
            error: err.to_string(),
            side: Side::Do,
        }
    }
}

#[cfg(feature = "jemalloc")]
fn allocated_bytes() -> Option<u64> {
    jemalloc_ctl::epoch::advance().ok()?;
    jemalloc_ctl::stats::allocated::read()
        .ok()
        .map(|bytes| bytes as u64)
}

#[cfg(not(feature = "jemalloc"))]
fn allocated_bytes() -> Option<u64> {
    None
}
