//! Versioned request/response contract between callers and actors.
//!
//! Actors always answer with an [`ActorEnvelope`]; failures travel in-band
//! (`success: false`) so every response body can be parsed the same way.

use crate::core::{ReproError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const PROTOCOL_VERSION: u32 = 1;

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ActorRequest {
    Put,
    Query,
    Clear,
}

impl ActorRequest {
    pub fn to_body(self) -> String {
        match self {
            Self::Put => r#"{"kind":"put"}"#,
            Self::Query => r#"{"kind":"query"}"#,
            Self::Clear => r#"{"kind":"clear"}"#,
        }
        .to_string()
    }
}

/// Operation names accepted at the public routing boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Put,
    Query,
    Clear,
    Hang,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Put => "put",
            Self::Query => "query",
            Self::Clear => "clear",
            Self::Hang => "hang",
        }
    }

    /// The actor request this operation sends, or `None` for `hang`, which
    /// bypasses the envelope protocol.
    pub fn request(self) -> Option<ActorRequest> {
        match self {
            Self::Put => Some(ActorRequest::Put),
            Self::Query => Some(ActorRequest::Query),
            Self::Clear => Some(ActorRequest::Clear),
            Self::Hang => None,
        }
    }
}

impl FromStr for Operation {
    type Err = ReproError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "put" => Ok(Self::Put),
            "query" => Ok(Self::Query),
            "clear" => Ok(Self::Clear),
            "hang" => Ok(Self::Hang),
            other => Err(ReproError::UnsupportedOperation(other.to_string())),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutResult {
    pub insert_count: u64,
    pub update_count: u64,
    pub attributes_update_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub counts: Vec<BTreeMap<String, u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<BTreeMap<String, Vec<String>>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearResult {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ActorResult {
    Put(PutResult),
    Query(QueryResult),
    Clear(ClearResult),
}

// ============================================================================
// Envelopes
// ============================================================================

/// Which side of the actor boundary a failure originated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Reported by the actor itself.
    Do,
    /// Synthesized by the caller (transport, decoding, timeout, panic).
    Client,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessEnvelope {
    pub success: bool,
    pub version: u32,
    pub ensure_loaded_millis: u64,
    pub process_id: String,
    pub instance_id: String,
    pub loaded_chunks: u64,
    pub loaded_records: u64,
    pub loaded_size: u64,
    pub loaded_list_calls: u64,
    pub memory_chunks: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated_bytes: Option<u64>,
    pub result: ActorResult,
}

/// Failure envelope. Diagnostics captured before the failure are kept,
/// anything not reached is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensure_loaded_millis: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded_chunks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded_records: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded_list_calls: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_chunks: Option<u64>,
    pub error: String,
    pub side: Side,
}

impl FailureEnvelope {
    /// Failure synthesized by a caller that never got a usable actor reply.
    pub fn client(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            version: None,
            ensure_loaded_millis: None,
            process_id: None,
            instance_id: None,
            loaded_chunks: None,
            loaded_records: None,
            loaded_size: None,
            loaded_list_calls: None,
            memory_chunks: None,
            error: error.to_string(),
            side: Side::Client,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActorEnvelope {
    Success(SuccessEnvelope),
    Failure(FailureEnvelope),
}

impl ActorEnvelope {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn as_success(&self) -> Option<&SuccessEnvelope> {
        match self {
            Self::Success(success) => Some(success),
            Self::Failure(_) => None,
        }
    }

    pub fn as_failure(&self) -> Option<&FailureEnvelope> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(failure),
        }
    }

    pub fn side(&self) -> Option<Side> {
        self.as_failure().map(|failure| failure.side)
    }
}

impl From<SuccessEnvelope> for ActorEnvelope {
    fn from(value: SuccessEnvelope) -> Self {
        Self::Success(value)
    }
}

impl From<FailureEnvelope> for ActorEnvelope {
    fn from(value: FailureEnvelope) -> Self {
        Self::Failure(value)
    }
}

/// Pretty-printed JSON body, as actors emit it.
pub fn encode_envelope(envelope: &ActorEnvelope) -> Result<String> {
    Ok(serde_json::to_string_pretty(envelope)?)
}

/// Parses an actor response body. Any body that is not a well-formed
/// envelope is an error for the caller to report.
pub fn decode_envelope(body: &str) -> Result<ActorEnvelope> {
    let envelope: ActorEnvelope = serde_json::from_str(body).map_err(|e| {
        ReproError::Protocol(format!("malformed actor response body: {}", e))
    })?;
    let consistent = match &envelope {
        ActorEnvelope::Success(success) => success.success,
        ActorEnvelope::Failure(failure) => !failure.success,
    };
    if !consistent {
        return Err(ReproError::Protocol(
            "actor response 'success' flag contradicts its payload".to_string(),
        ));
    }
    Ok(envelope)
}
