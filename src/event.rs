//! Audit event mapping.
//!
//! Each successful invocation produces exactly one CloudEvents-shaped
//! [`AuditEvent`]. The event carries the raw signed token so downstream
//! auditors can re-verify the task independently of this runner.

use chrono::{DateTime, SecondsFormat, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::executor::ExecutionOutcome;
use crate::manifest::TaskClaims;
use crate::sandbox::{CommandSpec, SandboxBackend};

/// CloudEvents spec version.
pub const SPEC_VERSION: &str = "1.0";

/// Fixed source URN naming this runner.
pub const EVENT_SOURCE: &str = "urn:tollgate:runner";

/// Fixed event type for execution results.
pub const EVENT_TYPE: &str = "io.tollgate.runner.execution.v1";

/// Bytes of randomness in an event id.
const EVENT_ID_BYTES: usize = 16;

/// Source of random bytes for event identifiers.
pub trait EntropySource: Send + Sync {
    /// Fill `buf` entirely with random bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::EntropyUnavailable`] when the source cannot
    /// produce bytes.
    fn fill(&self, buf: &mut [u8]) -> Result<(), EventError>;
}

/// Operating system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<(), EventError> {
        rand::rngs::OsRng
            .try_fill_bytes(buf)
            .map_err(|_| EventError::EntropyUnavailable)
    }
}

/// Event mapping failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// No randomness for the event id. No event is emitted.
    #[error("entropy source unavailable")]
    EntropyUnavailable,
}

impl EventError {
    /// Stable snake_case tag for machine-readable reporting.
    pub fn kind(self) -> &'static str {
        match self {
            Self::EntropyUnavailable => "entropy_unavailable",
        }
    }
}

/// Derived run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Tool exited with code 0.
    Success,
    /// Tool exited with any other code.
    Failed,
}

impl RunStatus {
    /// Status for an exit code. Zero is the only success.
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            Self::Success
        } else {
            Self::Failed
        }
    }
}

/// Event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    /// Task identifier from the verified claims.
    pub task_id: String,
    /// Tenant identifier from the verified claims.
    pub tenant_id: String,
    /// Tool digest from the verified claims.
    pub tool_sha256: String,
    /// Target identifier from the verified claims.
    pub target_urn: String,
    /// Derived status.
    pub status: RunStatus,
    /// Tool exit code.
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Original compact token, for independent re-verification.
    pub manifest_jws: String,
    /// SHA-256 over the task identity and the exact launched command.
    pub measurement_hash: String,
}

/// CloudEvents-shaped audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// CloudEvents spec version.
    pub specversion: String,
    /// 32 lowercase hex characters.
    pub id: String,
    /// Runner source URN.
    pub source: String,
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Task identifier.
    pub subject: String,
    /// RFC 3339 UTC emission time, seconds resolution.
    pub time: String,
    /// Payload content type.
    pub datacontenttype: String,
    /// Execution result.
    pub data: EventData,
}

/// Deterministic launch measurement, lowercase hex.
///
/// Hashes compact JSON with sorted keys: `backend`, `execution_command`,
/// `operator_id`, `target_urn`, `task_id`, `tenant_id`, `tool_sha256`. An
/// auditor holding the verified claims and the argv can recompute it.
pub fn measurement_hash(
    claims: &TaskClaims,
    backend: SandboxBackend,
    command: &CommandSpec,
) -> String {
    // Keys are written in sorted order.
    let input = serde_json::json!({
        "backend": backend.as_str(),
        "execution_command": command.argv(),
        "operator_id": claims.task_context.operator_id,
        "target_urn": claims.target_urn,
        "task_id": claims.task_id(),
        "tenant_id": claims.tenant_id(),
        "tool_sha256": claims.tool_sha256,
    });
    hex::encode(Sha256::digest(input.to_string().as_bytes()))
}

/// Map a finished run to an audit event stamped with the current time.
///
/// # Errors
///
/// Returns [`EventError::EntropyUnavailable`] if no event id can be drawn.
pub fn map_to_event(
    claims: &TaskClaims,
    outcome: &ExecutionOutcome,
    raw_token: &str,
    measurement: &str,
    entropy: &dyn EntropySource,
) -> Result<AuditEvent, EventError> {
    map_to_event_at(claims, outcome, raw_token, measurement, entropy, Utc::now())
}

/// Map a finished run to an audit event stamped with `now`.
///
/// # Errors
///
/// Returns [`EventError::EntropyUnavailable`] if no event id can be drawn.
pub fn map_to_event_at(
    claims: &TaskClaims,
    outcome: &ExecutionOutcome,
    raw_token: &str,
    measurement: &str,
    entropy: &dyn EntropySource,
    now: DateTime<Utc>,
) -> Result<AuditEvent, EventError> {
    let mut id = [0u8; EVENT_ID_BYTES];
    entropy.fill(&mut id)?;

    Ok(AuditEvent {
        specversion: SPEC_VERSION.to_owned(),
        id: hex::encode(id),
        source: EVENT_SOURCE.to_owned(),
        event_type: EVENT_TYPE.to_owned(),
        subject: claims.task_id().to_owned(),
        time: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        datacontenttype: "application/json".to_owned(),
        data: EventData {
            task_id: claims.task_id().to_owned(),
            tenant_id: claims.tenant_id().to_owned(),
            tool_sha256: claims.tool_sha256.clone(),
            target_urn: claims.target_urn.clone(),
            status: RunStatus::from_exit_code(outcome.exit_code),
            exit_code: outcome.exit_code,
            stdout: outcome.stdout.clone(),
            stderr: outcome.stderr.clone(),
            manifest_jws: raw_token.to_owned(),
            measurement_hash: measurement.to_owned(),
        },
    })
}
