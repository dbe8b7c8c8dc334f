//! Task manifest schema and manifest/claims reconciliation.
//!
//! The same schema travels two ways: as an on-disk manifest (untrusted until
//! reconciled) and as the payload of the signed token (trusted once the
//! signature verifies). [`UnverifiedManifest::reconcile`] is the only way to
//! turn the former into claims the rest of the pipeline accepts.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Task identity and origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    /// Task identifier. Attacker-influenced; sanitized before use in commands.
    pub task_id: String,
    /// Tenant that owns the task.
    pub tenant_id: String,
    /// Operator who issued the task.
    #[serde(default)]
    pub operator_id: String,
    /// Originating system.
    #[serde(default)]
    pub source: String,
    /// Requested action.
    #[serde(default)]
    pub action: String,
}

/// Claim set carried by a task manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskClaims {
    /// Task identity and origin.
    pub task_context: TaskContext,
    /// URN-like identifier of the target.
    pub target_urn: String,
    /// Requested tool content digest, e.g. `sha256:<hex>`.
    pub tool_sha256: String,
    /// Replay-resistance nonce.
    #[serde(default)]
    pub nonce: String,
    /// Opaque tool parameters. Never forwarded into the sandbox command.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// Issuance timestamp as supplied by the issuer.
    #[serde(default)]
    pub issued_at: String,
    /// Manifest schema version.
    #[serde(default)]
    pub manifest_version: String,
}

impl TaskClaims {
    /// Task identifier.
    pub fn task_id(&self) -> &str {
        &self.task_context.task_id
    }

    /// Tenant identifier.
    pub fn tenant_id(&self) -> &str {
        &self.task_context.tenant_id
    }
}

/// Manifest field that disagreed with the verified token claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("manifest field `{field}` does not match the signed token")]
pub struct ManifestMismatch {
    /// Name of the first mismatching field.
    pub field: &'static str,
}

/// A manifest read from outside the trust boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct UnverifiedManifest {
    claims: TaskClaims,
}

impl UnverifiedManifest {
    /// Wrap already decoded manifest claims.
    pub fn new(claims: TaskClaims) -> Self {
        Self { claims }
    }

    /// Decode a manifest from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid manifest document.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw).map(Self::new)
    }

    /// Unverified view of the manifest contents, for logging and signing.
    pub fn claims(&self) -> &TaskClaims {
        &self.claims
    }

    /// Cross-check this manifest against claims from a verified token.
    ///
    /// Task id, tenant id, and tool digest must agree exactly. On success the
    /// verified claims are returned; the manifest itself is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestMismatch`] naming the first field that disagrees.
    pub fn reconcile(self, verified: TaskClaims) -> Result<TaskClaims, ManifestMismatch> {
        let checks = [
            ("task_id", self.claims.task_id(), verified.task_id()),
            ("tenant_id", self.claims.tenant_id(), verified.tenant_id()),
            (
                "tool_sha256",
                self.claims.tool_sha256.as_str(),
                verified.tool_sha256.as_str(),
            ),
        ];
        for (field, manifest, token) in checks {
            if manifest != token {
                return Err(ManifestMismatch { field });
            }
        }
        Ok(verified)
    }
}

/// Load an unverified manifest from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_manifest(path: &Path) -> anyhow::Result<UnverifiedManifest> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read manifest at {}: {e}", path.display()))?;
    UnverifiedManifest::from_json(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse manifest at {}: {e}", path.display()))
}
