//! Registry of digest-pinned tools and authorization lookup.
//!
//! Registry snapshots are loaded once per invocation and never mutated. A
//! tool is runnable only when its content digest matches exactly and the
//! record is explicitly marked authorized.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// One registry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Human-readable tool name.
    #[serde(default)]
    pub tool_name: String,
    /// Image reference launched inside the sandbox.
    #[serde(default)]
    pub image_ref: String,
    /// Tool content digest, the trust anchor.
    pub tool_sha256: String,
    /// SBOM document format.
    #[serde(default)]
    pub sbom_format: String,
    /// SBOM document digest.
    #[serde(default)]
    pub sbom_digest: String,
    /// Vulnerability counts keyed by severity.
    #[serde(default)]
    pub vulnerability_summary: BTreeMap<String, u64>,
    /// Signatures keyed by signer or algorithm.
    #[serde(default)]
    pub signature_bundle: BTreeMap<String, String>,
    /// Explicit authorization flag. Absent means unauthorized.
    #[serde(default)]
    pub authorized: bool,
}

/// Authorization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthorizationError {
    /// No authorized entry carries the requested digest. Unknown and
    /// known-but-unauthorized digests are reported identically.
    #[error("authorized digest not found")]
    AuthorizedDigestNotFound,
}

/// Find the first entry, in registry order, whose digest equals
/// `requested_digest` exactly and which is authorized.
///
/// # Errors
///
/// Returns [`AuthorizationError::AuthorizedDigestNotFound`] when no such
/// entry exists.
pub fn resolve<'a>(
    registry: &'a [RegistryEntry],
    requested_digest: &str,
) -> Result<&'a RegistryEntry, AuthorizationError> {
    let mut rejected = 0usize;
    for entry in registry {
        if entry.tool_sha256 != requested_digest {
            continue;
        }
        if entry.authorized {
            return Ok(entry);
        }
        rejected = rejected.saturating_add(1);
    }

    if rejected > 0 {
        warn!(
            digest = requested_digest,
            unauthorized_matches = rejected,
            "digest present in registry but not authorized"
        );
    }
    Err(AuthorizationError::AuthorizedDigestNotFound)
}

/// Load a registry snapshot from a JSON array file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a registry array.
pub fn load_registry(path: &Path) -> anyhow::Result<Vec<RegistryEntry>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read registry at {}: {e}", path.display()))?;
    let entries: Vec<RegistryEntry> = serde_json::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse registry at {}: {e}", path.display()))?;
    Ok(entries)
}
