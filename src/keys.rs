//! Verification key material.
//!
//! The HS256 secret is read from the process environment, falling back to
//! the runner's private `.env` file (`~/.tollgate/.env`, mode 0600). The
//! EdDSA public key is read from the PEM file named in config.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::config::{config_dir, VerifierConfig};
use crate::token::{Algorithm, EdDsaVerifier, Hs256Verifier, Verifier};

/// Secrets loaded from the runner's `.env` file.
#[derive(Clone, Default)]
pub struct Secrets {
    vars: BTreeMap<String, String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

impl Secrets {
    /// Build secrets from a key-value map.
    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Look up `key`, preferring the process environment over the file.
    pub fn lookup(&self, key: &str, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        env(key)
            .filter(|value| !value.is_empty())
            .or_else(|| self.vars.get(key).cloned())
    }
}

/// Default secrets file location (`~/.tollgate/.env`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_secrets_path() -> anyhow::Result<PathBuf> {
    Ok(config_dir()?.join(".env"))
}

/// Load secrets from a `.env` file. A missing file yields no secrets.
///
/// # Errors
///
/// Returns an error if the file permissions are too broad or parsing fails.
pub fn load_secrets(path: &Path) -> anyhow::Result<Secrets> {
    if !path.exists() {
        debug!(path = %path.display(), "no secrets file found");
        return Ok(Secrets::default());
    }

    validate_private_permissions(path)?;

    let mut vars = BTreeMap::new();
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("failed to read secrets at {}", path.display()))?;

    for item in iter {
        let (key, value) = item.with_context(|| {
            format!(
                "failed to parse key-value entry in secrets file {}",
                path.display()
            )
        })?;
        vars.insert(key, value);
    }

    Ok(Secrets { vars })
}

/// HS256 shared secret for this deployment, if any is configured.
pub fn hmac_secret(
    config: &VerifierConfig,
    secrets: &Secrets,
    env: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    secrets.lookup(&config.hmac_secret_env, env)
}

/// Build the one verifier this deployment is pinned to.
///
/// Absent key material is not an error here; the verifier rejects every
/// token with `MissingKeyMaterial` instead.
///
/// # Errors
///
/// Returns an error if the configured public key file cannot be read.
pub fn build_verifier(
    config: &VerifierConfig,
    secrets: &Secrets,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Box<dyn Verifier>> {
    match config.algorithm {
        Algorithm::Hs256 => {
            let secret = hmac_secret(config, secrets, env).unwrap_or_default();
            Ok(Box::new(Hs256Verifier::new(secret)))
        }
        Algorithm::EdDsa => {
            let pem = match &config.public_key_path {
                Some(path) => fs::read_to_string(path)
                    .with_context(|| format!("failed to read public key at {}", path.display()))?,
                None => String::new(),
            };
            Ok(Box::new(EdDsaVerifier::from_public_key_pem(&pem)))
        }
    }
}

#[cfg(unix)]
fn validate_private_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to inspect secrets file {}", path.display()))?;
    let mode = metadata.permissions().mode() & 0o777;

    if mode & 0o077 != 0 {
        return Err(anyhow::anyhow!(
            "secrets file {} must be 0600, found {:o}",
            path.display(),
            mode
        ));
    }

    Ok(())
}

#[cfg(not(unix))]
fn validate_private_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}
