//! Runner configuration loading and validation.
//!
//! Loads `config.toml` from `--config`, `$TOLLGATE_CONFIG_PATH`, or
//! `~/.tollgate/config.toml`. Environment variables override file values;
//! file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::sandbox::SandboxBackend;
use crate::token::Algorithm;

/// Top-level runner configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Token verification settings.
    pub verifier: VerifierConfig,
    /// Sandbox backend and hardening profile.
    pub sandbox: SandboxConfig,
    /// Process execution limits.
    pub executor: ExecutorConfig,
    /// Filesystem locations.
    pub paths: PathsConfig,
}

/// Token verification settings. Exactly one algorithm per deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Pinned token algorithm.
    pub algorithm: Algorithm,
    /// Environment variable holding the HS256 shared secret.
    pub hmac_secret_env: String,
    /// PEM public key file for EdDSA.
    pub public_key_path: Option<PathBuf>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Hs256,
            hmac_secret_env: "TOLLGATE_HMAC_SECRET".to_owned(),
            public_key_path: None,
        }
    }
}

/// Sandbox backend and hardening profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Builder strategy.
    pub backend: SandboxBackend,
    /// Docker CLI executable.
    pub docker_bin: String,
    /// Restricted container runtime.
    pub runtime: String,
    /// AppArmor profile name.
    pub apparmor_profile: String,
    /// Container memory limit in megabytes.
    pub memory_mb: u32,
    /// Container process limit.
    pub pids_limit: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::Simulate,
            docker_bin: "docker".to_owned(),
            runtime: "runsc".to_owned(),
            apparmor_profile: "tollgate-default".to_owned(),
            memory_mb: 512,
            pids_limit: 256,
        }
    }
}

/// Process execution limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Wall-clock deadline for one sandboxed run.
    pub timeout_secs: u64,
    /// Capture bound per output stream.
    pub max_output_bytes: usize,
}

impl ExecutorConfig {
    /// Deadline as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            max_output_bytes: 1_048_576,
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Registry snapshot. Defaults to `~/.tollgate/armory/registry.json`.
    pub registry: Option<PathBuf>,
    /// Directory for rotated JSON logs. Console-only logging when unset.
    pub logs_dir: Option<PathBuf>,
}

impl RunnerConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// An explicit path must exist. Without one, a missing default file
    /// yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed, or the
    /// resulting configuration is invalid.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Self::config_path_with(env)?;
                match std::fs::read_to_string(&path) {
                    Ok(contents) => {
                        tracing::debug!(path = %path.display(), "loading config from file");
                        Self::from_toml(&contents)
                            .with_context(|| format!("failed to parse {}", path.display()))?
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        tracing::debug!("no config file found, using defaults");
                        Self::default()
                    }
                    Err(e) => {
                        return Err(anyhow::anyhow!(
                            "failed to read config at {}: {e}",
                            path.display()
                        ))
                    }
                }
            }
        };
        config.apply_overrides(env);
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file only, no env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
        Self::from_toml(&contents)
            .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid configuration TOML.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        let config: RunnerConfig = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Resolve the config file path using a custom env resolver.
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> anyhow::Result<PathBuf> {
        if let Some(p) = env("TOLLGATE_CONFIG_PATH") {
            return Ok(PathBuf::from(p));
        }
        Ok(config_dir()?.join("config.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests never mutate process env.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("TOLLGATE_ALGORITHM") {
            match v.parse() {
                Ok(alg) => self.verifier.algorithm = alg,
                Err(_) => tracing::warn!(
                    var = "TOLLGATE_ALGORITHM",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("TOLLGATE_PUBLIC_KEY_PATH") {
            self.verifier.public_key_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env("TOLLGATE_SANDBOX_BACKEND") {
            match v.parse() {
                Ok(backend) => self.sandbox.backend = backend,
                Err(_) => tracing::warn!(
                    var = "TOLLGATE_SANDBOX_BACKEND",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("TOLLGATE_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.executor.timeout_secs = n,
                Err(_) => tracing::warn!(
                    var = "TOLLGATE_TIMEOUT_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("TOLLGATE_REGISTRY") {
            self.paths.registry = Some(PathBuf::from(v));
        }
    }

    /// Reject settings the runner cannot honour.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.executor.timeout_secs == 0 {
            anyhow::bail!("executor.timeout_secs must be greater than zero");
        }
        if self.executor.max_output_bytes == 0 {
            anyhow::bail!("executor.max_output_bytes must be greater than zero");
        }
        if self.verifier.algorithm == Algorithm::Hs256 && self.verifier.hmac_secret_env.is_empty() {
            anyhow::bail!("verifier.hmac_secret_env must name an environment variable");
        }
        Ok(())
    }

    /// Registry snapshot path, falling back to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if no path is configured and the home directory is unknown.
    pub fn registry_path(&self) -> anyhow::Result<PathBuf> {
        match &self.paths.registry {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("armory").join("registry.json")),
        }
    }
}

/// Resolve the default config directory (`~/.tollgate/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".tollgate"))
}
