//! Sandbox command construction.
//!
//! Builders turn a resolved tool plus verified claims into a [`CommandSpec`]:
//! an argument vector, never a shell string. Construction is pure. Every
//! attacker-influenced value passes through [`sanitize_identifier`] first.

use serde::{Deserialize, Serialize};

use crate::armory::RegistryEntry;
use crate::config::SandboxConfig;
use crate::manifest::TaskClaims;

pub mod docker;
pub mod simulate;

pub use docker::{container_name, DockerBuilder};
pub use simulate::SimulatedBuilder;

/// Maximum length of a sanitized identifier.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Replacement for identifiers that sanitize to nothing.
pub const IDENTIFIER_PLACEHOLDER: &str = "task";

/// Number of digest characters shown in correlation labels.
pub const DIGEST_PREFIX_LEN: usize = 16;

/// Sandbox backend selected by deployment configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackend {
    /// Echo-only launch for local dry runs. Provides no isolation.
    #[default]
    Simulate,
    /// Hardened container launch through the docker CLI.
    Docker,
}

impl SandboxBackend {
    /// Lowercase configuration name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simulate => "simulate",
            Self::Docker => "docker",
        }
    }
}

impl std::str::FromStr for SandboxBackend {
    type Err = SandboxError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "simulate" => Ok(Self::Simulate),
            "docker" => Ok(Self::Docker),
            _ => Err(SandboxError::InvalidProfile { field: "backend" }),
        }
    }
}

/// Fully resolved command: executable name followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    argv: Vec<String>,
}

impl CommandSpec {
    /// Wrap an argument vector. `argv[0]` is the executable.
    pub fn from_argv(argv: Vec<String>) -> Self {
        Self { argv }
    }

    /// Full argument vector including the executable.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Executable name, if any.
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    /// Arguments after the executable.
    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or(&[])
    }

    /// True when there is nothing to launch.
    pub fn is_empty(&self) -> bool {
        self.program().map_or(true, str::is_empty)
    }
}

/// Builder and guard failures. All fail closed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    /// The registry entry's image reference cannot be launched safely.
    #[error("tool image reference is empty or not a plain reference")]
    InvalidImageRef,
    /// An operator-supplied sandbox setting is unusable.
    #[error("sandbox setting `{field}` is invalid")]
    InvalidProfile {
        /// Offending setting.
        field: &'static str,
    },
    /// The command carries an isolation-weakening flag.
    #[error("command contains sandbox breakout indicator `{indicator}`")]
    BreakoutIndicator {
        /// Matched indicator.
        indicator: String,
    },
}

impl SandboxError {
    /// Stable snake_case tag for machine-readable reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidImageRef => "invalid_image_ref",
            Self::InvalidProfile { .. } => "invalid_sandbox_profile",
            Self::BreakoutIndicator { .. } => "breakout_indicator",
        }
    }
}

/// Strategy that turns a resolved tool and verified claims into a command.
pub trait CommandBuilder: Send + Sync {
    /// Backend this builder implements.
    fn backend(&self) -> SandboxBackend;

    /// Build the launch command. Must be deterministic and free of I/O.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError`] when the command cannot be built safely.
    fn build(&self, tool: &RegistryEntry, claims: &TaskClaims) -> Result<CommandSpec, SandboxError>;

    /// Exit codes the launcher itself uses when the tool never started.
    ///
    /// An outcome carrying one of these is a harness failure, not a tool result.
    fn launcher_exit_codes(&self) -> &'static [i32] {
        &[]
    }

    /// Command that forcibly removes whatever [`CommandBuilder::build`]
    /// launched for these inputs. `None` when killing the launched process
    /// already stops the tool.
    fn teardown(&self, _tool: &RegistryEntry, _claims: &TaskClaims) -> Option<CommandSpec> {
        None
    }
}

/// Select the builder configured for this deployment.
///
/// # Errors
///
/// Returns [`SandboxError::InvalidProfile`] when docker settings are unusable.
pub fn builder_from_config(config: &SandboxConfig) -> Result<Box<dyn CommandBuilder>, SandboxError> {
    match config.backend {
        SandboxBackend::Simulate => Ok(Box::new(SimulatedBuilder)),
        SandboxBackend::Docker => Ok(Box::new(DockerBuilder::new(config)?)),
    }
}

/// Reduce an untrusted identifier to `[A-Za-z0-9-]{1,63}`.
///
/// Every other character becomes `-`, the result is cut to
/// [`MAX_IDENTIFIER_LEN`], and an empty result becomes
/// [`IDENTIFIER_PLACEHOLDER`].
pub fn sanitize_identifier(raw: &str) -> String {
    let sanitized: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .take(MAX_IDENTIFIER_LEN)
        .collect();
    if sanitized.is_empty() {
        IDENTIFIER_PLACEHOLDER.to_owned()
    } else {
        sanitized
    }
}

/// Human-readable digest prefix for correlation only. Never use it to select an image.
pub fn digest_prefix(digest: &str) -> &str {
    match digest.char_indices().nth(DIGEST_PREFIX_LEN) {
        Some((end, _)) => &digest[..end],
        None => digest,
    }
}

/// Flags that defeat isolation. `None` means any value matches.
const BREAKOUT_FLAGS: &[(&str, Option<&str>)] = &[
    ("--privileged", None),
    ("--cap-add", None),
    ("--device", None),
    ("--network", Some("host")),
    ("--net", Some("host")),
    ("--pid", Some("host")),
    ("--ipc", Some("host")),
    ("--uts", Some("host")),
    ("--userns", Some("host")),
    ("--security-opt", Some("seccomp=unconfined")),
    ("--security-opt", Some("apparmor=unconfined")),
];

/// Reject commands that carry isolation-weakening flags.
///
/// Flags are matched as whole arguments (`--flag`, `--flag=value`, or
/// `--flag value`), so sanitized values embedded in other arguments do not
/// trigger false positives.
///
/// # Errors
///
/// Returns [`SandboxError::BreakoutIndicator`] naming the first match.
pub fn check_breakout(command: &CommandSpec) -> Result<(), SandboxError> {
    let args: Vec<String> = command
        .args()
        .iter()
        .map(|arg| arg.to_ascii_lowercase())
        .collect();

    for (index, arg) in args.iter().enumerate() {
        let (flag, inline_value) = match arg.split_once('=') {
            Some((flag, value)) => (flag, Some(value)),
            None => (arg.as_str(), None),
        };
        for (indicator, required_value) in BREAKOUT_FLAGS {
            if flag != *indicator {
                continue;
            }
            let value = inline_value.or_else(|| {
                index
                    .checked_add(1)
                    .and_then(|next| args.get(next))
                    .map(String::as_str)
            });
            let matched = match required_value {
                None => true,
                Some(required) => value == Some(*required),
            };
            if matched {
                return Err(SandboxError::BreakoutIndicator {
                    indicator: arg.clone(),
                });
            }
        }
    }
    Ok(())
}
