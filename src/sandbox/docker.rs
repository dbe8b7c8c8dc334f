//! Hardened container launch through the docker CLI.

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::armory::RegistryEntry;
use crate::config::SandboxConfig;
use crate::manifest::TaskClaims;

use super::{
    digest_prefix, sanitize_identifier, CommandBuilder, CommandSpec, SandboxBackend, SandboxError,
};

/// Size cap for the writable scratch mount.
const TMPFS_SPEC: &str = "/tmp:rw,noexec,nosuid,size=64m";

/// Gives every container name an alphanumeric first character.
const CONTAINER_PREFIX: &str = "tollgate-";

/// Sanitized task id characters kept in a container name. Prefix, stem,
/// separator, and hash add up to 63.
const CONTAINER_STEM_LEN: usize = 45;

/// Bytes of the raw task id hash appended to a container name.
const CONTAINER_HASH_BYTES: usize = 4;

/// `docker run` reserves these for daemon errors, an uninvokable entrypoint,
/// and a missing entrypoint.
const DOCKER_LAUNCH_EXIT_CODES: &[i32] = &[125, 126, 127];

/// Container name for a task, `tollgate-<sanitized id>-<hash>`.
///
/// Always matches docker's `[a-zA-Z0-9][a-zA-Z0-9_.-]+` within 63
/// characters. The hash covers the raw id, so ids that sanitize to the same
/// text still get distinct names.
pub fn container_name(task_id: &str) -> String {
    let stem: String = sanitize_identifier(task_id)
        .chars()
        .take(CONTAINER_STEM_LEN)
        .collect();
    let digest = Sha256::digest(task_id.as_bytes());
    let hash = digest
        .get(..CONTAINER_HASH_BYTES)
        .map(hex::encode)
        .unwrap_or_default();
    format!("{CONTAINER_PREFIX}{stem}-{hash}")
}

/// Builds `docker run` invocations with read-only rootfs, no network, all
/// capabilities dropped, no-new-privileges, an AppArmor profile, and a
/// restricted runtime.
#[derive(Debug, Clone)]
pub struct DockerBuilder {
    docker_bin: String,
    runtime: String,
    apparmor_profile: String,
    memory_mb: u32,
    pids_limit: u32,
}

impl DockerBuilder {
    /// Validate the operator-supplied settings and create a builder.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidProfile`] naming the first unusable setting.
    pub fn new(config: &SandboxConfig) -> Result<Self, SandboxError> {
        if config.docker_bin.trim().is_empty() || config.docker_bin.starts_with('-') {
            return Err(SandboxError::InvalidProfile { field: "docker_bin" });
        }
        if !is_profile_name(&config.runtime) {
            return Err(SandboxError::InvalidProfile { field: "runtime" });
        }
        if !is_profile_name(&config.apparmor_profile) || config.apparmor_profile == "unconfined" {
            return Err(SandboxError::InvalidProfile {
                field: "apparmor_profile",
            });
        }
        if config.memory_mb == 0 {
            return Err(SandboxError::InvalidProfile { field: "memory_mb" });
        }
        if config.pids_limit == 0 {
            return Err(SandboxError::InvalidProfile { field: "pids_limit" });
        }

        Ok(Self {
            docker_bin: config.docker_bin.clone(),
            runtime: config.runtime.clone(),
            apparmor_profile: config.apparmor_profile.clone(),
            memory_mb: config.memory_mb,
            pids_limit: config.pids_limit,
        })
    }
}

impl CommandBuilder for DockerBuilder {
    fn backend(&self) -> SandboxBackend {
        SandboxBackend::Docker
    }

    fn build(&self, tool: &RegistryEntry, claims: &TaskClaims) -> Result<CommandSpec, SandboxError> {
        if !is_plain_image_ref(&tool.image_ref) {
            return Err(SandboxError::InvalidImageRef);
        }

        let vm_id = sanitize_identifier(claims.task_id());
        let name = container_name(claims.task_id());
        let target = sanitize_identifier(&claims.target_urn);
        let prefix = digest_prefix(&tool.tool_sha256);

        let argv = vec![
            self.docker_bin.clone(),
            "run".to_owned(),
            "--rm".to_owned(),
            "--read-only".to_owned(),
            "--network=none".to_owned(),
            "--cap-drop=ALL".to_owned(),
            "--security-opt=no-new-privileges:true".to_owned(),
            format!("--security-opt=apparmor={}", self.apparmor_profile),
            format!("--runtime={}", self.runtime),
            format!("--pids-limit={}", self.pids_limit),
            format!("--memory={}m", self.memory_mb),
            format!("--tmpfs={TMPFS_SPEC}"),
            format!("--name={name}"),
            format!("--label=io.tollgate.tool-digest={prefix}"),
            format!("--env=TOLLGATE_TASK_ID={vm_id}"),
            format!("--env=TOLLGATE_TARGET_URN={target}"),
            tool.image_ref.clone(),
        ];
        debug!(container = %name, tool_digest = prefix, image = %tool.image_ref, "built docker sandbox command");
        Ok(CommandSpec::from_argv(argv))
    }

    fn launcher_exit_codes(&self) -> &'static [i32] {
        DOCKER_LAUNCH_EXIT_CODES
    }

    /// Killing the `docker run` client leaves the container running, so the
    /// daemon is asked to remove it by name.
    fn teardown(&self, _tool: &RegistryEntry, claims: &TaskClaims) -> Option<CommandSpec> {
        Some(CommandSpec::from_argv(vec![
            self.docker_bin.clone(),
            "rm".to_owned(),
            "--force".to_owned(),
            container_name(claims.task_id()),
        ]))
    }
}

fn is_profile_name(raw: &str) -> bool {
    !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Image references come from the registry, but they still land in argv
/// position: refuse anything docker could parse as a flag.
fn is_plain_image_ref(raw: &str) -> bool {
    !raw.is_empty()
        && !raw.starts_with('-')
        && raw
            .chars()
            .all(|c| c.is_ascii_graphic() && !matches!(c, '\'' | '"' | '`' | '\\' | '$'))
}
