//! Simulated microVM launch for local dry runs.

use crate::armory::RegistryEntry;
use crate::manifest::TaskClaims;

use super::{
    digest_prefix, sanitize_identifier, CommandBuilder, CommandSpec, SandboxBackend, SandboxError,
};

/// Builds `echo firecracker_simulated:<vm-id>:<digest-prefix>`.
///
/// Nothing from the tool image runs; the echoed marker lets operators
/// correlate dry runs with the task and tool that would have launched.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedBuilder;

impl CommandBuilder for SimulatedBuilder {
    fn backend(&self) -> SandboxBackend {
        SandboxBackend::Simulate
    }

    fn build(&self, tool: &RegistryEntry, claims: &TaskClaims) -> Result<CommandSpec, SandboxError> {
        let vm_id = sanitize_identifier(claims.task_id());
        Ok(CommandSpec::from_argv(vec![
            "echo".to_owned(),
            format!(
                "firecracker_simulated:{vm_id}:{}",
                digest_prefix(&tool.tool_sha256)
            ),
        ]))
    }
}
