//! Verify, reconcile, resolve, build, guard, execute, and map.
//!
//! [`Runner::run`] is the single entry point. Stages run strictly in order
//! and the first failure aborts the invocation without emitting an event.
//! When execution fails after launch, the builder's teardown command runs
//! before the error is returned.

use tracing::{info, warn};

use crate::armory::{self, AuthorizationError, RegistryEntry};
use crate::event::{self, AuditEvent, EntropySource, EventError, OsEntropy};
use crate::executor::{Executor, ExecutorError};
use crate::manifest::{ManifestMismatch, TaskClaims, UnverifiedManifest};
use crate::sandbox::{self, CommandBuilder, SandboxError};
use crate::token::{TokenError, Verifier};

/// Exit code for token verification and reconciliation failures.
pub const EXIT_VERIFY: u8 = 3;
/// Exit code for authorization failures.
pub const EXIT_AUTHORIZATION: u8 = 5;
/// Exit code for sandbox and execution harness failures.
pub const EXIT_EXECUTE: u8 = 6;
/// Exit code for event mapping failures.
pub const EXIT_EVENT: u8 = 7;

/// Terminal failure of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// Token verification failed.
    #[error("token rejected: {0}")]
    Token(#[from] TokenError),
    /// Manifest disagrees with the verified token.
    #[error(transparent)]
    ManifestMismatch(#[from] ManifestMismatch),
    /// Requested tool is not authorized.
    #[error("tool rejected: {0}")]
    Authorization(#[from] AuthorizationError),
    /// Command could not be built or failed the breakout guard.
    #[error("sandbox rejected: {0}")]
    Sandbox(#[from] SandboxError),
    /// Execution harness failure.
    #[error("execution failed: {0}")]
    Executor(#[from] ExecutorError),
    /// Audit event could not be produced.
    #[error("event mapping failed: {0}")]
    Event(#[from] EventError),
}

impl PipelineError {
    /// Process exit code for the invoking boundary.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Token(_) | Self::ManifestMismatch(_) => EXIT_VERIFY,
            Self::Authorization(_) => EXIT_AUTHORIZATION,
            Self::Sandbox(_) | Self::Executor(_) => EXIT_EXECUTE,
            Self::Event(_) => EXIT_EVENT,
        }
    }

    /// Stable snake_case tag for machine-readable reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token(e) => e.kind(),
            Self::ManifestMismatch(_) => "manifest_mismatch",
            Self::Authorization(AuthorizationError::AuthorizedDigestNotFound) => {
                "authorized_digest_not_found"
            }
            Self::Sandbox(e) => e.kind(),
            Self::Executor(e) => e.kind(),
            Self::Event(e) => e.kind(),
        }
    }

    /// `true` for rejections of untrusted input, `false` for infrastructure faults.
    pub fn is_security_rejection(&self) -> bool {
        match self {
            Self::Token(TokenError::MissingKeyMaterial | TokenError::InvalidKeyMaterial) => false,
            Self::Token(_) | Self::ManifestMismatch(_) | Self::Authorization(_) => true,
            Self::Sandbox(SandboxError::InvalidProfile { .. }) => false,
            Self::Sandbox(_) => true,
            Self::Executor(_) | Self::Event(_) => false,
        }
    }
}

/// One configured verification-and-launch pipeline.
///
/// Holds an immutable registry snapshot. A runner may serve any number of
/// invocations; none share mutable state.
pub struct Runner {
    verifier: Box<dyn Verifier>,
    builder: Box<dyn CommandBuilder>,
    executor: Box<dyn Executor>,
    registry: Vec<RegistryEntry>,
    entropy: Box<dyn EntropySource>,
}

impl Runner {
    /// Assemble a runner with OS entropy for event ids.
    pub fn new(
        verifier: Box<dyn Verifier>,
        builder: Box<dyn CommandBuilder>,
        executor: Box<dyn Executor>,
        registry: Vec<RegistryEntry>,
    ) -> Self {
        Self {
            verifier,
            builder,
            executor,
            registry,
            entropy: Box::new(OsEntropy),
        }
    }

    /// Replace the event id entropy source.
    #[must_use]
    pub fn with_entropy(mut self, entropy: Box<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    /// Registry snapshot this runner resolves against.
    pub fn registry(&self) -> &[RegistryEntry] {
        &self.registry
    }

    /// Run one task end to end.
    ///
    /// # Errors
    ///
    /// Returns the [`PipelineError`] of the first stage that fails. No event
    /// is produced in that case.
    pub async fn run(
        &self,
        manifest: UnverifiedManifest,
        token: &str,
    ) -> Result<AuditEvent, PipelineError> {
        let result = self.run_stages(manifest, token).await;
        if let Err(e) = &result {
            warn!(
                kind = e.kind(),
                exit_code = e.exit_code(),
                security_rejection = e.is_security_rejection(),
                "pipeline aborted"
            );
        }
        result
    }

    async fn run_stages(
        &self,
        manifest: UnverifiedManifest,
        token: &str,
    ) -> Result<AuditEvent, PipelineError> {
        let verified = self.verifier.verify(token)?;
        let claims = manifest.reconcile(verified)?;
        info!(
            task_id = claims.task_id(),
            tenant_id = claims.tenant_id(),
            algorithm = %self.verifier.algorithm(),
            "token verified"
        );

        let tool = armory::resolve(&self.registry, &claims.tool_sha256)?;
        info!(
            tool = %tool.tool_name,
            digest = sandbox::digest_prefix(&tool.tool_sha256),
            "tool authorized"
        );

        let command = self.builder.build(tool, &claims)?;
        sandbox::check_breakout(&command)?;
        let backend = self.builder.backend();
        let measurement = event::measurement_hash(&claims, backend, &command);

        let outcome = match self.executor.execute(&command).await {
            Ok(outcome) => outcome,
            Err(ExecutorError::EmptyCommand) => return Err(ExecutorError::EmptyCommand.into()),
            Err(e) => {
                self.teardown(tool, &claims).await;
                return Err(e.into());
            }
        };
        if self.builder.launcher_exit_codes().contains(&outcome.exit_code) {
            return Err(ExecutorError::LaunchFailed(format!(
                "{} launcher exited with code {}",
                backend.as_str(),
                outcome.exit_code
            ))
            .into());
        }
        info!(
            task_id = claims.task_id(),
            backend = backend.as_str(),
            exit_code = outcome.exit_code,
            measurement = %measurement,
            "sandboxed tool finished"
        );

        let event = event::map_to_event(
            &claims,
            &outcome,
            token,
            &measurement,
            self.entropy.as_ref(),
        )?;
        Ok(event)
    }

    /// Best-effort removal of a sandbox whose launcher was killed or failed.
    async fn teardown(&self, tool: &RegistryEntry, claims: &TaskClaims) {
        let Some(command) = self.builder.teardown(tool, claims) else {
            return;
        };
        match self.executor.execute(&command).await {
            Ok(outcome) if outcome.success() => {
                info!(task_id = claims.task_id(), "sandbox torn down");
            }
            Ok(outcome) => warn!(
                task_id = claims.task_id(),
                exit_code = outcome.exit_code,
                "sandbox teardown reported failure"
            ),
            Err(e) => warn!(
                task_id = claims.task_id(),
                kind = e.kind(),
                "sandbox teardown failed"
            ),
        }
    }
}
