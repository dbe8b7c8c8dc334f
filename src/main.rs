//! Tollgate CLI entry point.
//!
//! Provides `run`, `verify`, and `sign` subcommands. The audit event, verified
//! claims, or issued token is the only thing written to stdout; logs go to
//! stderr.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::SigningKey;
use tracing::{error, info};

use tollgate::armory::load_registry;
use tollgate::config::RunnerConfig;
use tollgate::executor::{ExecOptions, ProcessExecutor};
use tollgate::keys::{self, Secrets};
use tollgate::logging::{self, LoggingGuard};
use tollgate::manifest::load_manifest;
use tollgate::pipeline::{PipelineError, Runner, EXIT_EVENT, EXIT_VERIFY};
use tollgate::sandbox::builder_from_config;
use tollgate::token::issue::{sign_eddsa, sign_hs256};
use tollgate::token::{Algorithm, TokenError};

/// Exit code for unusable input or configuration.
const EXIT_INPUT: u8 = 2;
/// Exit code for registry load failures.
const EXIT_REGISTRY: u8 = 4;

/// Tollgate: verify a signed task, launch its tool in a sandbox, emit an audit event.
#[derive(Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// Config file (default: `$TOLLGATE_CONFIG_PATH` or `~/.tollgate/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Verify, authorize, execute, and print the audit event.
    Run {
        /// Task manifest JSON file.
        #[arg(long)]
        manifest: PathBuf,
        /// Compact token, or `@path` to read it from a file.
        #[arg(long)]
        token: String,
        /// Registry snapshot JSON file (overrides config).
        #[arg(long)]
        registry: Option<PathBuf>,
    },
    /// Verify a token and print its claims.
    Verify {
        /// Compact token, or `@path` to read it from a file.
        #[arg(long)]
        token: String,
    },
    /// Issue a compact token for a manifest.
    Sign {
        /// Task manifest JSON file.
        #[arg(long)]
        manifest: PathBuf,
        /// PKCS#8 PEM private key, required when the algorithm is EdDSA.
        #[arg(long)]
        private_key: Option<PathBuf>,
    },
}

/// A failed subcommand and the exit code it maps to.
struct Failure {
    code: u8,
    kind: &'static str,
    error: anyhow::Error,
}

impl Failure {
    fn input(error: anyhow::Error) -> Self {
        Self {
            code: EXIT_INPUT,
            kind: "invalid_input",
            error,
        }
    }
}

impl From<PipelineError> for Failure {
    fn from(e: PipelineError) -> Self {
        Self {
            code: e.exit_code(),
            kind: e.kind(),
            error: e.into(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match RunnerConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init_cli();
            error!(error = %format!("{e:#}"), "failed to load configuration");
            return ExitCode::from(EXIT_INPUT);
        }
    };

    let _logging_guard = match init_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("tollgate: {e:#}");
            return ExitCode::from(EXIT_INPUT);
        }
    };

    let secrets = match load_default_secrets() {
        Ok(secrets) => secrets,
        Err(e) => {
            error!(error = %format!("{e:#}"), "failed to load secrets");
            return ExitCode::from(EXIT_INPUT);
        }
    };

    let result = match cli.command {
        Command::Run {
            manifest,
            token,
            registry,
        } => handle_run(&config, &secrets, &manifest, &token, registry.as_deref()).await,
        Command::Verify { token } => handle_verify(&config, &secrets, &token),
        Command::Sign {
            manifest,
            private_key,
        } => handle_sign(&config, &secrets, &manifest, private_key.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            error!(
                kind = failure.kind,
                exit_code = failure.code,
                error = %format!("{:#}", failure.error),
                "tollgate failed"
            );
            ExitCode::from(failure.code)
        }
    }
}

fn init_logging(config: &RunnerConfig) -> anyhow::Result<Option<LoggingGuard>> {
    match &config.paths.logs_dir {
        Some(dir) => logging::init_production(dir).map(Some),
        None => {
            logging::init_cli();
            Ok(None)
        }
    }
}

fn load_default_secrets() -> anyhow::Result<Secrets> {
    let path = keys::default_secrets_path()?;
    keys::load_secrets(&path)
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Read a token given inline or as `@path`.
fn read_token(arg: &str) -> anyhow::Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read token at {path}"))?;
            Ok(raw.trim().to_owned())
        }
        None => Ok(arg.trim().to_owned()),
    }
}

/// Run the full pipeline and print the audit event.
async fn handle_run(
    config: &RunnerConfig,
    secrets: &Secrets,
    manifest_path: &Path,
    token_arg: &str,
    registry_override: Option<&Path>,
) -> Result<(), Failure> {
    let manifest = load_manifest(manifest_path).map_err(Failure::input)?;
    let token = read_token(token_arg).map_err(Failure::input)?;

    // Unauthenticated input is rejected before the registry is consulted.
    let verifier =
        keys::build_verifier(&config.verifier, secrets, process_env).map_err(Failure::input)?;
    verifier
        .verify(&token)
        .map_err(|e| Failure::from(PipelineError::from(e)))?;

    let registry_path = match registry_override {
        Some(path) => path.to_path_buf(),
        None => config.registry_path().map_err(Failure::input)?,
    };
    let registry = load_registry(&registry_path).map_err(|e| Failure {
        code: EXIT_REGISTRY,
        kind: "registry_unavailable",
        error: e,
    })?;
    info!(
        path = %registry_path.display(),
        entries = registry.len(),
        "registry loaded"
    );

    let builder = builder_from_config(&config.sandbox)
        .context("invalid sandbox configuration")
        .map_err(Failure::input)?;
    let executor = ProcessExecutor::new(ExecOptions::from(&config.executor));

    let runner = Runner::new(verifier, builder, Box::new(executor), registry);
    let event = runner.run(manifest, &token).await?;

    let line = serde_json::to_string(&event).map_err(|e| Failure {
        code: EXIT_EVENT,
        kind: "event_encoding_failed",
        error: e.into(),
    })?;
    println!("{line}");
    Ok(())
}

/// Verify a token and print its claims.
fn handle_verify(config: &RunnerConfig, secrets: &Secrets, token_arg: &str) -> Result<(), Failure> {
    let token = read_token(token_arg).map_err(Failure::input)?;
    let verifier =
        keys::build_verifier(&config.verifier, secrets, process_env).map_err(Failure::input)?;

    let claims = verifier.verify(&token).map_err(|e| Failure {
        code: EXIT_VERIFY,
        kind: e.kind(),
        error: e.into(),
    })?;
    info!(task_id = claims.task_id(), "token verified");

    let line = serde_json::to_string(&claims).map_err(|e| Failure {
        code: EXIT_EVENT,
        kind: "claims_encoding_failed",
        error: e.into(),
    })?;
    println!("{line}");
    Ok(())
}

/// Sign a manifest with the configured algorithm and print the token.
fn handle_sign(
    config: &RunnerConfig,
    secrets: &Secrets,
    manifest_path: &Path,
    private_key: Option<&Path>,
) -> Result<(), Failure> {
    let manifest = load_manifest(manifest_path).map_err(Failure::input)?;

    let signed = match config.verifier.algorithm {
        Algorithm::Hs256 => {
            let secret = keys::hmac_secret(&config.verifier, secrets, process_env)
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "no HS256 secret in ${}",
                        config.verifier.hmac_secret_env
                    )
                })
                .map_err(Failure::input)?;
            sign_hs256(manifest.claims(), secret.as_bytes())
        }
        Algorithm::EdDsa => {
            let path = private_key
                .ok_or_else(|| anyhow::anyhow!("--private-key is required for EdDSA"))
                .map_err(Failure::input)?;
            let pem = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read private key at {}", path.display()))
                .map_err(Failure::input)?;
            let key = SigningKey::from_pkcs8_pem(&pem)
                .map_err(|_| {
                    anyhow::anyhow!(
                        "private key at {} is not a PKCS#8 Ed25519 key",
                        path.display()
                    )
                })
                .map_err(Failure::input)?;
            sign_eddsa(manifest.claims(), &key)
        }
    };

    let token = signed.map_err(|e: TokenError| Failure {
        code: if e == TokenError::MissingKeyMaterial {
            EXIT_INPUT
        } else {
            EXIT_EVENT
        },
        kind: e.kind(),
        error: e.into(),
    })?;
    info!(
        task_id = manifest.claims().task_id(),
        algorithm = %config.verifier.algorithm,
        "token issued"
    );
    println!("{token}");
    Ok(())
}
