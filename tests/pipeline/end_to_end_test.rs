//! Full pipeline runs that produce an audit event.

use tollgate::config::SandboxConfig;
use tollgate::event::{RunStatus, EVENT_SOURCE, EVENT_TYPE};
use tollgate::executor::ProcessExecutor;
use tollgate::pipeline::Runner;
use tollgate::sandbox::{DockerBuilder, SandboxBackend, SimulatedBuilder};
use tollgate::token::Hs256Verifier;

use crate::support::{
    claims, manifest, registry, signed, CountingEntropy, FixedBuilder, RecordingExecutor, SECRET,
};

fn docker_builder() -> DockerBuilder {
    DockerBuilder::new(&SandboxConfig {
        backend: SandboxBackend::Docker,
        ..SandboxConfig::default()
    })
    .expect("default profile")
}

#[tokio::test]
async fn authorized_task_runs_hardened_command_and_emits_event() {
    let task = claims("task-1", "sha256:def");
    let token = signed(&task);
    let executor = RecordingExecutor::with_exit_code(0);

    let runner = Runner::new(
        Box::new(Hs256Verifier::new(SECRET)),
        Box::new(docker_builder()),
        Box::new(executor.clone()),
        registry(),
    )
    .with_entropy(Box::new(CountingEntropy::default()));

    let event = runner.run(manifest(&task), &token).await.expect("should run");

    let commands = executor.commands();
    assert_eq!(commands.len(), 1);
    let argv = commands[0].argv();
    assert_eq!(argv.last().map(String::as_str), Some("tool:v1"));
    assert!(argv.iter().any(|arg| arg == "--network=none"));
    assert!(argv.iter().any(|arg| arg == "--read-only"));
    assert!(!argv.iter().any(|arg| arg == "tool:v0"));

    assert_eq!(event.source, EVENT_SOURCE);
    assert_eq!(event.event_type, EVENT_TYPE);
    assert_eq!(event.subject, "task-1");
    assert_eq!(event.data.tool_sha256, "sha256:def");
    assert_eq!(event.data.status, RunStatus::Success);
    assert_eq!(event.data.exit_code, 0);
    assert_eq!(event.data.stdout, "scan complete\n");
    assert_eq!(event.data.manifest_jws, token);
}

#[tokio::test]
async fn tool_failure_is_reported_as_failed_event() {
    let task = claims("task-1", "sha256:def");
    let runner = Runner::new(
        Box::new(Hs256Verifier::new(SECRET)),
        Box::new(docker_builder()),
        Box::new(RecordingExecutor::with_exit_code(3)),
        registry(),
    );

    let event = runner
        .run(manifest(&task), &signed(&task))
        .await
        .expect("tool failure is still an event");
    assert_eq!(event.data.status, RunStatus::Failed);
    assert_eq!(event.data.exit_code, 3);
    assert_eq!(event.id.len(), 32);
}

#[cfg(unix)]
#[tokio::test]
async fn real_process_exit_code_drives_status() {
    let task = claims("task-1", "sha256:def");
    let runner = Runner::new(
        Box::new(Hs256Verifier::new(SECRET)),
        Box::new(FixedBuilder(vec![
            "sh".to_owned(),
            "-c".to_owned(),
            "echo partial; exit 2".to_owned(),
        ])),
        Box::new(ProcessExecutor::default()),
        registry(),
    );

    let event = runner
        .run(manifest(&task), &signed(&task))
        .await
        .expect("should run");
    assert_eq!(event.data.exit_code, 2);
    assert_eq!(event.data.status, RunStatus::Failed);
    assert_eq!(event.data.stdout, "partial\n");
}

#[cfg(unix)]
#[tokio::test]
async fn simulated_backend_runs_echo_marker() {
    let task = claims("task-1", "sha256:def");
    let runner = Runner::new(
        Box::new(Hs256Verifier::new(SECRET)),
        Box::new(SimulatedBuilder),
        Box::new(ProcessExecutor::default()),
        registry(),
    );

    let event = runner
        .run(manifest(&task), &signed(&task))
        .await
        .expect("should run");
    assert_eq!(event.data.status, RunStatus::Success);
    assert_eq!(event.data.stdout, "firecracker_simulated:task-1:sha256:def\n");
}

#[tokio::test]
async fn event_uses_verified_claims_after_reconciliation() {
    let verified = claims("task-1", "sha256:def");
    let mut on_disk = verified.clone();
    on_disk.target_urn = "urn:target:ip:192.168.0.1".to_owned();

    let runner = Runner::new(
        Box::new(Hs256Verifier::new(SECRET)),
        Box::new(docker_builder()),
        Box::new(RecordingExecutor::with_exit_code(0)),
        registry(),
    );
    let event = runner
        .run(manifest(&on_disk), &signed(&verified))
        .await
        .expect("identity fields agree");
    assert_eq!(event.data.target_urn, "urn:target:ip:10.0.0.5");
}

#[tokio::test]
async fn repeated_runs_get_distinct_event_ids() {
    let task = claims("task-1", "sha256:def");
    let token = signed(&task);
    let runner = Runner::new(
        Box::new(Hs256Verifier::new(SECRET)),
        Box::new(docker_builder()),
        Box::new(RecordingExecutor::with_exit_code(0)),
        registry(),
    );

    let first = runner.run(manifest(&task), &token).await.expect("first");
    let second = runner.run(manifest(&task), &token).await.expect("second");
    assert_ne!(first.id, second.id);
}
