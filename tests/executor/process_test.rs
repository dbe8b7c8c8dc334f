//! Process executor behaviour against real child processes.
#![cfg(unix)]

use std::time::Duration;

use tollgate::executor::{ExecOptions, Executor, ExecutorError, ProcessExecutor};
use tollgate::sandbox::CommandSpec;

fn command(parts: &[&str]) -> CommandSpec {
    CommandSpec::from_argv(parts.iter().map(|p| (*p).to_owned()).collect())
}

fn executor(timeout: Duration, max_output_bytes: usize) -> ProcessExecutor {
    ProcessExecutor::new(ExecOptions {
        timeout,
        max_output_bytes,
    })
}

#[tokio::test]
async fn non_zero_exit_is_an_outcome_not_an_error() {
    let outcome = ProcessExecutor::default()
        .execute(&command(&["sh", "-c", "echo out; echo err >&2; exit 2"]))
        .await
        .expect("tool ran");
    assert_eq!(outcome.exit_code, 2);
    assert!(!outcome.success());
    assert_eq!(outcome.stdout, "out\n");
    assert_eq!(outcome.stderr, "err\n");
    assert!(!outcome.stdout_truncated);
    assert!(!outcome.stderr_truncated);
}

#[tokio::test]
async fn zero_exit_is_success() {
    let outcome = ProcessExecutor::default()
        .execute(&command(&["true"]))
        .await
        .expect("tool ran");
    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.success());
}

#[tokio::test]
async fn arguments_are_not_shell_interpreted() {
    let outcome = ProcessExecutor::default()
        .execute(&command(&["echo", "$(id); `whoami`"]))
        .await
        .expect("tool ran");
    assert_eq!(outcome.stdout, "$(id); `whoami`\n");
}

#[tokio::test]
async fn stdin_is_closed() {
    let outcome = executor(Duration::from_secs(5), 1024)
        .execute(&command(&["cat"]))
        .await
        .expect("cat should see EOF");
    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.stdout.is_empty());
}

#[tokio::test]
async fn output_beyond_bound_is_truncated_and_drained() {
    let outcome = executor(Duration::from_secs(10), 1024)
        .execute(&command(&[
            "sh",
            "-c",
            "head -c 200000 /dev/zero | tr '\\0' 'a'; echo done >&2",
        ]))
        .await
        .expect("tool ran");
    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.stdout.len(), 1024);
    assert!(outcome.stdout_truncated);
    assert_eq!(outcome.stderr, "done\n");
    assert!(!outcome.stderr_truncated);
}

#[tokio::test]
async fn deadline_kills_the_child() {
    let result = executor(Duration::from_millis(200), 1024)
        .execute(&command(&["sleep", "30"]))
        .await;
    assert!(matches!(result, Err(ExecutorError::Timeout { .. })));
}

#[tokio::test]
async fn signal_termination_is_a_harness_failure() {
    let result = ProcessExecutor::default()
        .execute(&command(&["sh", "-c", "kill -9 $$"]))
        .await;
    assert!(matches!(result, Err(ExecutorError::LaunchFailed(_))));
}

#[tokio::test]
async fn missing_program_is_a_launch_failure() {
    let result = ProcessExecutor::default()
        .execute(&command(&["/nonexistent/tollgate-tool"]))
        .await;
    assert!(matches!(result, Err(ExecutorError::LaunchFailed(_))));
}

#[tokio::test]
async fn empty_program_is_rejected() {
    for parts in [&[][..], &[""][..]] {
        let result = ProcessExecutor::default().execute(&command(parts)).await;
        assert_eq!(result, Err(ExecutorError::EmptyCommand));
    }
}
