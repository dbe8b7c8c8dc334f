//! CLI contract tests: exit codes and stdout discipline.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use tempfile::TempDir;

const SECRET: &str = "cli-test-secret";

const MANIFEST: &str = r#"{
    "task_context": {"task_id": "task-1", "tenant_id": "tenant-a"},
    "target_urn": "urn:target:ip:10.0.0.5",
    "tool_sha256": "sha256:def",
    "nonce": "n-1"
}"#;

const REGISTRY: &str = r#"[
    {"tool_sha256": "sha256:abc", "image_ref": "tool:v0", "authorized": false},
    {"tool_sha256": "sha256:def", "image_ref": "tool:v1", "authorized": true}
]"#;

/// Isolated home, config, registry, and manifest for one test.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = dir.path().join("registry.json");
        fs::write(&registry, REGISTRY).expect("write registry");
        fs::write(dir.path().join("manifest.json"), MANIFEST).expect("write manifest");
        fs::write(
            dir.path().join("tollgate.toml"),
            format!(
                "[sandbox]\nbackend = \"simulate\"\n\n[paths]\nregistry = \"{}\"\n",
                registry.display()
            ),
        )
        .expect("write config");
        fs::create_dir_all(dir.path().join("home")).expect("home");
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("tollgate").expect("binary should build");
        cmd.env("HOME", self.path("home"))
            .env("TOLLGATE_CONFIG_PATH", self.path("tollgate.toml"))
            .env("TOLLGATE_HMAC_SECRET", SECRET)
            .env("RUST_LOG", "warn")
            .env_remove("TOLLGATE_ALGORITHM")
            .env_remove("TOLLGATE_SANDBOX_BACKEND")
            .env_remove("TOLLGATE_TIMEOUT_SECS")
            .env_remove("TOLLGATE_REGISTRY")
            .env_remove("TOLLGATE_PUBLIC_KEY_PATH");
        cmd
    }

    fn sign(&self, manifest: &str) -> String {
        let output = self
            .cmd()
            .args(["sign", "--manifest"])
            .arg(self.path(manifest))
            .output()
            .expect("sign should run");
        assert!(output.status.success(), "sign failed: {output:?}");
        String::from_utf8(output.stdout)
            .expect("utf-8")
            .trim()
            .to_owned()
    }
}

#[test]
fn help_lists_subcommands() {
    let output = Command::cargo_bin("tollgate")
        .expect("binary should build")
        .arg("--help")
        .output()
        .expect("help should run");
    assert!(output.status.success());
    let help = String::from_utf8_lossy(&output.stdout);
    for sub in ["run", "verify", "sign"] {
        assert!(help.contains(sub), "missing {sub}");
    }
}

#[cfg(unix)]
#[test]
fn signed_task_runs_and_prints_one_event() {
    let ws = Workspace::new();
    let token = ws.sign("manifest.json");
    assert_eq!(token.split('.').count(), 3);

    let output = ws
        .cmd()
        .args(["run", "--manifest"])
        .arg(ws.path("manifest.json"))
        .args(["--token", &token])
        .output()
        .expect("run should execute");
    assert!(output.status.success(), "run failed: {output:?}");

    let stdout = String::from_utf8(output.stdout).expect("utf-8");
    assert_eq!(stdout.lines().count(), 1);
    let event: serde_json::Value = serde_json::from_str(&stdout).expect("event json");
    assert_eq!(event["specversion"], "1.0");
    assert_eq!(event["data"]["status"], "success");
    assert_eq!(event["data"]["tool_sha256"], "sha256:def");
    assert_eq!(event["data"]["manifest_jws"], token.as_str());
    let measurement = event["data"]["measurement_hash"].as_str().expect("measurement");
    assert_eq!(measurement.len(), 64);
}

#[cfg(unix)]
#[test]
fn token_can_be_read_from_file() {
    let ws = Workspace::new();
    let token = ws.sign("manifest.json");
    let token_path = ws.path("task.jws");
    fs::write(&token_path, format!("{token}\n")).expect("write token");

    ws.cmd()
        .args(["run", "--manifest"])
        .arg(ws.path("manifest.json"))
        .arg("--token")
        .arg(format!("@{}", token_path.display()))
        .assert()
        .success();
}

#[test]
fn verify_prints_claims() {
    let ws = Workspace::new();
    let token = ws.sign("manifest.json");
    let output = ws
        .cmd()
        .args(["verify", "--token", &token])
        .output()
        .expect("verify should run");
    assert!(output.status.success());
    let claims: serde_json::Value = serde_json::from_slice(&output.stdout).expect("claims json");
    assert_eq!(claims["task_context"]["task_id"], "task-1");
}

#[test]
fn wrong_secret_exits_with_verification_code() {
    let ws = Workspace::new();
    let token = ws.sign("manifest.json");
    ws.cmd()
        .env("TOLLGATE_HMAC_SECRET", "someone-else")
        .args(["verify", "--token", &token])
        .assert()
        .code(3)
        .stdout("");
}

#[test]
fn unauthorized_digest_exits_with_authorization_code() {
    let ws = Workspace::new();
    fs::write(
        ws.path("unauthorized.json"),
        MANIFEST.replace("sha256:def", "sha256:abc"),
    )
    .expect("write manifest");
    let token = ws.sign("unauthorized.json");

    ws.cmd()
        .args(["run", "--manifest"])
        .arg(ws.path("unauthorized.json"))
        .args(["--token", &token])
        .assert()
        .code(5)
        .stdout("");
}

#[test]
fn manifest_token_mismatch_exits_with_verification_code() {
    let ws = Workspace::new();
    fs::write(
        ws.path("other.json"),
        MANIFEST.replace("task-1", "task-2"),
    )
    .expect("write manifest");
    let token = ws.sign("manifest.json");

    ws.cmd()
        .args(["run", "--manifest"])
        .arg(ws.path("other.json"))
        .args(["--token", &token])
        .assert()
        .code(3)
        .stdout("");
}

#[test]
fn missing_manifest_exits_with_input_code() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["run", "--manifest"])
        .arg(ws.path("absent.json"))
        .args(["--token", "a.b.c"])
        .assert()
        .code(2)
        .stdout("");
}

#[test]
fn missing_registry_exits_with_registry_code() {
    let ws = Workspace::new();
    let token = ws.sign("manifest.json");
    ws.cmd()
        .args(["run", "--manifest"])
        .arg(ws.path("manifest.json"))
        .args(["--token", &token, "--registry"])
        .arg(ws.path("absent-registry.json"))
        .assert()
        .code(4)
        .stdout("");
}

#[test]
fn forged_token_is_rejected_before_registry_load() {
    let ws = Workspace::new();
    for token in ["a.b.c", "not-a-token"] {
        ws.cmd()
            .args(["run", "--manifest"])
            .arg(ws.path("manifest.json"))
            .args(["--token", token, "--registry"])
            .arg(ws.path("absent-registry.json"))
            .assert()
            .code(3)
            .stdout("");
    }
}

#[test]
fn wrongly_signed_token_with_missing_registry_exits_with_verification_code() {
    let ws = Workspace::new();
    let token = ws.sign("manifest.json");
    ws.cmd()
        .env("TOLLGATE_HMAC_SECRET", "someone-else")
        .args(["run", "--manifest"])
        .arg(ws.path("manifest.json"))
        .args(["--token", &token, "--registry"])
        .arg(ws.path("absent-registry.json"))
        .assert()
        .code(3)
        .stdout("");
}

#[test]
fn invalid_config_exits_with_input_code() {
    let ws = Workspace::new();
    fs::write(ws.path("bad.toml"), "[executor]\ntimeout_secs = 0\n").expect("write");
    ws.cmd()
        .arg("--config")
        .arg(ws.path("bad.toml"))
        .args(["verify", "--token", "a.b.c"])
        .assert()
        .code(2);
}

#[test]
fn sign_without_secret_exits_with_input_code() {
    let ws = Workspace::new();
    ws.cmd()
        .env_remove("TOLLGATE_HMAC_SECRET")
        .args(["sign", "--manifest"])
        .arg(ws.path("manifest.json"))
        .assert()
        .code(2)
        .stdout("");
}
