//! Docker builder security invariant tests.

use std::fs;
use std::path::PathBuf;

fn docker_source() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/sandbox/docker.rs");
    fs::read_to_string(&path).expect("docker source should load")
}

fn sandbox_source() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/sandbox/mod.rs");
    fs::read_to_string(&path).expect("sandbox source should load")
}

#[test]
fn docker_container_has_no_network() {
    let source = docker_source();
    assert!(source.contains("\"--network=none\""));
    assert!(!source.contains("--network=host"));
}

#[test]
fn docker_container_drops_all_capabilities() {
    let source = docker_source();
    assert!(source.contains("\"--cap-drop=ALL\""));
    assert!(!source.contains("--cap-add"));
}

#[test]
fn docker_container_is_read_only_and_removed() {
    let source = docker_source();
    assert!(source.contains("\"--read-only\""));
    assert!(source.contains("\"--rm\""));
}

#[test]
fn docker_container_sets_security_opt() {
    let source = docker_source();
    assert!(source.contains("no-new-privileges:true"));
    assert!(source.contains("--security-opt=apparmor="));
    assert!(source.contains("--runtime="));
}

#[test]
fn docker_container_is_never_privileged() {
    let source = docker_source();
    assert!(!source.contains("\"--privileged\""));
}

#[test]
fn untrusted_values_pass_through_sanitizer() {
    let source = docker_source();
    assert!(source.contains("sanitize_identifier(claims.task_id())"));
    assert!(source.contains("sanitize_identifier(&claims.target_urn)"));
}

#[test]
fn tool_parameters_are_never_forwarded() {
    let source = docker_source();
    assert!(!source.contains("parameters"));
}

#[test]
fn builders_never_render_shell_strings() {
    for source in [docker_source(), sandbox_source()] {
        assert!(!source.contains("\"sh\""));
        assert!(!source.contains("\"-c\""));
        assert!(!source.contains("bash"));
    }
}
