// stdout of the harness carries only the entry point results
use std::process::Command;

#[test]
fn test_load_failure_logs_to_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("libsonar.so");

    let output = Command::new(env!("CARGO_BIN_EXE_sonar-harness"))
        .arg("--library")
        .arg(&missing)
        .env("RUST_LOG", "info")
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load library"));
    assert!(stderr.contains(&*missing.to_string_lossy()));
}
