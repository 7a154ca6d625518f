// Loading failures must stop before any entry point is called
use std::io::Write;

use sonar_harness::{HarnessError, SonarLibrary};

#[test]
fn test_not_a_library() {
    let mut file = tempfile::Builder::new()
        .suffix(".so")
        .tempfile()
        .unwrap();
    file.write_all(b"definitely not an ELF object").unwrap();

    let result = SonarLibrary::open(file.path());
    assert!(matches!(result, Err(HarnessError::Load { .. })));
}

#[test]
fn test_directory_is_not_a_library() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        SonarLibrary::open(dir.path()),
        Err(HarnessError::Load { .. })
    ));
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[test]
fn test_library_without_entry_points() {
    use sonar_harness::{START_SERVER, START_SERVER_FROM_ENV};

    // libc loads fine but exports neither entry point
    match SonarLibrary::open("libc.so.6") {
        Err(HarnessError::Symbol { name, .. }) => assert_eq!(name, START_SERVER_FROM_ENV),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("libc should not export {}", START_SERVER),
    }
}
