//! End-to-end smoke tests for the rswift binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn rswift() -> Command {
    let mut cmd = Command::cargo_bin("rswift").unwrap();
    cmd.env_remove("OS_STORAGE_URL");
    cmd.env_remove("OS_AUTH_TOKEN");
    cmd
}

#[test]
fn test_help_shows_subcommands() {
    rswift()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("upload"))
        .stdout(predicate::str::contains("download"))
        .stdout(predicate::str::contains("delete"));
}

#[test]
fn test_missing_credentials_is_an_error() {
    rswift()
        .args(["list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("object_storage_url"));
}

#[test]
fn test_bad_segment_size_fails_before_any_request() {
    rswift()
        .args([
            "--os-storage-url",
            "http://127.0.0.1:1/v1/AUTH_t",
            "--os-auth-token",
            "tok",
            "upload",
            "c",
            "somefile",
            "-S",
            "ten",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Segment size should be an integer value",
        ));
}

#[test]
fn test_unknown_subcommand_fails() {
    rswift().arg("frobnicate").assert().failure();
}
