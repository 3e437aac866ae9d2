#[path = "common/mod.rs"]
mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn hun(home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("hun").unwrap();
    cmd.env("HOME", home);
    cmd
}

#[test]
fn version_prints_package_version() {
    let temp = tempdir().unwrap();
    hun(temp.path())
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn list_reports_empty_registry() {
    let temp = tempdir().unwrap();
    hun(temp.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No projects registered"));
}

#[test]
fn add_then_list_shows_the_project() {
    let temp = tempdir().unwrap();
    let project = common::write_project(
        temp.path(),
        "shop",
        "name: shop\nservices:\n  web:\n    cmd: sleep 1\n",
    );

    hun(temp.path())
        .args(["add", project.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Registered 'shop'"));

    hun(temp.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("shop"))
        .stdout(predicate::str::contains("stopped"));
}

#[test]
fn add_rejects_conflicting_registration() {
    let temp = tempdir().unwrap();
    let first = common::write_project(
        temp.path(),
        "first",
        "name: dup\nservices:\n  web:\n    cmd: sleep 1\n",
    );
    let second = common::write_project(
        temp.path(),
        "second",
        "name: dup\nservices:\n  web:\n    cmd: sleep 1\n",
    );

    hun(temp.path())
        .args(["add", first.to_str().unwrap()])
        .assert()
        .success();
    hun(temp.path())
        .args(["add", second.to_str().unwrap()])
        .assert()
        .failure();
}

#[test]
fn add_rejects_invalid_manifest() {
    let temp = tempdir().unwrap();
    let project = common::write_project(
        temp.path(),
        "broken",
        "name: broken\nservices: {}\n",
    );

    hun(temp.path())
        .args(["add", project.to_str().unwrap()])
        .assert()
        .failure();
}

#[test]
fn remove_unknown_project_fails() {
    let temp = tempdir().unwrap();
    hun(temp.path())
        .args(["remove", "ghost"])
        .assert()
        .failure();
}

#[test]
fn remove_drops_registered_project() {
    let temp = tempdir().unwrap();
    let project = common::write_project(
        temp.path(),
        "shop",
        "name: shop\nservices:\n  web:\n    cmd: sleep 1\n",
    );

    hun(temp.path())
        .args(["add", project.to_str().unwrap()])
        .assert()
        .success();
    hun(temp.path())
        .args(["remove", "shop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 'shop'"));
    hun(temp.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No projects registered"));
}

#[test]
fn logs_requires_project_and_service() {
    let temp = tempdir().unwrap();
    hun(temp.path())
        .args(["logs", "just-a-project"])
        .assert()
        .failure();
}

#[test]
fn doctor_runs_without_a_daemon() {
    let temp = tempdir().unwrap();
    fs::create_dir_all(temp.path().join(".hun")).unwrap();
    hun(temp.path())
        .arg("doctor")
        .assert()
        .success()
        .stdout(predicate::str::contains("daemon"));
}

#[test]
fn init_registers_current_directory() {
    let temp = tempdir().unwrap();
    let project = common::write_project(
        temp.path(),
        "here",
        "name: here\nservices:\n  web:\n    cmd: sleep 1\n",
    );

    hun(temp.path())
        .arg("init")
        .current_dir(&project)
        .assert()
        .success()
        .stdout(predicate::str::contains("Registered 'here'"));
}
