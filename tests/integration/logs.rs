#[path = "common/mod.rs"]
mod common;

use common::HomeEnvGuard;
use hun::config::load_manifest;
use hun::manager::Manager;
use hun::runtime;
use hun::state::StateStore;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn manager_with_home() -> Arc<Manager> {
    let state = Arc::new(StateStore::open().expect("open state"));
    Manager::new(state, 1)
}

#[test]
fn service_output_reaches_ring_file_and_subscribers() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let project_dir = common::write_project(
        temp.path(),
        "noisy",
        r#"
name: noisy
services:
  app:
    cmd: "echo out-line && echo err-line >&2 && sleep 10"
"#,
    );

    let manager = manager_with_home();
    let (_id, rx) = manager.subscribe("noisy", "");

    manager
        .start_project(
            "noisy",
            load_manifest(&project_dir).unwrap(),
            &project_dir,
            false,
        )
        .unwrap();

    // Ring buffer holds both streams in arrival order.
    assert!(common::wait_until(Duration::from_secs(3), || {
        manager.logs("noisy", "app", 0).len() >= 2
    }));
    let lines = manager.logs("noisy", "app", 0);
    let out = lines.iter().find(|l| l.text == "out-line").unwrap();
    let err = lines.iter().find(|l| l.text == "err-line").unwrap();
    assert!(!out.is_err);
    assert!(err.is_err);
    assert_eq!(out.project, "noisy");
    assert_eq!(out.service, "app");

    // The live subscriber received the same lines.
    let mut streamed = Vec::new();
    while let Ok(line) = rx.recv_timeout(Duration::from_millis(500)) {
        streamed.push(line.text);
        if streamed.len() == 2 {
            break;
        }
    }
    assert!(streamed.contains(&"out-line".to_string()));
    assert!(streamed.contains(&"err-line".to_string()));

    // The rotating file sink formats each line with a stream tag.
    let log_path = runtime::service_log_path("noisy", "app");
    assert!(common::wait_until(Duration::from_secs(3), || {
        fs::read_to_string(&log_path)
            .map(|content| {
                content.contains("[out] out-line") && content.contains("[err] err-line")
            })
            .unwrap_or(false)
    }));

    manager.stop_project("noisy").unwrap();

    // Eviction closes the writer but the file history stays on disk.
    let content = fs::read_to_string(&log_path).unwrap();
    assert!(content.contains("[out] out-line"));
    assert!(manager.logs("noisy", "app", 0).is_empty());
}

#[test]
fn tail_respects_requested_line_count() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let project_dir = common::write_project(
        temp.path(),
        "counter",
        r#"
name: counter
services:
  app:
    cmd: "for i in 1 2 3 4 5; do echo line-$i; done && sleep 10"
"#,
    );

    let manager = manager_with_home();
    manager
        .start_project(
            "counter",
            load_manifest(&project_dir).unwrap(),
            &project_dir,
            false,
        )
        .unwrap();

    assert!(common::wait_until(Duration::from_secs(3), || {
        manager.logs("counter", "app", 0).len() == 5
    }));

    let tail = manager.logs("counter", "app", 2);
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].text, "line-4");
    assert_eq!(tail[1].text, "line-5");

    manager.stop_project("counter").unwrap();
}
