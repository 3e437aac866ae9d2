#[path = "common/mod.rs"]
mod common;

use common::HomeEnvGuard;
use hun::config::load_manifest;
use hun::manager::Manager;
use hun::state::{Mode, ProjectStatus, ServiceStatus, StateStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{fs, thread};
use tempfile::tempdir;

fn manager_with_home() -> Arc<Manager> {
    let state = Arc::new(StateStore::open().expect("open state"));
    Manager::new(state, 1)
}

#[test]
fn failed_dependency_start_rolls_back_cleanly() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let pid_path = temp.path().join("a.pid");
    let project_dir = common::write_project(
        temp.path(),
        "broken",
        &format!(
            r#"
name: broken
services:
  a:
    cmd: "echo $$ > {} && exec sleep 5"
  b:
    cmd: "echo should-not-start"
    cwd: "./missing-subdir"
    depends_on: [a]
"#,
            pid_path.display()
        ),
    );

    let manager = manager_with_home();
    let manifest = load_manifest(&project_dir).unwrap();
    let result = manager.start_project("broken", manifest, &project_dir, false);
    assert!(result.is_err(), "start must fail on the broken service");

    assert!(!manager.is_running("broken"));
    assert!(manager.status().is_empty());

    // No process from the project survives the rollback.
    common::wait_for_path(&pid_path);
    let pid: u32 = fs::read_to_string(&pid_path)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    common::wait_for_process_exit(pid);

    // The persisted record must not claim the project is running.
    let doc = StateStore::open().unwrap().snapshot();
    if let Some(record) = doc.projects.get("broken") {
        assert_eq!(record.status, ProjectStatus::Stopped);
        assert!(record.services.is_empty());
    }
}

#[test]
fn services_start_in_dependency_order() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let order_path = temp.path().join("order.txt");
    let project_dir = common::write_project(
        temp.path(),
        "ordered",
        &format!(
            r#"
name: ordered
services:
  web:
    cmd: "echo web >> {order} && sleep 10"
    depends_on: [api]
  api:
    cmd: "echo api >> {order} && sleep 10"
    depends_on: [db]
  db:
    cmd: "echo db >> {order} && sleep 10"
"#,
            order = order_path.display()
        ),
    );

    let manager = manager_with_home();
    let manifest = load_manifest(&project_dir).unwrap();
    manager
        .start_project("ordered", manifest, &project_dir, false)
        .unwrap();

    let lines: Vec<String> = fs::read_to_string(&order_path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(lines, vec!["db", "api", "web"]);

    manager.stop_project("ordered").unwrap();
    assert!(manager.status().is_empty());
}

#[test]
fn runtime_port_override_applies_offset() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let base_dir = common::write_project(
        temp.path(),
        "offset-base",
        r#"
name: offset-base
services:
  hold:
    cmd: "sleep 10"
"#,
    );
    let target_dir = common::write_project(
        temp.path(),
        "offset-target",
        r#"
name: offset-target
services:
  web:
    cmd: "echo 'Local: http://localhost:5174/' && echo 'Local: http://localhost:5174/' && sleep 10"
    port: 3000
    port_env: PORT
"#,
    );

    let manager = manager_with_home();
    let base_manifest = load_manifest(&base_dir).unwrap();
    manager
        .start_project("offset-base", base_manifest, &base_dir, true)
        .unwrap();

    let target_manifest = load_manifest(&target_dir).unwrap();
    manager
        .start_project("offset-target", target_manifest, &target_dir, false)
        .unwrap();

    // The web service printed its real port twice; within 3 seconds the
    // supervisor adopts it and records the pre-offset base.
    let adopted = common::wait_until(Duration::from_secs(3), || {
        manager
            .status()
            .get("offset-target")
            .and_then(|services| services.get("web"))
            .map(|info| info.port == 5174)
            .unwrap_or(false)
    });
    assert!(adopted, "runtime port was not adopted");

    let persisted = common::wait_until(Duration::from_secs(3), || {
        let doc = StateStore::open().unwrap().snapshot();
        doc.projects
            .get("offset-target")
            .map(|record| {
                record.port_overrides.get("web") == Some(&5173)
                    && record
                        .services
                        .get("web")
                        .map(|row| {
                            row.port == 5174 && row.status == ServiceStatus::Running
                        })
                        .unwrap_or(false)
            })
            .unwrap_or(false)
    });
    assert!(persisted, "override and service row were not persisted");

    manager.stop_project("offset-target").unwrap();
    manager.stop_project("offset-base").unwrap();
}

#[test]
fn stubborn_services_stop_in_parallel_within_deadline() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let project_dir = common::write_project(
        temp.path(),
        "stubborn",
        r#"
name: stubborn
services:
  one:
    cmd: "trap '' TERM; while true; do sleep 1; done"
  two:
    cmd: "trap '' TERM; while true; do sleep 1; done"
"#,
    );

    let manager = manager_with_home();
    let manifest = load_manifest(&project_dir).unwrap();
    manager
        .start_project("stubborn", manifest, &project_dir, false)
        .unwrap();
    // Let the shells install their traps.
    thread::sleep(Duration::from_millis(300));

    let begin = Instant::now();
    manager.stop_project("stubborn").unwrap();
    let elapsed = begin.elapsed();

    assert!(
        elapsed < Duration::from_secs(8),
        "parallel stop took too long: {elapsed:?}"
    );
    assert!(manager.status().is_empty());
}

#[test]
fn restart_service_clears_stale_log_history() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let project_dir = common::write_project(
        temp.path(),
        "chatty",
        r#"
name: chatty
services:
  app:
    cmd: "echo started && sleep 30"
"#,
    );

    let manager = manager_with_home();
    let manifest = load_manifest(&project_dir).unwrap();
    manager
        .start_project("chatty", manifest, &project_dir, false)
        .unwrap();

    assert!(common::wait_until(Duration::from_secs(3), || {
        !manager.logs("chatty", "app", 0).is_empty()
    }));

    manager.restart_service("chatty", "app").unwrap();

    assert!(common::wait_until(Duration::from_secs(3), || {
        let lines = manager.logs("chatty", "app", 0);
        lines.iter().filter(|l| l.text == "started").count() == 1
    }));
    // And nothing older than the restart survives.
    let lines = manager.logs("chatty", "app", 0);
    assert_eq!(
        lines.iter().filter(|l| l.text == "started").count(),
        1,
        "ring buffer must only hold post-restart history"
    );

    manager.stop_project("chatty").unwrap();
}

#[test]
fn crash_with_on_failure_policy_restarts_and_resets_buffer() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let project_dir = common::write_project(
        temp.path(),
        "flaky",
        r#"
name: flaky
services:
  app:
    cmd: "echo crash-line && exit 1"
    restart: on_failure
"#,
    );

    let manager = manager_with_home();
    let manifest = load_manifest(&project_dir).unwrap();
    let begin = Instant::now();
    manager
        .start_project("flaky", manifest, &project_dir, false)
        .unwrap();

    // Sample at ~1.6s after start: the auto-restart has recycled the
    // buffer, so at most one crash line is visible at any instant.
    let elapsed = begin.elapsed();
    if elapsed < Duration::from_millis(1600) {
        thread::sleep(Duration::from_millis(1600) - elapsed);
    }
    let crash_lines = manager
        .logs("flaky", "app", 0)
        .iter()
        .filter(|l| l.text == "crash-line")
        .count();
    assert!(crash_lines <= 1, "buffer held {crash_lines} crash lines");

    // Stopping the project cancels the restart loop.
    manager.stop_project("flaky").unwrap();
    thread::sleep(Duration::from_millis(1500));
    assert!(manager.status().is_empty());
}

#[test]
fn start_conflicts_and_stop_is_idempotent() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let project_dir = common::write_project(
        temp.path(),
        "solo",
        r#"
name: solo
services:
  app:
    cmd: "sleep 10"
"#,
    );

    let manager = manager_with_home();
    let manifest = load_manifest(&project_dir).unwrap();
    manager
        .start_project("solo", manifest.clone(), &project_dir, false)
        .unwrap();

    // A second start fails with a conflict and leaves the project running.
    let err = manager
        .start_project("solo", manifest, &project_dir, false)
        .unwrap_err();
    assert!(err.to_string().contains("already running"), "{err}");
    assert!(manager.is_running("solo"));

    manager.stop_project("solo").unwrap();
    // Stopping again is a no-op.
    manager.stop_project("solo").unwrap();
    manager.stop_project("never-started").unwrap();
}

#[test]
fn exclusive_and_parallel_starts_get_expected_offsets() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let focused_dir = common::write_project(
        temp.path(),
        "focused",
        r#"
name: focused
services:
  app:
    cmd: "sleep 10"
    port: 4000
"#,
    );
    let side_dir = common::write_project(
        temp.path(),
        "side",
        r#"
name: side
services:
  app:
    cmd: "sleep 10"
    port: 4000
"#,
    );

    let manager = manager_with_home();
    manager
        .start_project(
            "focused",
            load_manifest(&focused_dir).unwrap(),
            &focused_dir,
            true,
        )
        .unwrap();
    manager
        .start_project("side", load_manifest(&side_dir).unwrap(), &side_dir, false)
        .unwrap();

    let ports = manager.ports();
    assert_eq!(ports["focused"]["app"], 4000);
    assert_eq!(ports["side"]["app"], 4001);

    let doc = StateStore::open().unwrap().snapshot();
    assert_eq!(doc.projects["focused"].offset, 0);
    assert_eq!(doc.projects["side"].offset, 1);

    manager.stop_project("side").unwrap();
    manager.stop_project("focused").unwrap();
}

#[test]
fn stopping_one_service_leaves_siblings_running() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let project_dir = common::write_project(
        temp.path(),
        "pair",
        r#"
name: pair
services:
  keeper:
    cmd: "sleep 10"
  victim:
    cmd: "sleep 10"
"#,
    );

    let manager = manager_with_home();
    manager
        .start_project(
            "pair",
            load_manifest(&project_dir).unwrap(),
            &project_dir,
            false,
        )
        .unwrap();

    manager.stop_service("pair", "victim").unwrap();

    let status = manager.status();
    assert!(!status["pair"]["victim"].running);
    assert!(status["pair"]["keeper"].running);

    let doc = StateStore::open().unwrap().snapshot();
    let victim = &doc.projects["pair"].services["victim"];
    assert_eq!(victim.pid, 0);
    assert_eq!(victim.status, ServiceStatus::Stopped);

    // Unknown service is a conflict, not a crash.
    assert!(manager.stop_service("pair", "ghost").is_err());

    manager.stop_project("pair").unwrap();
}

#[test]
fn recovery_restarts_recorded_projects() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let project_dir = common::write_project(
        temp.path(),
        "phoenix",
        r#"
name: phoenix
services:
  app:
    cmd: "sleep 10"
    port: 4100
"#,
    );

    // Simulate a supervisor that died while the project was running.
    {
        let store = StateStore::open().unwrap();
        store
            .update(|doc| {
                doc.registry.insert(
                    "phoenix".to_string(),
                    project_dir.display().to_string(),
                );
                let record = doc.projects.entry("phoenix".to_string()).or_default();
                record.status = ProjectStatus::Running;
                record.offset = 0;
                record.path = project_dir.display().to_string();
                doc.active_project = "phoenix".to_string();
                doc.mode = Mode::Focus;
            })
            .unwrap();
    }

    let manager = manager_with_home();
    manager.recover();

    assert!(manager.is_running("phoenix"));
    // Focus mode with a single project recovers exclusively on base ports.
    assert_eq!(manager.ports()["phoenix"]["app"], 4100);

    let doc = StateStore::open().unwrap().snapshot();
    assert_eq!(doc.active_project, "phoenix");
    assert_eq!(doc.mode, Mode::Focus);

    manager.stop_project("phoenix").unwrap();
}
